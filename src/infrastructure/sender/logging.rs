use async_trait::async_trait;
use tracing::info;

use crate::domain::model::{UnifiedPushMessage, Variant};
use crate::error::Result;
use crate::infrastructure::sender::{PushNotificationSender, SenderCallback};

/// 只打日志的发送器，本地运行时代替真实推送网络
pub struct LoggingSender;

impl LoggingSender {
    pub fn new() -> Self {
        Self
    }
}

impl Default for LoggingSender {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PushNotificationSender for LoggingSender {
    async fn send_push_message(
        &self,
        variant: &Variant,
        tokens: &[String],
        message: &UnifiedPushMessage,
        push_job_id: &str,
        callback: SenderCallback,
    ) -> Result<()> {
        info!(
            push_job_id,
            variant_id = %variant.id,
            platform = %variant.variant_type,
            tokens = tokens.len(),
            alert = message.message.alert.as_deref().unwrap_or(""),
            "delivering batch"
        );
        callback.on_success();
        Ok(())
    }
}
