//! 推送发送器契约与注册表
//!
//! 真实平台传输（APNs、FCM、WebPush、ADM）在各自的适配器实现；
//! 这里只定义契约、回调语义与按平台的查找。

pub mod logging;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::oneshot;
use tracing::debug;

use crate::domain::model::{UnifiedPushMessage, Variant, VariantType};
use crate::error::Result;

/// 一个批次的发送结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SenderOutcome {
    Success,
    Error(String),
}

/// 发送器必须恰好回调一次；断开连接等后续错误不再二次上报
#[derive(Clone)]
pub struct SenderCallback {
    slot: Arc<Mutex<Option<oneshot::Sender<SenderOutcome>>>>,
}

impl SenderCallback {
    pub fn channel() -> (Self, oneshot::Receiver<SenderOutcome>) {
        let (sender, receiver) = oneshot::channel();
        (
            Self {
                slot: Arc::new(Mutex::new(Some(sender))),
            },
            receiver,
        )
    }

    /// 批次处理完毕且无致命错误
    pub fn on_success(&self) {
        self.resolve(SenderOutcome::Success);
    }

    /// 连接、鉴权或载荷级的致命错误；单个令牌被拒不算错误
    pub fn on_error(&self, reason: impl Into<String>) {
        self.resolve(SenderOutcome::Error(reason.into()));
    }

    fn resolve(&self, outcome: SenderOutcome) {
        let taken = self
            .slot
            .lock()
            .ok()
            .and_then(|mut slot| slot.take());
        match taken {
            Some(sender) => {
                let _ = sender.send(outcome);
            }
            None => debug!("sender callback already resolved, ignoring"),
        }
    }
}

/// 平台发送器契约
///
/// 实现必须支持同一变体的多个工作协程并发调用。
/// 失效令牌通过注入的 InstallationRepository 申请移除，而不是上报错误。
#[async_trait]
pub trait PushNotificationSender: Send + Sync {
    async fn send_push_message(
        &self,
        variant: &Variant,
        tokens: &[String],
        message: &UnifiedPushMessage,
        push_job_id: &str,
        callback: SenderCallback,
    ) -> Result<()>;
}

/// 按平台注册的发送器集合
pub struct SenderRegistry {
    senders: HashMap<VariantType, Arc<dyn PushNotificationSender>>,
}

impl SenderRegistry {
    pub fn new() -> Self {
        Self {
            senders: HashMap::new(),
        }
    }

    /// 所有平台使用日志发送器，供本地运行与演示
    pub fn logging_defaults() -> Self {
        let mut registry = Self::new();
        let sender: Arc<dyn PushNotificationSender> = Arc::new(logging::LoggingSender::new());
        for variant_type in VariantType::ALL {
            registry.register(variant_type, sender.clone());
        }
        registry
    }

    pub fn register(
        &mut self,
        variant_type: VariantType,
        sender: Arc<dyn PushNotificationSender>,
    ) {
        self.senders.insert(variant_type, sender);
    }

    pub fn get(&self, variant_type: VariantType) -> Option<Arc<dyn PushNotificationSender>> {
        self.senders.get(&variant_type).cloned()
    }
}

impl Default for SenderRegistry {
    fn default() -> Self {
        Self::new()
    }
}
