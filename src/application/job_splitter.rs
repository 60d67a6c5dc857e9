//! 任务拆分器
//!
//! 接收一条统一推送请求，展开为各变体的加载任务。
//! 聚合文档先于任何子任务入队落库，之后只由指标收集器修改。

use std::sync::Arc;

use tracing::{info, instrument};
use uuid::Uuid;

use crate::domain::event::{LifecycleEvents, PushLifecycleEvent};
use crate::domain::model::{
    PushMessageInformation, UnifiedPushMessage, Variant, VariantJob,
};
use crate::domain::repository::{InstallationRepository, MetricsStore};
use crate::error::{PushServerError, Result};
use crate::infrastructure::broker::{variant_job_queue, Broker, Envelope, PROP_VARIANT_ID};
use crate::infrastructure::cache::MetricsCache;
use crate::metrics::PushServerMetrics;

/// 提交方元信息，写入聚合文档
#[derive(Debug, Clone, Default)]
pub struct SubmissionContext {
    pub ip_address: Option<String>,
    pub client_identifier: Option<String>,
}

pub struct JobSplitter {
    broker: Broker,
    store: Arc<dyn MetricsStore>,
    installations: Arc<dyn InstallationRepository>,
    cache: Arc<MetricsCache>,
    events: LifecycleEvents,
    metrics: Arc<PushServerMetrics>,
}

impl JobSplitter {
    pub fn new(
        broker: Broker,
        store: Arc<dyn MetricsStore>,
        installations: Arc<dyn InstallationRepository>,
        cache: Arc<MetricsCache>,
        events: LifecycleEvents,
        metrics: Arc<PushServerMetrics>,
    ) -> Self {
        Self {
            broker,
            store,
            installations,
            cache,
            events,
            metrics,
        }
    }

    /// 拆分并投递一次推送，返回推送任务 ID
    #[instrument(skip(self, message, context), fields(app_id = %app_id))]
    pub fn submit(
        &self,
        app_id: &str,
        message: &UnifiedPushMessage,
        context: SubmissionContext,
    ) -> Result<String> {
        let application = self
            .installations
            .find_application(app_id)?
            .ok_or_else(|| PushServerError::UnknownApplication(app_id.to_string()))?;

        let targeted: Vec<&Variant> = application
            .variants
            .iter()
            .filter(|variant| match &message.criteria.variants {
                Some(allowed) => allowed.contains(&variant.id),
                None => true,
            })
            .collect();

        let raw_json = message.to_json()?;
        let push_id = new_job_id();
        let mut info =
            PushMessageInformation::new(&push_id, app_id, &raw_json, targeted.len() as u32);
        info.ip_address = context.ip_address;
        info.client_identifier = context.client_identifier;
        self.store.create_push_message_information(&info)?;

        self.cache.increment_total(app_id);
        self.metrics.jobs_submitted_total.inc();

        if targeted.is_empty() {
            // 没有目标变体，任务在提交点即完成
            info!(push_id = %push_id, "no variants targeted, push message complete at submission");
            self.events.publish(PushLifecycleEvent::PushMessageCompleted {
                push_message_information_id: push_id.clone(),
            });
            return Ok(push_id);
        }

        let mut tx = self.broker.begin();
        for variant in &targeted {
            let job = VariantJob::seed(&push_id, &variant.id, &raw_json);
            tx.send(
                &variant_job_queue(variant.variant_type),
                Envelope::json(&job)?
                    .with_duplicate_id(VariantJob::seed_duplicate_id(&push_id, &variant.id))
                    .with_str_property(PROP_VARIANT_ID, &variant.id),
            );
        }
        tx.commit();

        info!(
            push_id = %push_id,
            variants = targeted.len(),
            "push message split into variant jobs"
        );
        Ok(push_id)
    }
}

/// 时间有序的任务 ID
fn new_job_id() -> String {
    Uuid::now_v7().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_ids_are_time_ordered() {
        let first = new_job_id();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let second = new_job_id();
        assert_ne!(first, second);
        assert!(first < second);
    }
}
