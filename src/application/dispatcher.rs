//! 批次分发器
//!
//! 消费一个批次任务，调用对应平台的发送器并同步等待回调，
//! 再把本批次的指标增量投到指标队列。批次级错误只记录不重试。

use std::sync::Arc;

use tracing::{instrument, warn};

use crate::domain::model::{
    BatchJob, DeliveryStatus, UnifiedPushMessage, VariantErrorStatus, VariantMetricInformation,
};
use crate::domain::repository::{InstallationRepository, MetricsStore};
use crate::error::{PushServerError, Result};
use crate::infrastructure::broker::{Envelope, Transaction, METRICS_QUEUE, PROP_VARIANT_ID};
use crate::infrastructure::sender::{SenderCallback, SenderOutcome, SenderRegistry};
use crate::metrics::PushServerMetrics;

pub struct Dispatcher {
    installations: Arc<dyn InstallationRepository>,
    store: Arc<dyn MetricsStore>,
    senders: Arc<SenderRegistry>,
    metrics: Arc<PushServerMetrics>,
}

impl Dispatcher {
    pub fn new(
        installations: Arc<dyn InstallationRepository>,
        store: Arc<dyn MetricsStore>,
        senders: Arc<SenderRegistry>,
        metrics: Arc<PushServerMetrics>,
    ) -> Self {
        Self {
            installations,
            store,
            senders,
            metrics,
        }
    }

    /// 投递一个批次并把结果指标挂到调用方事务
    #[instrument(skip(self, tx, batch), fields(
        push_id = %batch.push_message_information_id,
        variant_id = %batch.variant_id,
        tokens = batch.tokens.len(),
        last_batch = batch.is_last_batch,
    ))]
    pub async fn dispatch(&self, tx: &mut Transaction, batch: &BatchJob) -> Result<()> {
        let variant = self
            .installations
            .find_variant(&batch.variant_id)?
            .ok_or_else(|| PushServerError::UnknownVariant(batch.variant_id.clone()))?;
        let message = UnifiedPushMessage::from_json(&batch.serialized_message)?;
        let sender = self.senders.get(variant.variant_type).ok_or_else(|| {
            PushServerError::NoSenderForPlatform(variant.variant_type.to_string())
        })?;

        let (callback, outcome) = SenderCallback::channel();
        let outcome = match sender
            .send_push_message(
                &variant,
                &batch.tokens,
                &message,
                &batch.push_message_information_id,
                callback,
            )
            .await
        {
            Ok(()) => outcome
                .await
                .unwrap_or_else(|_| {
                    SenderOutcome::Error("sender finished without reporting an outcome".to_string())
                }),
            Err(err) => SenderOutcome::Error(err.to_string()),
        };

        let mut metric = VariantMetricInformation::new(
            &batch.push_message_information_id,
            &batch.variant_id,
        );
        metric.receivers = batch.tokens.len() as u64;
        metric.served_batches = 1;
        metric.total_batches = 0;

        match outcome {
            SenderOutcome::Success => {
                metric.delivery_status = DeliveryStatus::Success;
                self.metrics.batches_dispatched_total.inc();
            }
            SenderOutcome::Error(reason) => {
                warn!(reason = %reason, "sender reported batch failure");
                metric.delivery_status = DeliveryStatus::Failed;
                metric.reason = Some(reason.clone());
                self.store.record_variant_error(&VariantErrorStatus::new(
                    &batch.push_message_information_id,
                    &batch.variant_id,
                    reason,
                ))?;
                self.metrics.batches_failed_total.inc();
            }
        }

        tx.send(
            METRICS_QUEUE,
            Envelope::json(&metric)?.with_str_property(PROP_VARIANT_ID, &batch.variant_id),
        );
        Ok(())
    }
}
