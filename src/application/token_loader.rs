//! 令牌加载器
//!
//! 消费一个变体加载任务，按平台批量参数读取一个令牌窗口并切成批次。
//! 批次、已加载标记与后续加载任务在同一事务内入队：
//! 提交成功的批次必然带着它的标记，崩溃则整体回滚重投递。

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, instrument};

use crate::config::SenderConfigurationRegistry;
use crate::domain::model::{
    AllBatchesLoadedMarker, BatchJob, BatchLoadedMarker, DeliveryStatus, TriggerMetricCollection,
    UnifiedPushMessage, VariantJob, VariantMetricInformation,
};
use crate::domain::repository::InstallationRepository;
use crate::error::{PushServerError, Result};
use crate::infrastructure::broker::{
    batch_queue, variant_job_queue, Envelope, Transaction, ALL_BATCHES_LOADED_QUEUE,
    BATCH_LOADED_QUEUE, METRICS_QUEUE, PROP_VARIANT_ID, TRIGGER_QUEUE,
};

pub struct TokenLoader {
    installations: Arc<dyn InstallationRepository>,
    sender_configurations: SenderConfigurationRegistry,
    trigger_delay: Duration,
}

impl TokenLoader {
    pub fn new(
        installations: Arc<dyn InstallationRepository>,
        sender_configurations: SenderConfigurationRegistry,
        trigger_delay: Duration,
    ) -> Self {
        Self {
            installations,
            sender_configurations,
            trigger_delay,
        }
    }

    /// 处理一个变体加载任务，所有入队动作挂在调用方事务上
    #[instrument(skip(self, tx, job), fields(
        push_id = %job.push_message_information_id,
        variant_id = %job.variant_id,
    ))]
    pub fn load_and_queue_batches(&self, tx: &mut Transaction, job: &VariantJob) -> Result<()> {
        let variant = self
            .installations
            .find_variant(&job.variant_id)?
            .ok_or_else(|| PushServerError::UnknownVariant(job.variant_id.clone()))?;
        let message = UnifiedPushMessage::from_json(&job.serialized_message)?;
        let configuration = self.sender_configurations.get(variant.variant_type);

        let page = self.installations.find_device_tokens(
            &job.variant_id,
            &message.criteria,
            job.last_token.as_deref(),
            configuration.tokens_to_load(),
        )?;

        if page.tokens.is_empty() {
            if job.last_token.is_none() {
                self.queue_empty_variant(tx, job)?;
            } else {
                // 上一窗口恰好耗尽令牌，补上终结标记
                tx.send(
                    ALL_BATCHES_LOADED_QUEUE,
                    Envelope::json(&AllBatchesLoadedMarker {
                        variant_id: job.variant_id.clone(),
                    })?
                    .with_str_property(PROP_VARIANT_ID, &job.variant_id),
                );
            }
        } else {
            let batches: Vec<&[String]> =
                page.tokens.chunks(configuration.batch_size()).collect();
            let last_index = batches.len() - 1;
            debug!(
                tokens = page.tokens.len(),
                batches = batches.len(),
                is_last_window = page.is_last,
                "loaded token window"
            );

            for (index, tokens) in batches.iter().enumerate() {
                let batch = BatchJob {
                    push_message_information_id: job.push_message_information_id.clone(),
                    variant_id: job.variant_id.clone(),
                    serialized_message: job.serialized_message.clone(),
                    tokens: tokens.to_vec(),
                    is_last_batch: page.is_last && index == last_index,
                };
                tx.send(
                    &batch_queue(variant.variant_type),
                    Envelope::json(&batch)?.with_str_property(PROP_VARIANT_ID, &job.variant_id),
                );
                tx.send(
                    BATCH_LOADED_QUEUE,
                    Envelope::json(&BatchLoadedMarker {
                        variant_id: job.variant_id.clone(),
                    })?
                    .with_str_property(PROP_VARIANT_ID, &job.variant_id),
                );
            }

            if page.is_last {
                tx.send(
                    ALL_BATCHES_LOADED_QUEUE,
                    Envelope::json(&AllBatchesLoadedMarker {
                        variant_id: job.variant_id.clone(),
                    })?
                    .with_str_property(PROP_VARIANT_ID, &job.variant_id),
                );
            } else {
                let cursor = page.next_cursor.ok_or_else(|| {
                    PushServerError::StorePermanent(
                        "token page without cursor before last window".to_string(),
                    )
                })?;
                tx.send(
                    &variant_job_queue(variant.variant_type),
                    Envelope::json(&job.next_window(cursor))?
                        .with_str_property(PROP_VARIANT_ID, &job.variant_id),
                );
            }
        }

        // 每个加载窗口都补发触发消息，不做去重：
        // 任何一条在收敛后被消费即可，其余触发到达时一并吞掉
        let trigger = TriggerMetricCollection::new(&job.push_message_information_id);
        tx.send_delayed(TRIGGER_QUEUE, Envelope::json(&trigger)?, self.trigger_delay);
        Ok(())
    }

    /// 首个窗口即为空：合成一个零接收者批次，让收集器按正常路径收敛
    fn queue_empty_variant(&self, tx: &mut Transaction, job: &VariantJob) -> Result<()> {
        debug!("variant has no matching tokens");
        tx.send(
            BATCH_LOADED_QUEUE,
            Envelope::json(&BatchLoadedMarker {
                variant_id: job.variant_id.clone(),
            })?
            .with_str_property(PROP_VARIANT_ID, &job.variant_id),
        );
        tx.send(
            ALL_BATCHES_LOADED_QUEUE,
            Envelope::json(&AllBatchesLoadedMarker {
                variant_id: job.variant_id.clone(),
            })?
            .with_str_property(PROP_VARIANT_ID, &job.variant_id),
        );

        let mut metric = VariantMetricInformation::new(
            &job.push_message_information_id,
            &job.variant_id,
        );
        metric.delivery_status = DeliveryStatus::Success;
        tx.send(
            METRICS_QUEUE,
            Envelope::json(&metric)?.with_str_property(PROP_VARIANT_ID, &job.variant_id),
        );
        Ok(())
    }
}
