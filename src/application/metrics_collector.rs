//! 指标收集器
//!
//! 把各批次的投递结果折叠进变体级与任务级计数。
//! 已加载批次数不走内存计数器，而是从队列清点标记：
//! 标记与批次同事务提交，清点同样在消费事务内，崩溃时一并回滚，
//! 计数向 servedBatches = totalBatches 单调收敛。

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

use crate::domain::event::{LifecycleEvents, PushLifecycleEvent};
use crate::domain::model::VariantMetricInformation;
use crate::domain::repository::MetricsStore;
use crate::error::{PushServerError, Result};
use crate::infrastructure::broker::{
    Transaction, ALL_BATCHES_LOADED_QUEUE, BATCH_LOADED_QUEUE, PROP_VARIANT_ID,
};
use crate::infrastructure::cache::MetricsCache;
use crate::metrics::PushServerMetrics;

/// 一次收集的结果，触发循环据此决定是否结束
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectOutcome {
    /// 计数尚未对齐或终结标记未到，等待下一次触发
    Pending,
    /// 本变体完成，任务还有其他变体未收敛
    VariantCompleted,
    /// 任务的全部变体完成
    PushMessageCompleted,
}

pub struct MetricsCollector {
    store: Arc<dyn MetricsStore>,
    cache: Arc<MetricsCache>,
    events: LifecycleEvents,
    metrics: Arc<PushServerMetrics>,
    // 同一推送任务的聚合写串行化
    push_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl MetricsCollector {
    pub fn new(
        store: Arc<dyn MetricsStore>,
        cache: Arc<MetricsCache>,
        events: LifecycleEvents,
        metrics: Arc<PushServerMetrics>,
    ) -> Self {
        Self {
            store,
            cache,
            events,
            metrics,
            push_locks: DashMap::new(),
        }
    }

    /// 折叠一条变体指标增量
    ///
    /// 清点 BatchLoadedQueue 与消费终结标记都挂在调用方事务上，
    /// 出错回滚后标记原样退回，重投递不会重复计数。
    #[instrument(skip(self, tx, update), fields(
        push_id = %update.push_message_information_id,
        variant_id = %update.variant_id,
    ))]
    pub async fn collect(
        &self,
        tx: &mut Transaction,
        mut update: VariantMetricInformation,
    ) -> Result<CollectOutcome> {
        let push_id = update.push_message_information_id.clone();
        let variant_id = update.variant_id.clone();

        let lock = self
            .push_locks
            .entry(push_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        let mut info = self
            .store
            .find_push_message_information(&push_id)?
            .ok_or_else(|| {
                PushServerError::StorePermanent(format!(
                    "push message information {} not found",
                    push_id
                ))
            })?;

        info.total_receivers += update.receivers;
        self.cache
            .add_receivers(&info.push_application_id, update.receivers);

        let loaded = self.count_loaded_batches(tx, &variant_id);
        update.total_batches += loaded;
        update.served_batches = 1;
        debug!(loaded, "folded freshly loaded batch markers");

        let variant_complete = match info.variant_information_mut(&variant_id) {
            Some(existing) => {
                existing.merge(&update);
                existing.is_complete()
            }
            None => {
                let complete = update.is_complete();
                info.variant_informations.push(update);
                complete
            }
        };
        self.store.update_push_message_information(&info)?;

        if variant_complete && self.all_batches_loaded(tx, &variant_id) {
            info.served_variants += 1;
            self.store.update_push_message_information(&info)?;
            self.metrics.variants_completed_total.inc();
            info!(served_variants = info.served_variants, "variant completed");
            self.events.publish(PushLifecycleEvent::VariantCompleted {
                push_message_information_id: push_id.clone(),
                variant_id,
            });

            if info.is_complete() {
                self.metrics.push_messages_completed_total.inc();
                info!("push message completed");
                self.events
                    .publish(PushLifecycleEvent::PushMessageCompleted {
                        push_message_information_id: push_id,
                    });
                return Ok(CollectOutcome::PushMessageCompleted);
            }
            return Ok(CollectOutcome::VariantCompleted);
        }

        Ok(CollectOutcome::Pending)
    }

    /// 触发循环的收敛判定
    pub fn is_push_complete(&self, push_id: &str) -> Result<bool> {
        let info = self
            .store
            .find_push_message_information(push_id)?
            .ok_or_else(|| {
                PushServerError::StorePermanent(format!(
                    "push message information {} not found",
                    push_id
                ))
            })?;
        Ok(info.is_complete())
    }

    fn count_loaded_batches(&self, tx: &mut Transaction, variant_id: &str) -> u32 {
        let mut loaded = 0;
        while tx
            .receive_no_wait(BATCH_LOADED_QUEUE, Some((PROP_VARIANT_ID, variant_id)))
            .is_some()
        {
            loaded += 1;
        }
        loaded
    }

    fn all_batches_loaded(&self, tx: &mut Transaction, variant_id: &str) -> bool {
        tx.receive_no_wait(
            ALL_BATCHES_LOADED_QUEUE,
            Some((PROP_VARIANT_ID, variant_id)),
        )
        .is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::{
        AllBatchesLoadedMarker, BatchLoadedMarker, DeliveryStatus, PushMessageInformation,
    };
    use crate::infrastructure::broker::{Broker, Envelope};
    use crate::infrastructure::persistence::InMemoryMetricsStore;
    use std::time::Duration;

    fn collector_with_store() -> (MetricsCollector, Arc<InMemoryMetricsStore>, Broker) {
        let store = Arc::new(InMemoryMetricsStore::new());
        let collector = MetricsCollector::new(
            store.clone(),
            Arc::new(MetricsCache::new()),
            LifecycleEvents::default(),
            Arc::new(PushServerMetrics::new()),
        );
        let broker = Broker::new(3, Duration::from_millis(10));
        (collector, store, broker)
    }

    fn seed_info(store: &InMemoryMetricsStore, push_id: &str, total_variants: u32) {
        store
            .create_push_message_information(&PushMessageInformation::new(
                push_id,
                "app-1",
                "{}",
                total_variants,
            ))
            .unwrap();
    }

    fn push_marker(broker: &Broker, variant_id: &str) {
        broker.send_now(
            BATCH_LOADED_QUEUE,
            Envelope::json(&BatchLoadedMarker {
                variant_id: variant_id.to_string(),
            })
            .unwrap()
            .with_str_property(PROP_VARIANT_ID, variant_id),
        );
    }

    fn push_terminal_marker(broker: &Broker, variant_id: &str) {
        broker.send_now(
            ALL_BATCHES_LOADED_QUEUE,
            Envelope::json(&AllBatchesLoadedMarker {
                variant_id: variant_id.to_string(),
            })
            .unwrap()
            .with_str_property(PROP_VARIANT_ID, variant_id),
        );
    }

    fn metric_update(push_id: &str, variant_id: &str, receivers: u64) -> VariantMetricInformation {
        let mut update = VariantMetricInformation::new(push_id, variant_id);
        update.receivers = receivers;
        update.served_batches = 1;
        update.delivery_status = DeliveryStatus::Success;
        update
    }

    #[tokio::test]
    async fn test_pending_until_terminal_marker_arrives() {
        let (collector, store, broker) = collector_with_store();
        seed_info(&store, "push-1", 1);
        push_marker(&broker, "v1");

        let mut tx = broker.begin();
        let outcome = collector
            .collect(&mut tx, metric_update("push-1", "v1", 2))
            .await
            .unwrap();
        assert_eq!(outcome, CollectOutcome::Pending);
        tx.commit();

        let info = store
            .find_push_message_information("push-1")
            .unwrap()
            .unwrap();
        assert_eq!(info.total_receivers, 2);
        assert_eq!(info.served_variants, 0);
        let variant = &info.variant_informations[0];
        assert_eq!(variant.served_batches, 1);
        assert_eq!(variant.total_batches, 1);
    }

    #[tokio::test]
    async fn test_completes_with_terminal_marker() {
        let (collector, store, broker) = collector_with_store();
        seed_info(&store, "push-1", 1);
        push_marker(&broker, "v1");
        push_terminal_marker(&broker, "v1");

        let mut tx = broker.begin();
        let outcome = collector
            .collect(&mut tx, metric_update("push-1", "v1", 3))
            .await
            .unwrap();
        assert_eq!(outcome, CollectOutcome::PushMessageCompleted);
        tx.commit();

        let info = store
            .find_push_message_information("push-1")
            .unwrap()
            .unwrap();
        assert_eq!(info.served_variants, 1);
        assert!(info.is_complete());
    }

    #[tokio::test]
    async fn test_marker_consumed_exactly_once() {
        let (collector, store, broker) = collector_with_store();
        seed_info(&store, "push-1", 1);
        push_marker(&broker, "v1");
        push_marker(&broker, "v1");
        push_terminal_marker(&broker, "v1");

        // 第一条指标清点两个标记
        let mut tx = broker.begin();
        collector
            .collect(&mut tx, metric_update("push-1", "v1", 2))
            .await
            .unwrap();
        tx.commit();

        // 第二条指标没有新标记可清点
        let mut tx = broker.begin();
        let outcome = collector
            .collect(&mut tx, metric_update("push-1", "v1", 1))
            .await
            .unwrap();
        assert_eq!(outcome, CollectOutcome::PushMessageCompleted);
        tx.commit();

        let info = store
            .find_push_message_information("push-1")
            .unwrap()
            .unwrap();
        let variant = &info.variant_informations[0];
        assert_eq!(variant.total_batches, 2);
        assert_eq!(variant.served_batches, 2);
        assert_eq!(info.total_receivers, 3);
    }

    #[tokio::test]
    async fn test_markers_of_other_variants_untouched() {
        let (collector, store, broker) = collector_with_store();
        seed_info(&store, "push-1", 2);
        push_marker(&broker, "v1");
        push_marker(&broker, "v2");
        push_terminal_marker(&broker, "v1");

        let mut tx = broker.begin();
        let outcome = collector
            .collect(&mut tx, metric_update("push-1", "v1", 1))
            .await
            .unwrap();
        assert_eq!(outcome, CollectOutcome::VariantCompleted);
        tx.commit();

        // v2 的标记仍在队列
        assert_eq!(broker.queue_depth(BATCH_LOADED_QUEUE), 1);
    }

    #[tokio::test]
    async fn test_unknown_push_id_is_permanent_error() {
        let (collector, _store, broker) = collector_with_store();
        let mut tx = broker.begin();
        let err = collector
            .collect(&mut tx, metric_update("missing", "v1", 1))
            .await
            .unwrap_err();
        assert!(!err.is_retriable());
        tx.rollback();
    }
}
