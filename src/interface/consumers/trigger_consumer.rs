use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info};

use crate::application::MetricsCollector;
use crate::domain::model::TriggerMetricCollection;
use crate::infrastructure::broker::{Broker, TRIGGER_QUEUE};
use crate::interface::consumers::route_to_dead_letter;
use crate::metrics::PushServerMetrics;

/// 触发循环消费者
///
/// 每条触发消息在独立事务里判定任务是否收敛：收敛则提交吞掉触发，
/// 否则回滚，由队列按重投递延迟再次送达；超过最大重投递次数的
/// 触发由队列转入死信，任务停留在可观测的未完成状态。
pub struct TriggerConsumer {
    broker: Broker,
    collector: Arc<MetricsCollector>,
    metrics: Arc<PushServerMetrics>,
    running: Arc<AtomicBool>,
    receive_timeout: Duration,
}

impl TriggerConsumer {
    pub fn new(
        broker: Broker,
        collector: Arc<MetricsCollector>,
        metrics: Arc<PushServerMetrics>,
        running: Arc<AtomicBool>,
        receive_timeout: Duration,
    ) -> Self {
        Self {
            broker,
            collector,
            metrics,
            running,
            receive_timeout,
        }
    }

    pub async fn run(&self) {
        info!("trigger consumer started");

        while self.running.load(Ordering::Relaxed) {
            let mut tx = self.broker.begin();
            let Some(envelope) = tx
                .receive(TRIGGER_QUEUE, None, self.receive_timeout)
                .await
            else {
                tx.commit();
                continue;
            };
            self.metrics.trigger_deliveries_total.inc();

            match envelope.decode::<TriggerMetricCollection>() {
                Ok(trigger) => {
                    let push_id = trigger.push_message_information_id;
                    match self.collector.is_push_complete(&push_id) {
                        Ok(true) => {
                            debug!(push_id = %push_id, "push message converged, trigger consumed");
                            tx.commit();
                        }
                        Ok(false) => {
                            debug!(push_id = %push_id, "not yet converged, awaiting redelivery");
                            tx.rollback();
                        }
                        Err(err) if err.is_retriable() => {
                            error!(error = %err, push_id = %push_id, "completion check failed");
                            tx.rollback();
                        }
                        Err(err) => {
                            error!(error = %err, push_id = %push_id, "trigger failed permanently");
                            route_to_dead_letter(&mut tx, TRIGGER_QUEUE, envelope, &err.to_string());
                            tx.commit();
                        }
                    }
                }
                Err(err) => {
                    error!(error = %err, "undecodable trigger");
                    route_to_dead_letter(&mut tx, TRIGGER_QUEUE, envelope, &err.to_string());
                    tx.commit();
                }
            }
        }

        info!("trigger consumer stopped");
    }
}
