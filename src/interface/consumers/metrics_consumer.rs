use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info};

use crate::application::MetricsCollector;
use crate::domain::model::VariantMetricInformation;
use crate::infrastructure::broker::{Broker, METRICS_QUEUE};
use crate::interface::consumers::route_to_dead_letter;

/// 变体指标消费者，驱动收集器折叠计数
pub struct MetricsConsumer {
    broker: Broker,
    collector: Arc<MetricsCollector>,
    running: Arc<AtomicBool>,
    receive_timeout: Duration,
}

impl MetricsConsumer {
    pub fn new(
        broker: Broker,
        collector: Arc<MetricsCollector>,
        running: Arc<AtomicBool>,
        receive_timeout: Duration,
    ) -> Self {
        Self {
            broker,
            collector,
            running,
            receive_timeout,
        }
    }

    pub async fn run(&self) {
        info!("metrics consumer started");

        while self.running.load(Ordering::Relaxed) {
            let mut tx = self.broker.begin();
            let Some(envelope) = tx
                .receive(METRICS_QUEUE, None, self.receive_timeout)
                .await
            else {
                tx.commit();
                continue;
            };

            match envelope.decode::<VariantMetricInformation>() {
                Ok(update) => match self.collector.collect(&mut tx, update).await {
                    Ok(outcome) => {
                        debug!(?outcome, "variant metric collected");
                        tx.commit();
                    }
                    Err(err) if err.is_retriable() => {
                        error!(error = %err, "metric collection failed, rolling back");
                        tx.rollback();
                    }
                    Err(err) => {
                        error!(error = %err, "metric collection failed permanently");
                        route_to_dead_letter(&mut tx, METRICS_QUEUE, envelope, &err.to_string());
                        tx.commit();
                    }
                },
                Err(err) => {
                    error!(error = %err, "undecodable variant metric");
                    route_to_dead_letter(&mut tx, METRICS_QUEUE, envelope, &err.to_string());
                    tx.commit();
                }
            }
        }

        info!("metrics consumer stopped");
    }
}
