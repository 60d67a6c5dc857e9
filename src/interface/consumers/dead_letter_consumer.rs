use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::infrastructure::broker::{
    Broker, DEAD_LETTER_QUEUE, PROP_FAILURE_REASON, PROP_ORIGIN_QUEUE, PROP_REDELIVERY_COUNT,
};
use crate::metrics::PushServerMetrics;

/// 死信日志消费者，只记录不恢复
pub struct DeadLetterConsumer {
    broker: Broker,
    metrics: Arc<PushServerMetrics>,
    running: Arc<AtomicBool>,
    receive_timeout: Duration,
}

impl DeadLetterConsumer {
    pub fn new(
        broker: Broker,
        metrics: Arc<PushServerMetrics>,
        running: Arc<AtomicBool>,
        receive_timeout: Duration,
    ) -> Self {
        Self {
            broker,
            metrics,
            running,
            receive_timeout,
        }
    }

    pub async fn run(&self) {
        info!("dead letter consumer started");

        while self.running.load(Ordering::Relaxed) {
            let mut tx = self.broker.begin();
            let Some(envelope) = tx
                .receive(DEAD_LETTER_QUEUE, None, self.receive_timeout)
                .await
            else {
                tx.commit();
                continue;
            };

            warn!(
                origin_queue = envelope.str_property(PROP_ORIGIN_QUEUE).unwrap_or("unknown"),
                failure_reason = envelope.str_property(PROP_FAILURE_REASON).unwrap_or(""),
                redeliveries = envelope.long_property(PROP_REDELIVERY_COUNT).unwrap_or(0),
                "dead letter received"
            );
            self.metrics.dead_letters_total.inc();
            tx.commit();
        }

        info!("dead letter consumer stopped");
    }
}
