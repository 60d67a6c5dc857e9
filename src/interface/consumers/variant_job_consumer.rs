use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};

use crate::application::TokenLoader;
use crate::domain::model::{VariantJob, VariantType};
use crate::infrastructure::broker::{variant_job_queue, Broker};
use crate::interface::consumers::route_to_dead_letter;

/// 变体加载任务消费者，每个平台队列一组
pub struct VariantJobConsumer {
    broker: Broker,
    loader: Arc<TokenLoader>,
    running: Arc<AtomicBool>,
    receive_timeout: Duration,
}

impl VariantJobConsumer {
    pub fn new(
        broker: Broker,
        loader: Arc<TokenLoader>,
        running: Arc<AtomicBool>,
        receive_timeout: Duration,
    ) -> Self {
        Self {
            broker,
            loader,
            running,
            receive_timeout,
        }
    }

    pub async fn run(&self, variant_type: VariantType) {
        let queue = variant_job_queue(variant_type);
        info!(queue = %queue, "variant job consumer started");

        while self.running.load(Ordering::Relaxed) {
            let mut tx = self.broker.begin();
            let Some(envelope) = tx.receive(&queue, None, self.receive_timeout).await else {
                tx.commit();
                continue;
            };

            match envelope.decode::<VariantJob>() {
                Ok(job) => match self.loader.load_and_queue_batches(&mut tx, &job) {
                    Ok(()) => tx.commit(),
                    Err(err) if err.is_retriable() => {
                        error!(error = %err, queue = %queue, "token loading failed, rolling back");
                        tx.rollback();
                    }
                    Err(err) => {
                        error!(error = %err, queue = %queue, "token loading failed permanently");
                        route_to_dead_letter(&mut tx, &queue, envelope, &err.to_string());
                        tx.commit();
                    }
                },
                Err(err) => {
                    error!(error = %err, queue = %queue, "undecodable variant job");
                    route_to_dead_letter(&mut tx, &queue, envelope, &err.to_string());
                    tx.commit();
                }
            }
        }

        info!(queue = %queue, "variant job consumer stopped");
    }
}
