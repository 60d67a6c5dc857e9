use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};

use crate::application::Dispatcher;
use crate::domain::model::{BatchJob, VariantType};
use crate::infrastructure::broker::{batch_queue, Broker};
use crate::interface::consumers::route_to_dead_letter;

/// 批次任务消费者，同步等待发送器回调后提交
pub struct BatchJobConsumer {
    broker: Broker,
    dispatcher: Arc<Dispatcher>,
    running: Arc<AtomicBool>,
    receive_timeout: Duration,
}

impl BatchJobConsumer {
    pub fn new(
        broker: Broker,
        dispatcher: Arc<Dispatcher>,
        running: Arc<AtomicBool>,
        receive_timeout: Duration,
    ) -> Self {
        Self {
            broker,
            dispatcher,
            running,
            receive_timeout,
        }
    }

    pub async fn run(&self, variant_type: VariantType) {
        let queue = batch_queue(variant_type);
        info!(queue = %queue, "batch job consumer started");

        while self.running.load(Ordering::Relaxed) {
            let mut tx = self.broker.begin();
            let Some(envelope) = tx.receive(&queue, None, self.receive_timeout).await else {
                tx.commit();
                continue;
            };

            match envelope.decode::<BatchJob>() {
                Ok(batch) => match self.dispatcher.dispatch(&mut tx, &batch).await {
                    Ok(()) => tx.commit(),
                    Err(err) if err.is_retriable() => {
                        error!(error = %err, queue = %queue, "batch dispatch failed, rolling back");
                        tx.rollback();
                    }
                    Err(err) => {
                        error!(error = %err, queue = %queue, "batch dispatch failed permanently");
                        route_to_dead_letter(&mut tx, &queue, envelope, &err.to_string());
                        tx.commit();
                    }
                },
                Err(err) => {
                    error!(error = %err, queue = %queue, "undecodable batch job");
                    route_to_dead_letter(&mut tx, &queue, envelope, &err.to_string());
                    tx.commit();
                }
            }
        }

        info!(queue = %queue, "batch job consumer stopped");
    }
}
