//! 队列消费循环
//!
//! 每个工作协程一次处理一条消息：事务内接收、调用应用服务、提交或回滚。
//! 瞬时错误回滚等待重投递，毒消息与永久性错误直接转死信队列。

pub mod dead_letter_consumer;
pub mod dispatcher_consumer;
pub mod metrics_consumer;
pub mod trigger_consumer;
pub mod variant_job_consumer;

pub use dead_letter_consumer::DeadLetterConsumer;
pub use dispatcher_consumer::BatchJobConsumer;
pub use metrics_consumer::MetricsConsumer;
pub use trigger_consumer::TriggerConsumer;
pub use variant_job_consumer::VariantJobConsumer;

use crate::infrastructure::broker::{
    Envelope, Transaction, DEAD_LETTER_QUEUE, PROP_FAILURE_REASON, PROP_ORIGIN_QUEUE,
};

/// 毒消息或永久性错误：附上来源与原因后转死信，由调用方提交事务
pub(crate) fn route_to_dead_letter(
    tx: &mut Transaction,
    origin_queue: &str,
    envelope: Envelope,
    reason: &str,
) {
    tx.send(
        DEAD_LETTER_QUEUE,
        envelope
            .with_str_property(PROP_ORIGIN_QUEUE, origin_queue)
            .with_str_property(PROP_FAILURE_REASON, reason),
    );
}
