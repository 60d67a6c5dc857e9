//! 队列拓扑定义
//!
//! 变体加载与批次投递按平台分队列，指标相关队列全局共享。

use crate::domain::model::VariantType;

pub const BATCH_LOADED_QUEUE: &str = "BatchLoadedQueue";
pub const ALL_BATCHES_LOADED_QUEUE: &str = "AllBatchesLoadedQueue";
pub const METRICS_QUEUE: &str = "MetricsQueue";
pub const TRIGGER_QUEUE: &str = "TriggerQueue";
pub const DEAD_LETTER_QUEUE: &str = "DeadLetterQueue";

/// 选择器使用的消息属性键
pub const PROP_VARIANT_ID: &str = "variantID";

pub fn variant_job_queue(variant_type: VariantType) -> String {
    format!("VariantJobQueue.{}", variant_type.as_str())
}

pub fn batch_queue(variant_type: VariantType) -> String {
    format!("BatchQueue.{}", variant_type.as_str())
}
