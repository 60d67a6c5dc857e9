//! Prometheus 指标收集模块

use prometheus::{IntCounter, Registry};

/// 推送服务运行指标
///
/// 每个服务实例持有独立的注册表，由 HTTP 接口暴露。
pub struct PushServerMetrics {
    registry: Registry,
    pub jobs_submitted_total: IntCounter,
    pub batches_dispatched_total: IntCounter,
    pub batches_failed_total: IntCounter,
    pub variants_completed_total: IntCounter,
    pub push_messages_completed_total: IntCounter,
    pub trigger_deliveries_total: IntCounter,
    pub dead_letters_total: IntCounter,
}

impl PushServerMetrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let jobs_submitted_total = IntCounter::new(
            "push_jobs_submitted_total",
            "Total number of submitted push jobs",
        )
        .expect("Failed to create push_jobs_submitted_total metric");

        let batches_dispatched_total = IntCounter::new(
            "push_batches_dispatched_total",
            "Total number of token batches handed to a sender",
        )
        .expect("Failed to create push_batches_dispatched_total metric");

        let batches_failed_total = IntCounter::new(
            "push_batches_failed_total",
            "Total number of token batches a sender reported as failed",
        )
        .expect("Failed to create push_batches_failed_total metric");

        let variants_completed_total = IntCounter::new(
            "push_variants_completed_total",
            "Total number of completed variants",
        )
        .expect("Failed to create push_variants_completed_total metric");

        let push_messages_completed_total = IntCounter::new(
            "push_messages_completed_total",
            "Total number of completed push jobs",
        )
        .expect("Failed to create push_messages_completed_total metric");

        let trigger_deliveries_total = IntCounter::new(
            "push_trigger_deliveries_total",
            "Total number of metric collection trigger deliveries",
        )
        .expect("Failed to create push_trigger_deliveries_total metric");

        let dead_letters_total = IntCounter::new(
            "push_dead_letters_total",
            "Total number of messages routed to the dead letter queue",
        )
        .expect("Failed to create push_dead_letters_total metric");

        for collector in [
            &jobs_submitted_total,
            &batches_dispatched_total,
            &batches_failed_total,
            &variants_completed_total,
            &push_messages_completed_total,
            &trigger_deliveries_total,
            &dead_letters_total,
        ] {
            registry
                .register(Box::new(collector.clone()))
                .expect("Failed to register metric");
        }

        Self {
            registry,
            jobs_submitted_total,
            batches_dispatched_total,
            batches_failed_total,
            variants_completed_total,
            push_messages_completed_total,
            trigger_deliveries_total,
            dead_letters_total,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

impl Default for PushServerMetrics {
    fn default() -> Self {
        Self::new()
    }
}
