pub mod metrics_cache;

pub use metrics_cache::{MetricsCache, KIND_APP_OPENED, KIND_RECEIVERS, KIND_TOTAL};
