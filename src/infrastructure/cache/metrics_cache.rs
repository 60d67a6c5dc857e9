//! 进程本地的应用级滚动计数
//!
//! 读路径直接取值，非权威数据，进程重启即清零。

use dashmap::DashMap;

pub const KIND_TOTAL: &str = "total";
pub const KIND_RECEIVERS: &str = "receivers";
pub const KIND_APP_OPENED: &str = "appOpenedCounter";

pub struct MetricsCache {
    store: DashMap<String, i64>,
}

impl MetricsCache {
    pub fn new() -> Self {
        Self {
            store: DashMap::new(),
        }
    }

    fn key(app_id: &str, kind: &str) -> String {
        format!("{}:{}", app_id, kind)
    }

    pub fn increment_total(&self, app_id: &str) {
        *self.store.entry(Self::key(app_id, KIND_TOTAL)).or_insert(0) += 1;
    }

    pub fn add_receivers(&self, app_id: &str, receivers: u64) {
        *self
            .store
            .entry(Self::key(app_id, KIND_RECEIVERS))
            .or_insert(0) += receivers as i64;
    }

    pub fn get(&self, app_id: &str, kind: &str) -> i64 {
        self.store
            .get(&Self::key(app_id, kind))
            .map(|value| *value)
            .unwrap_or(0)
    }
}

impl Default for MetricsCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate_per_application() {
        let cache = MetricsCache::new();
        cache.increment_total("app-1");
        cache.increment_total("app-1");
        cache.add_receivers("app-1", 7);
        cache.add_receivers("app-2", 3);

        assert_eq!(cache.get("app-1", KIND_TOTAL), 2);
        assert_eq!(cache.get("app-1", KIND_RECEIVERS), 7);
        assert_eq!(cache.get("app-2", KIND_RECEIVERS), 3);
        assert_eq!(cache.get("app-2", KIND_APP_OPENED), 0);
    }
}
