//! 各推送网络的发送调优配置
//!
//! 启动时构建一次，之后只读。

use std::collections::HashMap;
use std::env;

use crate::domain::model::VariantType;

/// 单个推送网络的批量参数
///
/// 批次越小故障转移越友好，但推送网络要承受更多连接；
/// 批次越大通信越高效，但要留意队列的内存上限。
#[derive(Debug, Clone, Copy)]
pub struct SenderConfiguration {
    batch_size: usize,
    batches_to_load: usize,
}

impl SenderConfiguration {
    pub fn new(batches_to_load: usize, batch_size: usize) -> Self {
        Self {
            batch_size,
            batches_to_load,
        }
    }

    /// 一个批次内投递的设备令牌数
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// 一次令牌加载事务最多产出的批次数
    ///
    /// 限制单事务规模，避免长事务并保留故障转移空间。
    pub fn batches_to_load(&self) -> usize {
        self.batches_to_load
    }

    /// 派生值：一次加载事务读取的令牌数上限
    pub fn tokens_to_load(&self) -> usize {
        self.batch_size * self.batches_to_load
    }
}

/// 按平台索引的发送配置注册表，初始化后不可变
#[derive(Debug, Clone)]
pub struct SenderConfigurationRegistry {
    configs: HashMap<VariantType, SenderConfiguration>,
}

impl SenderConfigurationRegistry {
    /// 平台默认值，可用 PUSH_SENDER_<PLATFORM>_BATCH_SIZE /
    /// PUSH_SENDER_<PLATFORM>_BATCHES_TO_LOAD 覆盖
    pub fn from_env() -> Self {
        let mut configs = HashMap::new();
        for variant_type in VariantType::ALL {
            let default = Self::platform_default(variant_type);
            let prefix = variant_type.as_str().to_uppercase();

            let batch_size = env::var(format!("PUSH_SENDER_{}_BATCH_SIZE", prefix))
                .ok()
                .and_then(|v| v.parse::<usize>().ok())
                .filter(|v| *v > 0)
                .unwrap_or_else(|| default.batch_size());

            let batches_to_load = env::var(format!("PUSH_SENDER_{}_BATCHES_TO_LOAD", prefix))
                .ok()
                .and_then(|v| v.parse::<usize>().ok())
                .filter(|v| *v > 0)
                .unwrap_or_else(|| default.batches_to_load());

            configs.insert(
                variant_type,
                SenderConfiguration::new(batches_to_load, batch_size),
            );
        }
        Self { configs }
    }

    // APNs 走 HTTP/2 多路复用，单批可以很大；其余网络保守取 1000
    fn platform_default(variant_type: VariantType) -> SenderConfiguration {
        match variant_type {
            VariantType::Ios => SenderConfiguration::new(1, 10_000),
            VariantType::Android => SenderConfiguration::new(10, 1_000),
            VariantType::WebPush => SenderConfiguration::new(10, 100),
            VariantType::Adm
            | VariantType::SimplePush
            | VariantType::Windows => SenderConfiguration::new(10, 1_000),
        }
    }

    pub fn get(&self, variant_type: VariantType) -> SenderConfiguration {
        self.configs
            .get(&variant_type)
            .copied()
            .unwrap_or_else(|| Self::platform_default(variant_type))
    }

    /// 测试与嵌入场景：所有平台统一批量参数
    pub fn uniform(batches_to_load: usize, batch_size: usize) -> Self {
        let configs = VariantType::ALL
            .into_iter()
            .map(|t| (t, SenderConfiguration::new(batches_to_load, batch_size)))
            .collect();
        Self { configs }
    }
}

impl Default for SenderConfigurationRegistry {
    fn default() -> Self {
        Self::from_env()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokens_to_load_is_derived() {
        let config = SenderConfiguration::new(10, 1_000);
        assert_eq!(config.tokens_to_load(), 10_000);
    }

    #[test]
    fn test_platform_defaults() {
        let registry = SenderConfigurationRegistry::uniform(1, 2);
        assert_eq!(registry.get(VariantType::Android).batch_size(), 2);
        assert_eq!(registry.get(VariantType::Android).tokens_to_load(), 2);

        let defaults = SenderConfigurationRegistry::from_env();
        assert_eq!(defaults.get(VariantType::Ios).batches_to_load(), 1);
        assert_eq!(defaults.get(VariantType::Ios).batch_size(), 10_000);
        assert_eq!(defaults.get(VariantType::Android).batch_size(), 1_000);
    }
}
