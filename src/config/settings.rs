//! 推送服务配置模块

use std::env;

use crate::config::sender_configuration::SenderConfigurationRegistry;

/// 服务进程配置，环境变量覆盖默认值
#[derive(Debug, Clone)]
pub struct PushServerConfig {
    pub http_addr: String,
    // 各阶段工作协程数
    pub loader_workers: usize,
    pub dispatcher_workers: usize,
    pub metrics_workers: usize,
    pub trigger_workers: usize,
    // 队列行为
    pub redelivery_delay_ms: u64,
    pub trigger_max_redeliveries: u32,
    pub receive_timeout_ms: u64,
    // 各平台批量参数
    pub sender_configurations: SenderConfigurationRegistry,
}

impl PushServerConfig {
    pub fn from_env() -> Self {
        let http_addr =
            env::var("PUSH_SERVER_HTTP_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());

        let loader_workers = env::var("PUSH_SERVER_LOADER_WORKERS")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .filter(|v| *v > 0)
            .unwrap_or(2);

        let dispatcher_workers = env::var("PUSH_SERVER_DISPATCHER_WORKERS")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .filter(|v| *v > 0)
            .unwrap_or(4);

        let metrics_workers = env::var("PUSH_SERVER_METRICS_WORKERS")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .filter(|v| *v > 0)
            .unwrap_or(2);

        let trigger_workers = env::var("PUSH_SERVER_TRIGGER_WORKERS")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .filter(|v| *v > 0)
            .unwrap_or(1);

        let redelivery_delay_ms = env::var("PUSH_SERVER_REDELIVERY_DELAY_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(1_000);

        let trigger_max_redeliveries = env::var("PUSH_SERVER_TRIGGER_MAX_REDELIVERIES")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(10);

        let receive_timeout_ms = env::var("PUSH_SERVER_RECEIVE_TIMEOUT_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(250);

        Self {
            http_addr,
            loader_workers,
            dispatcher_workers,
            metrics_workers,
            trigger_workers,
            redelivery_delay_ms,
            trigger_max_redeliveries,
            receive_timeout_ms,
            sender_configurations: SenderConfigurationRegistry::from_env(),
        }
    }
}

impl Default for PushServerConfig {
    fn default() -> Self {
        Self {
            http_addr: "0.0.0.0:8080".to_string(),
            loader_workers: 2,
            dispatcher_workers: 4,
            metrics_workers: 2,
            trigger_workers: 1,
            redelivery_delay_ms: 1_000,
            trigger_max_redeliveries: 10,
            receive_timeout_ms: 250,
            sender_configurations: SenderConfigurationRegistry::uniform(10, 1_000),
        }
    }
}
