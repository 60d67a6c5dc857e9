//! 服务装配与生命周期

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::info;

use crate::application::{Dispatcher, JobSplitter, MetricsCollector, SubmissionContext, TokenLoader};
use crate::config::PushServerConfig;
use crate::domain::event::LifecycleEvents;
use crate::domain::model::{UnifiedPushMessage, VariantType};
use crate::domain::repository::{InstallationRepository, MetricsStore};
use crate::error::Result;
use crate::infrastructure::broker::Broker;
use crate::infrastructure::cache::MetricsCache;
use crate::infrastructure::persistence::{InMemoryInstallationStore, InMemoryMetricsStore};
use crate::infrastructure::sender::SenderRegistry;
use crate::interface::consumers::{
    BatchJobConsumer, DeadLetterConsumer, MetricsConsumer, TriggerConsumer, VariantJobConsumer,
};
use crate::interface::http::{self, HttpState};
use crate::metrics::PushServerMetrics;

pub struct PushServer {
    config: Arc<PushServerConfig>,
    broker: Broker,
    store: Arc<dyn MetricsStore>,
    installations: Arc<dyn InstallationRepository>,
    cache: Arc<MetricsCache>,
    metrics: Arc<PushServerMetrics>,
    events: LifecycleEvents,
    splitter: Arc<JobSplitter>,
    loader: Arc<TokenLoader>,
    dispatcher: Arc<Dispatcher>,
    collector: Arc<MetricsCollector>,
    running: Arc<AtomicBool>,
}

impl PushServer {
    /// 默认装配：进程内存储与日志发送器
    pub fn new(config: PushServerConfig) -> Self {
        Self::with_components(
            config,
            Arc::new(InMemoryMetricsStore::new()),
            Arc::new(InMemoryInstallationStore::new()),
            SenderRegistry::logging_defaults(),
        )
    }

    /// 注入存储与发送器的装配入口
    pub fn with_components(
        config: PushServerConfig,
        store: Arc<dyn MetricsStore>,
        installations: Arc<dyn InstallationRepository>,
        senders: SenderRegistry,
    ) -> Self {
        let config = Arc::new(config);
        let redelivery_delay = Duration::from_millis(config.redelivery_delay_ms);
        let broker = Broker::new(config.trigger_max_redeliveries, redelivery_delay);
        let cache = Arc::new(MetricsCache::new());
        let metrics = Arc::new(PushServerMetrics::new());
        let events = LifecycleEvents::default();
        let senders = Arc::new(senders);

        let splitter = Arc::new(JobSplitter::new(
            broker.clone(),
            store.clone(),
            installations.clone(),
            cache.clone(),
            events.clone(),
            metrics.clone(),
        ));
        let loader = Arc::new(TokenLoader::new(
            installations.clone(),
            config.sender_configurations.clone(),
            redelivery_delay,
        ));
        let dispatcher = Arc::new(Dispatcher::new(
            installations.clone(),
            store.clone(),
            senders,
            metrics.clone(),
        ));
        let collector = Arc::new(MetricsCollector::new(
            store.clone(),
            cache.clone(),
            events.clone(),
            metrics.clone(),
        ));

        Self {
            config,
            broker,
            store,
            installations,
            cache,
            metrics,
            events,
            splitter,
            loader,
            dispatcher,
            collector,
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn config(&self) -> &PushServerConfig {
        &self.config
    }

    pub fn broker(&self) -> &Broker {
        &self.broker
    }

    pub fn store(&self) -> &Arc<dyn MetricsStore> {
        &self.store
    }

    pub fn installations(&self) -> &Arc<dyn InstallationRepository> {
        &self.installations
    }

    pub fn cache(&self) -> &Arc<MetricsCache> {
        &self.cache
    }

    pub fn metrics(&self) -> &Arc<PushServerMetrics> {
        &self.metrics
    }

    pub fn events(&self) -> &LifecycleEvents {
        &self.events
    }

    /// 提交一条推送请求，返回推送任务 ID
    pub fn submit(
        &self,
        app_id: &str,
        message: &UnifiedPushMessage,
        context: SubmissionContext,
    ) -> Result<String> {
        self.splitter.submit(app_id, message, context)
    }

    /// 启动全部消费工作协程
    pub fn start_workers(&self) -> Vec<JoinHandle<()>> {
        let receive_timeout = Duration::from_millis(self.config.receive_timeout_ms);
        let mut handles = Vec::new();

        let variant_job_consumer = Arc::new(VariantJobConsumer::new(
            self.broker.clone(),
            self.loader.clone(),
            self.running.clone(),
            receive_timeout,
        ));
        let batch_job_consumer = Arc::new(BatchJobConsumer::new(
            self.broker.clone(),
            self.dispatcher.clone(),
            self.running.clone(),
            receive_timeout,
        ));
        for variant_type in VariantType::ALL {
            for _ in 0..self.config.loader_workers {
                let consumer = variant_job_consumer.clone();
                handles.push(tokio::spawn(async move {
                    consumer.run(variant_type).await;
                }));
            }
            for _ in 0..self.config.dispatcher_workers {
                let consumer = batch_job_consumer.clone();
                handles.push(tokio::spawn(async move {
                    consumer.run(variant_type).await;
                }));
            }
        }

        let metrics_consumer = Arc::new(MetricsConsumer::new(
            self.broker.clone(),
            self.collector.clone(),
            self.running.clone(),
            receive_timeout,
        ));
        for _ in 0..self.config.metrics_workers {
            let consumer = metrics_consumer.clone();
            handles.push(tokio::spawn(async move {
                consumer.run().await;
            }));
        }

        let trigger_consumer = Arc::new(TriggerConsumer::new(
            self.broker.clone(),
            self.collector.clone(),
            self.metrics.clone(),
            self.running.clone(),
            receive_timeout,
        ));
        for _ in 0..self.config.trigger_workers {
            let consumer = trigger_consumer.clone();
            handles.push(tokio::spawn(async move {
                consumer.run().await;
            }));
        }

        let dead_letter_consumer = Arc::new(DeadLetterConsumer::new(
            self.broker.clone(),
            self.metrics.clone(),
            self.running.clone(),
            receive_timeout,
        ));
        handles.push(tokio::spawn(async move {
            dead_letter_consumer.run().await;
        }));

        handles
    }

    /// 通知消费循环在当前消息处理完后停止
    pub fn shutdown(&self) {
        self.running.store(false, Ordering::Relaxed);
    }

    /// 启动工作协程与 HTTP 接口，直到收到停机信号
    pub async fn run(&self) -> Result<()> {
        let handles = self.start_workers();

        let http_state = HttpState {
            store: self.store.clone(),
            installations: self.installations.clone(),
            cache: self.cache.clone(),
            metrics: self.metrics.clone(),
        };
        let http_addr = self.config.http_addr.clone();
        tokio::spawn(async move {
            if let Err(err) = http::serve(&http_addr, http_state).await {
                tracing::error!(error = %err, "http interface terminated");
            }
        });

        info!(
            http_addr = %self.config.http_addr,
            "Push Server started, consuming queues"
        );

        tokio::signal::ctrl_c()
            .await
            .map_err(|err| crate::error::PushServerError::Config(err.to_string()))?;
        info!("shutdown signal received, draining workers");
        self.shutdown();
        for handle in handles {
            let _ = handle.await;
        }
        Ok(())
    }
}
