//! 统一异常处理模块

use thiserror::Error;

/// 推送服务错误类型
#[derive(Debug, Error)]
pub enum PushServerError {
    /// 配置错误
    #[error("Configuration error: {0}")]
    Config(String),

    /// 存储瞬时错误，事务回滚后由消息重投递重试
    #[error("Transient store error: {0}")]
    StoreTransient(String),

    /// 存储永久性错误，消息进入死信队列
    #[error("Permanent store error: {0}")]
    StorePermanent(String),

    /// 队列错误
    #[error("Broker error: {0}")]
    Broker(String),

    /// 序列化错误
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// 应用不存在
    #[error("Unknown push application: {0}")]
    UnknownApplication(String),

    /// 变体不存在
    #[error("Unknown variant: {0}")]
    UnknownVariant(String),

    /// 未注册对应平台的推送发送器
    #[error("No sender registered for platform: {0}")]
    NoSenderForPlatform(String),
}

impl PushServerError {
    /// 瞬时错误回滚事务等待重投递，其余错误直接进入死信处理
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            PushServerError::StoreTransient(_) | PushServerError::Broker(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, PushServerError>;
