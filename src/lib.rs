//! 统一推送分发核心
//!
//! 一条逻辑推送请求经任务拆分、令牌批量加载、平台投递与指标折叠，
//! 收敛为单个任务级聚合文档。各阶段通过带事务语义的队列衔接。

pub mod application;
pub mod config;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod interface;
pub mod metrics;
pub mod server;

pub use error::{PushServerError, Result};
pub use server::PushServer;
