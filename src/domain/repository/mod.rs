//! 存储端口定义
//!
//! 存储读写按短事务同步执行，具体实现见 infrastructure::persistence。

use crate::domain::model::{
    Criteria, PushApplication, PushMessageInformation, Variant, VariantErrorStatus,
};
use crate::error::Result;

/// 指标查询排序方向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    Ascending,
    Descending,
}

impl SortOrder {
    /// 解析查询参数，非法值回退为升序
    pub fn from_query_param(value: Option<&str>) -> Self {
        match value {
            Some(v) if v.eq_ignore_ascii_case("desc") => SortOrder::Descending,
            _ => SortOrder::Ascending,
        }
    }
}

/// 一页设备令牌，游标为本页最后一个令牌
#[derive(Debug, Clone)]
pub struct TokenPage {
    pub tokens: Vec<String>,
    pub next_cursor: Option<String>,
    pub is_last: bool,
}

/// 推送指标存储
pub trait MetricsStore: Send + Sync {
    fn create_push_message_information(&self, info: &PushMessageInformation) -> Result<()>;

    fn find_push_message_information(&self, id: &str) -> Result<Option<PushMessageInformation>>;

    fn update_push_message_information(&self, info: &PushMessageInformation) -> Result<()>;

    /// 按应用分页查询历史推送，search 对原始消息和 ID 做全文匹配
    ///
    /// 返回命中页与过滤条件下的总数。
    fn find_all_for_application(
        &self,
        app_id: &str,
        search: Option<&str>,
        sorting: SortOrder,
        page: usize,
        per_page: usize,
    ) -> Result<(Vec<PushMessageInformation>, usize)>;

    /// 记录传输层拒绝，同一 (pushJobId, variantId) 只保留首个原因
    fn record_variant_error(&self, status: &VariantErrorStatus) -> Result<()>;
}

/// 应用、变体与设备注册的读取端口
pub trait InstallationRepository: Send + Sync {
    fn find_application(&self, app_id: &str) -> Result<Option<PushApplication>>;

    fn find_variant(&self, variant_id: &str) -> Result<Option<Variant>>;

    /// 按令牌升序分页读取符合条件的设备令牌
    ///
    /// 只读操作，游标为上一页最后一个令牌；首次调用传 None。
    /// 空变体在第一次调用就返回 `is_last = true`。
    fn find_device_tokens(
        &self,
        variant_id: &str,
        criteria: &Criteria,
        last_token: Option<&str>,
        limit: usize,
    ) -> Result<TokenPage>;

    /// 移除发送器上报的失效令牌
    fn remove_installations_for_variant_by_device_tokens(
        &self,
        variant_id: &str,
        tokens: &[String],
    ) -> Result<()>;
}
