use serde::{Deserialize, Serialize};

/// 变体级加载任务，由任务拆分器投递、令牌加载器消费
///
/// `last_token` 是上一窗口的分页游标，None 表示从头加载。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariantJob {
    pub push_message_information_id: String,
    pub variant_id: String,
    pub serialized_message: String,
    #[serde(default)]
    pub last_token: Option<String>,
}

impl VariantJob {
    pub fn seed(
        push_id: impl Into<String>,
        variant_id: impl Into<String>,
        serialized_message: impl Into<String>,
    ) -> Self {
        Self {
            push_message_information_id: push_id.into(),
            variant_id: variant_id.into(),
            serialized_message: serialized_message.into(),
            last_token: None,
        }
    }

    pub fn next_window(&self, cursor: String) -> Self {
        Self {
            push_message_information_id: self.push_message_information_id.clone(),
            variant_id: self.variant_id.clone(),
            serialized_message: self.serialized_message.clone(),
            last_token: Some(cursor),
        }
    }

    /// 队列幂等键，保证同一推送任务的种子只入队一次
    pub fn seed_duplicate_id(push_id: &str, variant_id: &str) -> String {
        format!("{}:{}:seed", push_id, variant_id)
    }
}

/// 一次发送器调用的工作单元
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchJob {
    pub push_message_information_id: String,
    pub variant_id: String,
    pub serialized_message: String,
    pub tokens: Vec<String>,
    #[serde(default)]
    pub is_last_batch: bool,
}

/// 每提交一个批次就投递一个标记，指标收集器按 variantID 选择器清点
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchLoadedMarker {
    pub variant_id: String,
}

/// 变体的全部批次已加载完毕的终结标记
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllBatchesLoadedMarker {
    pub variant_id: String,
}

/// 触发指标收集的循环消息，未收敛时回滚等待重投递
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerMetricCollection {
    pub push_message_information_id: String,
}

impl TriggerMetricCollection {
    pub fn new(push_id: impl Into<String>) -> Self {
        Self {
            push_message_information_id: push_id.into(),
        }
    }
}
