use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// 变体投递状态，三值格：未知 / 成功 / 失败
///
/// 合并时失败不可逆：任何一个批次失败后整个变体保持失败。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DeliveryStatus {
    #[default]
    Unset,
    Success,
    Failed,
}

impl DeliveryStatus {
    /// 格上的交运算：Unset 吸收对方，Failed 粘滞
    pub fn meet(self, other: DeliveryStatus) -> DeliveryStatus {
        match (self, other) {
            (DeliveryStatus::Unset, status) => status,
            (status, DeliveryStatus::Unset) => status,
            (DeliveryStatus::Failed, _) | (_, DeliveryStatus::Failed) => DeliveryStatus::Failed,
            (DeliveryStatus::Success, DeliveryStatus::Success) => DeliveryStatus::Success,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, DeliveryStatus::Failed)
    }
}

// 线上格式沿用 null / true / false
impl Serialize for DeliveryStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            DeliveryStatus::Unset => serializer.serialize_none(),
            DeliveryStatus::Success => serializer.serialize_bool(true),
            DeliveryStatus::Failed => serializer.serialize_bool(false),
        }
    }
}

impl<'de> Deserialize<'de> for DeliveryStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Option::<bool>::deserialize(deserializer)?;
        Ok(match value {
            None => DeliveryStatus::Unset,
            Some(true) => DeliveryStatus::Success,
            Some(false) => DeliveryStatus::Failed,
        })
    }
}

/// 单个变体的聚合计数
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariantMetricInformation {
    pub push_message_information_id: String,
    pub variant_id: String,
    #[serde(default)]
    pub receivers: u64,
    #[serde(default)]
    pub served_batches: u32,
    #[serde(default)]
    pub total_batches: u32,
    #[serde(default)]
    pub delivery_status: DeliveryStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl VariantMetricInformation {
    pub fn new(push_id: impl Into<String>, variant_id: impl Into<String>) -> Self {
        Self {
            push_message_information_id: push_id.into(),
            variant_id: variant_id.into(),
            receivers: 0,
            served_batches: 0,
            total_batches: 0,
            delivery_status: DeliveryStatus::Unset,
            reason: None,
        }
    }

    /// 合并同一变体的增量计数，保留首个错误原因
    pub fn merge(&mut self, update: &VariantMetricInformation) {
        self.receivers += update.receivers;
        self.served_batches += update.served_batches;
        self.total_batches += update.total_batches;
        self.delivery_status = self.delivery_status.meet(update.delivery_status);
        if self.reason.is_none() {
            self.reason = update.reason.clone();
        }
    }

    pub fn is_complete(&self) -> bool {
        self.served_batches == self.total_batches
    }
}

/// 一次推送任务的持久化聚合结果
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushMessageInformation {
    pub id: String,
    pub push_application_id: String,
    pub raw_json_message: String,
    pub submit_date: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_identifier: Option<String>,
    #[serde(default)]
    pub total_receivers: u64,
    #[serde(default)]
    pub served_variants: u32,
    #[serde(default)]
    pub total_variants: u32,
    #[serde(default)]
    pub variant_informations: Vec<VariantMetricInformation>,
}

impl PushMessageInformation {
    pub fn new(
        id: impl Into<String>,
        push_application_id: impl Into<String>,
        raw_json_message: impl Into<String>,
        total_variants: u32,
    ) -> Self {
        Self {
            id: id.into(),
            push_application_id: push_application_id.into(),
            raw_json_message: raw_json_message.into(),
            submit_date: Utc::now(),
            ip_address: None,
            client_identifier: None,
            total_receivers: 0,
            served_variants: 0,
            total_variants,
            variant_informations: Vec::new(),
        }
    }

    pub fn variant_information_mut(
        &mut self,
        variant_id: &str,
    ) -> Option<&mut VariantMetricInformation> {
        self.variant_informations
            .iter_mut()
            .find(|metric| metric.variant_id == variant_id)
    }

    pub fn is_complete(&self) -> bool {
        self.served_variants == self.total_variants
    }
}

/// 一次传输层拒绝的记录，按 (pushJobId, variantId) 作为复合键
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariantErrorStatus {
    pub push_job_id: String,
    pub variant_id: String,
    pub error_reason: String,
}

impl VariantErrorStatus {
    pub fn new(
        push_job_id: impl Into<String>,
        variant_id: impl Into<String>,
        error_reason: impl Into<String>,
    ) -> Self {
        Self {
            push_job_id: push_job_id.into(),
            variant_id: variant_id.into(),
            error_reason: error_reason.into(),
        }
    }

    pub fn key(&self) -> String {
        format!("{}:{}", self.push_job_id, self.variant_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delivery_status_meet_is_sticky_false() {
        assert_eq!(
            DeliveryStatus::Unset.meet(DeliveryStatus::Success),
            DeliveryStatus::Success
        );
        assert_eq!(
            DeliveryStatus::Success.meet(DeliveryStatus::Failed),
            DeliveryStatus::Failed
        );
        assert_eq!(
            DeliveryStatus::Failed.meet(DeliveryStatus::Success),
            DeliveryStatus::Failed
        );
        assert_eq!(
            DeliveryStatus::Failed.meet(DeliveryStatus::Unset),
            DeliveryStatus::Failed
        );
    }

    #[test]
    fn test_delivery_status_wire_format() {
        assert_eq!(
            serde_json::to_string(&DeliveryStatus::Unset).unwrap(),
            "null"
        );
        assert_eq!(
            serde_json::to_string(&DeliveryStatus::Success).unwrap(),
            "true"
        );
        assert_eq!(
            serde_json::to_string(&DeliveryStatus::Failed).unwrap(),
            "false"
        );
        let parsed: DeliveryStatus = serde_json::from_str("false").unwrap();
        assert_eq!(parsed, DeliveryStatus::Failed);
    }

    #[test]
    fn test_merge_accumulates_counters() {
        let mut existing = VariantMetricInformation::new("push-1", "variant-1");
        existing.receivers = 2;
        existing.served_batches = 1;
        existing.total_batches = 2;
        existing.delivery_status = DeliveryStatus::Success;

        let mut update = VariantMetricInformation::new("push-1", "variant-1");
        update.receivers = 1;
        update.served_batches = 1;
        update.total_batches = 0;
        update.delivery_status = DeliveryStatus::Failed;
        update.reason = Some("Down".to_string());

        existing.merge(&update);
        assert_eq!(existing.receivers, 3);
        assert_eq!(existing.served_batches, 2);
        assert_eq!(existing.total_batches, 2);
        assert_eq!(existing.delivery_status, DeliveryStatus::Failed);
        assert_eq!(existing.reason.as_deref(), Some("Down"));
    }

    #[test]
    fn test_merge_keeps_first_reason() {
        let mut existing = VariantMetricInformation::new("push-1", "variant-1");
        existing.reason = Some("first".to_string());

        let mut update = VariantMetricInformation::new("push-1", "variant-1");
        update.reason = Some("second".to_string());

        existing.merge(&update);
        assert_eq!(existing.reason.as_deref(), Some("first"));
    }

    #[test]
    fn test_variant_error_status_key() {
        let status = VariantErrorStatus::new("job-1", "variant-2", "boom");
        assert_eq!(status.key(), "job-1:variant-2");
    }
}
