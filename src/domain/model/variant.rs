use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// 推送平台类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariantType {
    Ios,
    Android,
    WebPush,
    Adm,
    SimplePush,
    Windows,
}

impl VariantType {
    pub const ALL: [VariantType; 6] = [
        VariantType::Ios,
        VariantType::Android,
        VariantType::WebPush,
        VariantType::Adm,
        VariantType::SimplePush,
        VariantType::Windows,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            VariantType::Ios => "ios",
            VariantType::Android => "android",
            VariantType::WebPush => "web_push",
            VariantType::Adm => "adm",
            VariantType::SimplePush => "simple_push",
            VariantType::Windows => "windows",
        }
    }
}

impl fmt::Display for VariantType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// 应用下的一个平台变体（证书等凭证按变体存储）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Variant {
    pub id: String,
    pub name: String,
    pub variant_type: VariantType,
    #[serde(default)]
    pub production: bool,
    /// 平台凭证（证书、API Key 等），内容由对应发送器解释
    #[serde(default)]
    pub credentials: HashMap<String, String>,
}

/// 注册到服务的推送应用，持有其全部变体
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushApplication {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub variants: Vec<Variant>,
}

/// 设备注册信息，token 的有效性由各推送网络定义
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Installation {
    pub variant_id: String,
    pub device_token: String,
    #[serde(default)]
    pub alias: Option<String>,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub device_type: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl Installation {
    pub fn new(variant_id: impl Into<String>, device_token: impl Into<String>) -> Self {
        Self {
            variant_id: variant_id.into(),
            device_token: device_token.into(),
            alias: None,
            categories: Vec::new(),
            device_type: None,
            enabled: true,
        }
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn with_categories(mut self, categories: Vec<String>) -> Self {
        self.categories = categories;
        self
    }

    pub fn with_device_type(mut self, device_type: impl Into<String>) -> Self {
        self.device_type = Some(device_type.into());
        self
    }
}
