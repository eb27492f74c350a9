//! 服务实例定义

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// 元数据中表示静态权重的键
pub const WEIGHT_METADATA_KEY: &str = "weight";

/// 服务实例
///
/// 描述一个已注册、可寻址的服务进程。`endpoints` 每个传输协议一条，
/// 格式为 `scheme://host:port[?isSecure=true]`，例如 `grpc://10.0.0.1:9000`。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ServiceInstance {
    /// 注册到服务中心的实例 ID（每次注册唯一）
    pub id: String,

    /// 服务名称（发现键）
    pub name: String,

    /// 服务版本
    #[serde(default)]
    pub version: String,

    /// 服务元数据
    #[serde(default)]
    pub metadata: HashMap<String, String>,

    /// 服务端点，例如 `http://127.0.0.1:8080`、`grpc://127.0.0.1:9000`
    #[serde(default)]
    pub endpoints: Vec<String>,
}

impl ServiceInstance {
    /// 创建新的服务实例，实例 ID 随机生成
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            ..Default::default()
        }
    }

    /// 设置实例 ID
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// 设置版本
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// 添加元数据
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// 设置静态权重（写入 `weight` 元数据）
    pub fn with_weight(self, weight: i64) -> Self {
        self.with_metadata(WEIGHT_METADATA_KEY, weight.to_string())
    }

    /// 添加端点
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoints.push(endpoint.into());
        self
    }

    /// 元数据中声明的权重，缺失或无法解析时返回 `None`
    pub fn weight(&self) -> Option<i64> {
        self.metadata
            .get(WEIGHT_METADATA_KEY)
            .and_then(|w| w.parse::<i64>().ok())
    }

    /// 没有任何端点的实例对解析器不可用
    pub fn is_routable(&self) -> bool {
        !self.endpoints.is_empty()
    }
}
