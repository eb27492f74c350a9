//! 名称解析
//!
//! 把服务发现的实例变化转换为 RPC 客户端连接管理器需要的地址列表。
//! `discovery:///<service>` 由注册中心驱动，`direct:///<h1:p1>,<h2:p2>` 为静态地址。

pub mod direct;
pub mod discovery;
pub mod endpoint;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{FlareError, Result};
use crate::registry::ServiceInstance;

pub use direct::DirectBuilder;
pub use discovery::{DiscoveryBuilder, DiscoveryResolver};
pub use endpoint::{is_secure, new_endpoint, parse_endpoint};

/// 拨号目标，形如 `scheme://authority/endpoint`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub scheme: String,
    pub authority: String,
    pub endpoint: String,
}

impl Target {
    /// 解析拨号目标
    ///
    /// 不带 scheme 的目标（例如 `127.0.0.1:9000`）scheme 为空，整体作为 endpoint。
    pub fn parse(target: &str) -> Result<Self> {
        let target = target.trim();
        if target.is_empty() {
            return Err(FlareError::invalid_endpoint(target, "empty target"));
        }

        let Some((scheme, rest)) = target.split_once("://") else {
            return Ok(Self {
                scheme: String::new(),
                authority: String::new(),
                endpoint: target.to_string(),
            });
        };

        let (authority, endpoint) = rest.split_once('/').unwrap_or(("", rest));
        if endpoint.is_empty() {
            return Err(FlareError::invalid_endpoint(target, "missing endpoint"));
        }

        Ok(Self {
            scheme: scheme.to_string(),
            authority: authority.to_string(),
            endpoint: endpoint.to_string(),
        })
    }
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.scheme.is_empty() {
            write!(f, "{}", self.endpoint)
        } else {
            write!(f, "{}://{}/{}", self.scheme, self.authority, self.endpoint)
        }
    }
}

/// 解析出的一个地址
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Address {
    /// `host:port`
    pub addr: String,
    /// 来源服务名
    pub server_name: String,
    /// 实例元数据
    pub attributes: HashMap<String, String>,
    /// 原始服务实例，负载均衡需要从中读取权重和元数据
    pub instance: Option<Arc<ServiceInstance>>,
}

impl Address {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            server_name: String::new(),
            attributes: HashMap::new(),
            instance: None,
        }
    }

    pub fn from_instance(addr: impl Into<String>, instance: Arc<ServiceInstance>) -> Self {
        Self {
            addr: addr.into(),
            server_name: instance.name.clone(),
            attributes: instance.metadata.clone(),
            instance: Some(instance),
        }
    }
}

/// 推送给连接管理器的解析结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolverState {
    pub addresses: Vec<Address>,
}

/// 连接管理器
///
/// 解析器通过它推送最新地址列表
pub trait ClientConn: Send + Sync {
    fn update_state(&self, state: ResolverState) -> Result<()>;
}

/// 解析器构建器，按 scheme 注册
#[async_trait]
pub trait ResolverBuilder: Send + Sync {
    fn scheme(&self) -> &str;

    async fn build(&self, target: &Target, cc: Arc<dyn ClientConn>) -> Result<Box<dyn Resolver>>;
}

/// 解析器
pub trait Resolver: Send + Sync {
    /// 请求立即重新解析
    fn resolve_now(&self);

    /// 关闭解析器，停止后台任务
    fn close(&self);
}
