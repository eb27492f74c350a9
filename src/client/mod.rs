//! gRPC 客户端模块
//!
//! 按目标地址选择解析器，组装连接池和负载均衡通道：
//!
//! - `discovery:///user-srv`：通过注册中心动态解析
//! - `direct:///10.0.0.1:9000,10.0.0.2:9000`：静态地址列表
//! - `10.0.0.1:9000`：等同于单地址的 `direct`

pub mod channel;
pub mod pool;

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::balancer::BalancerRegistry;
use crate::config::DiscoveryConfig;
use crate::error::{ErrorCode, FlareError, Result};
use crate::registry::Discovery;
use crate::resolver::direct::DIRECT_SCHEME;
use crate::resolver::discovery::DISCOVERY_SCHEME;
use crate::resolver::{DirectBuilder, DiscoveryBuilder, Resolver, ResolverBuilder, Target};
use crate::selector::SelectorKind;

pub use channel::{BalancedChannel, DoneBody};
pub use pool::{SubConnPool, SubConnSettings};

/// 客户端构建器
pub struct ClientBuilder {
    endpoint: String,
    discovery: Option<Arc<dyn Discovery>>,
    balancer_name: String,
    balancers: Option<Arc<BalancerRegistry>>,
    insecure: bool,
    endpoint_scheme: String,
    timeout: Duration,
    connect_timeout: Duration,
    pick_timeout: Duration,
    resolve_timeout: Duration,
}

impl ClientBuilder {
    pub fn new() -> Self {
        Self::from_config(&DiscoveryConfig::default())
    }

    /// 从配置读取超时、负载均衡算法和解析参数
    pub fn from_config(config: &DiscoveryConfig) -> Self {
        Self {
            endpoint: String::new(),
            discovery: None,
            balancer_name: config.client.balancer.name().to_string(),
            balancers: None,
            insecure: config.resolver.insecure,
            endpoint_scheme: config.resolver.scheme.clone(),
            timeout: Duration::from_millis(config.client.timeout_ms),
            connect_timeout: Duration::from_millis(config.client.connect_timeout_ms),
            pick_timeout: Duration::from_millis(config.client.pick_timeout_ms),
            resolve_timeout: Duration::from_millis(config.resolver.timeout_ms),
        }
    }

    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn discovery(mut self, discovery: Arc<dyn Discovery>) -> Self {
        self.discovery = Some(discovery);
        self
    }

    /// 使用注册表中的负载均衡名称
    pub fn balancer_name(mut self, name: impl Into<String>) -> Self {
        self.balancer_name = name.into();
        self
    }

    pub fn balancer(self, kind: SelectorKind) -> Self {
        self.balancer_name(kind.name())
    }

    /// 使用自定义注册表，默认为进程级注册表
    pub fn balancers(mut self, registry: Arc<BalancerRegistry>) -> Self {
        self.balancers = Some(registry);
        self
    }

    /// 明文连接，解析器只选择不带 `isSecure=true` 的端点
    pub fn insecure(mut self, insecure: bool) -> Self {
        self.insecure = insecure;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn pick_timeout(mut self, timeout: Duration) -> Self {
        self.pick_timeout = timeout;
        self
    }

    pub fn resolve_timeout(mut self, timeout: Duration) -> Self {
        self.resolve_timeout = timeout;
        self
    }

    pub async fn build(self) -> Result<BalancedChannel> {
        let target = Target::parse(&self.endpoint)?;

        let picker_builder = match &self.balancers {
            Some(registry) => registry.get(&self.balancer_name)?,
            None => BalancerRegistry::global().get(&self.balancer_name)?,
        };

        let pool = Arc::new(SubConnPool::new(
            picker_builder,
            SubConnSettings {
                connect_timeout: self.connect_timeout,
                timeout: self.timeout,
                secure: !self.insecure,
            },
        ));

        let resolver: Box<dyn Resolver> = match target.scheme.as_str() {
            DISCOVERY_SCHEME => {
                let discovery = self.discovery.clone().ok_or_else(|| {
                    FlareError::configuration("discovery target requires a Discovery")
                })?;
                DiscoveryBuilder::new(discovery)
                    .with_timeout(self.resolve_timeout)
                    .with_insecure(self.insecure)
                    .with_endpoint_scheme(self.endpoint_scheme.clone())
                    .build(&target, pool.clone())
                    .await?
            }
            DIRECT_SCHEME => DirectBuilder::new().build(&target, pool.clone()).await?,
            "" => {
                let direct = Target {
                    scheme: DIRECT_SCHEME.to_string(),
                    authority: String::new(),
                    endpoint: target.endpoint.clone(),
                };
                DirectBuilder::new().build(&direct, pool.clone()).await?
            }
            other => {
                return Err(FlareError::localized(
                    ErrorCode::ResolverNotFound,
                    format!("no resolver registered for scheme {}", other),
                ));
            }
        };

        info!(
            target = %target,
            balancer = %self.balancer_name,
            insecure = self.insecure,
            "Balanced channel created"
        );

        Ok(BalancedChannel::new(
            target.to_string(),
            pool,
            resolver,
            self.pick_timeout,
        ))
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}
