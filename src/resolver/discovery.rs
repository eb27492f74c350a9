//! 基于注册中心的动态解析器

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::endpoint::parse_endpoint;
use super::{Address, ClientConn, Resolver, ResolverBuilder, ResolverState, Target};
use crate::config::ResolverConfig;
use crate::error::{FlareError, Result};
use crate::registry::{Discovery, ServiceInstance, Watcher};

/// 解析器 scheme
pub const DISCOVERY_SCHEME: &str = "discovery";

/// 监听出错后的重试间隔
const WATCH_RETRY_DELAY: Duration = Duration::from_secs(1);

/// 动态解析器构建器
pub struct DiscoveryBuilder {
    discovery: Arc<dyn Discovery>,
    timeout: Duration,
    insecure: bool,
    scheme: String,
}

impl DiscoveryBuilder {
    pub fn new(discovery: Arc<dyn Discovery>) -> Self {
        Self {
            discovery,
            timeout: Duration::from_secs(10),
            insecure: false,
            scheme: "grpc".to_string(),
        }
    }

    pub fn from_config(discovery: Arc<dyn Discovery>, config: &ResolverConfig) -> Self {
        Self {
            discovery,
            timeout: Duration::from_millis(config.timeout_ms),
            insecure: config.insecure,
            scheme: config.scheme.clone(),
        }
    }

    /// 创建监听器的超时
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// 为 true 时只选择明文端点，否则只选择 `isSecure=true` 的端点
    pub fn with_insecure(mut self, insecure: bool) -> Self {
        self.insecure = insecure;
        self
    }

    /// 选择端点的协议
    pub fn with_endpoint_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.scheme = scheme.into();
        self
    }
}

#[async_trait]
impl ResolverBuilder for DiscoveryBuilder {
    fn scheme(&self) -> &str {
        DISCOVERY_SCHEME
    }

    async fn build(&self, target: &Target, cc: Arc<dyn ClientConn>) -> Result<Box<dyn Resolver>> {
        let service_name = target.endpoint.trim_start_matches('/').to_string();

        // 监听可能阻塞在网络请求上，放到独立任务里，超时后任务继续运行并自行释放监听器
        let discovery = self.discovery.clone();
        let name = service_name.clone();
        let handle = tokio::spawn(async move { discovery.watch(&name).await });

        let watcher = match tokio::time::timeout(self.timeout, handle).await {
            Ok(Ok(result)) => result?,
            Ok(Err(join_err)) => return Err(FlareError::system(join_err.to_string())),
            Err(_) => {
                error!(service = %service_name, timeout = ?self.timeout, "Discovery create watcher overtime");
                return Err(FlareError::watcher_overtime());
            }
        };

        let resolver = DiscoveryResolver::new(
            service_name,
            watcher,
            cc,
            self.scheme.clone(),
            self.insecure,
        );
        resolver.start();
        Ok(Box::new(resolver))
    }
}

/// 动态解析器
///
/// 后台循环等待监听器的下一次变化并推送地址列表
pub struct DiscoveryResolver {
    inner: Arc<ResolverInner>,
}

struct ResolverInner {
    service_name: String,
    watcher: Arc<dyn Watcher>,
    cc: Arc<dyn ClientConn>,
    scheme: String,
    insecure: bool,
    cancel: CancellationToken,
}

impl DiscoveryResolver {
    pub fn new(
        service_name: impl Into<String>,
        watcher: Arc<dyn Watcher>,
        cc: Arc<dyn ClientConn>,
        scheme: impl Into<String>,
        insecure: bool,
    ) -> Self {
        Self {
            inner: Arc::new(ResolverInner {
                service_name: service_name.into(),
                watcher,
                cc,
                scheme: scheme.into(),
                insecure,
                cancel: CancellationToken::new(),
            }),
        }
    }

    /// 启动监听循环
    pub fn start(&self) {
        let inner = self.inner.clone();
        tokio::spawn(async move { inner.watch().await });
    }

    /// 按当前配置处理一批实例并推送
    ///
    /// 返回是否推送了新的地址列表；结果为空时保留上一次的地址。
    pub fn update(&self, instances: Vec<ServiceInstance>) -> bool {
        self.inner.update(instances)
    }

    pub fn is_closed(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }
}

impl ResolverInner {
    async fn watch(&self) {
        loop {
            let result = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                result = self.watcher.next() => result,
            };

            match result {
                Ok(instances) => {
                    self.update(instances);
                }
                Err(e) if e.is_cancelled() || self.cancel.is_cancelled() => break,
                Err(e) => {
                    error!(service = %self.service_name, error = %e, "Failed to watch discovery endpoint");
                    tokio::select! {
                        _ = self.cancel.cancelled() => break,
                        _ = tokio::time::sleep(WATCH_RETRY_DELAY) => {}
                    }
                }
            }
        }
        debug!(service = %self.service_name, "Resolver watch loop stopped");
    }

    fn update(&self, instances: Vec<ServiceInstance>) -> bool {
        let secure = !self.insecure;
        let mut seen = HashSet::new();
        let mut addresses = Vec::new();

        for instance in &instances {
            if !instance.is_routable() {
                debug!(instance_id = %instance.id, "Skip instance without endpoints");
                continue;
            }
            let endpoint = match parse_endpoint(&instance.endpoints, &self.scheme, secure) {
                Ok(Some(endpoint)) => endpoint,
                Ok(None) => continue,
                Err(e) => {
                    error!(instance_id = %instance.id, error = %e, "Failed to parse discovery endpoint");
                    continue;
                }
            };
            if !seen.insert(endpoint.clone()) {
                continue;
            }
            addresses.push(Address::from_instance(endpoint, Arc::new(instance.clone())));
        }

        if addresses.is_empty() {
            warn!(
                service = %self.service_name,
                instances = instances.len(),
                "Zero endpoint found, refused to write"
            );
            return false;
        }

        let count = addresses.len();
        if let Err(e) = self.cc.update_state(ResolverState { addresses }) {
            error!(service = %self.service_name, error = %e, "Failed to update resolver state");
        }

        info!(
            service = %self.service_name,
            addresses = count,
            instances = %serde_json::to_string(&instances).unwrap_or_default(),
            "Resolver update instances"
        );
        true
    }
}

impl Resolver for DiscoveryResolver {
    fn resolve_now(&self) {}

    fn close(&self) {
        self.inner.cancel.cancel();
        if let Err(e) = self.inner.watcher.stop() {
            error!(service = %self.inner.service_name, error = %e, "Failed to stop watcher");
        }
    }
}

impl Drop for DiscoveryResolver {
    fn drop(&mut self) {
        self.inner.cancel.cancel();
    }
}
