//! Consul 注册中心门面
//!
//! 组合 [`Client`] 与 [`ServiceSet`]：对外提供注册/注销/查询/监听，
//! 每个被监听的服务名在后台运行一个阻塞查询刷新循环。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio::time::{Instant, MissedTickBehavior, interval_at, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::api::{ConsulApi, HttpConsulApi};
use super::client::{Client, ClientOptions};
use super::service_set::ServiceSet;
use super::watcher::ConsulWatcher;
use crate::config::DiscoveryConfig;
use crate::error::{FlareError, Result};
use crate::registry::{Discovery, Registrar, ServiceInstance, Watcher};

/// 刷新循环参数
#[derive(Debug, Clone)]
pub struct RegistryOptions {
    /// 两次阻塞查询之间的最小间隔
    pub poll_interval: Duration,
    /// 查询失败后的退避时间
    pub retry_backoff: Duration,
    /// 首次监听时同步解析的超时
    pub resolve_timeout: Duration,
    /// 单次阻塞查询的超时
    pub query_timeout: Duration,
    /// 只返回健康检查通过的实例
    pub passing_only: bool,
}

impl Default for RegistryOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            retry_backoff: Duration::from_secs(1),
            resolve_timeout: Duration::from_secs(10),
            query_timeout: Duration::from_secs(120),
            passing_only: true,
        }
    }
}

impl RegistryOptions {
    pub fn from_config(config: &DiscoveryConfig) -> Self {
        Self {
            poll_interval: Duration::from_millis(config.registry.poll_interval_ms),
            retry_backoff: Duration::from_millis(config.registry.retry_backoff_ms),
            resolve_timeout: Duration::from_secs(config.registry.resolve_timeout_secs),
            query_timeout: Duration::from_secs(config.consul.query_timeout_secs),
            passing_only: config.consul.passing_only,
        }
    }
}

/// Consul 注册中心
pub struct ConsulRegistry {
    cli: Arc<Client>,
    enable_health_check: bool,
    registry: RwLock<HashMap<String, Arc<ServiceSet>>>,
    options: RegistryOptions,
    lifetime: CancellationToken,
}

impl ConsulRegistry {
    /// 使用默认选项创建
    pub fn new(api: Arc<dyn ConsulApi>) -> Self {
        Self::with_options(
            Client::new(api),
            true,
            RegistryOptions::default(),
        )
    }

    /// 使用已构建的客户端创建
    pub fn with_options(cli: Client, enable_health_check: bool, options: RegistryOptions) -> Self {
        Self {
            cli: Arc::new(cli),
            enable_health_check,
            registry: RwLock::new(HashMap::new()),
            options,
            lifetime: CancellationToken::new(),
        }
    }

    /// 从配置创建，使用 HTTP API 访问 Consul agent
    pub fn from_config(config: &DiscoveryConfig) -> Result<Self> {
        let api: Arc<dyn ConsulApi> = Arc::new(HttpConsulApi::new(&config.consul)?);
        let client_options = ClientOptions::from_config(
            &config.registry,
            Duration::from_secs(config.consul.wait_time_secs),
        );

        info!(
            address = %config.consul.address,
            heartbeat = config.registry.heartbeat,
            "Consul registry created"
        );

        Ok(Self::with_options(
            Client::with_options(api, client_options),
            config.registry.enable_health_check,
            RegistryOptions::from_config(config),
        ))
    }

    pub fn client(&self) -> &Arc<Client> {
        &self.cli
    }

    pub fn options(&self) -> &RegistryOptions {
        &self.options
    }

    /// 所有已缓存且非空的服务快照
    pub async fn list_services(&self) -> HashMap<String, Vec<ServiceInstance>> {
        self.registry
            .read()
            .await
            .iter()
            .filter_map(|(name, set)| {
                let snapshot = set.snapshot();
                (!snapshot.is_empty()).then(|| (name.clone(), snapshot.as_ref().clone()))
            })
            .collect()
    }

    /// 已创建的服务集合
    pub async fn service_set(&self, name: &str) -> Option<Arc<ServiceSet>> {
        self.registry.read().await.get(name).cloned()
    }

    /// 停止所有刷新循环、监听器和心跳
    pub fn close(&self) {
        self.lifetime.cancel();
        self.cli.close();
    }

    pub fn is_closed(&self) -> bool {
        self.lifetime.is_cancelled()
    }

    /// 同步解析一次，随后启动刷新循环
    async fn resolve(&self, set: Arc<ServiceSet>) -> Result<()> {
        let name = set.service_name().to_string();
        let (services, idx) = timeout(
            self.options.resolve_timeout,
            self.cli.service(&name, 0, self.options.passing_only),
        )
        .await
        .map_err(|_| FlareError::timeout(format!("resolve service {} timed out", name)))??;

        if !services.is_empty() {
            set.broadcast(services);
        }

        tokio::spawn(refresh_loop(
            self.cli.clone(),
            set,
            self.options.clone(),
            self.lifetime.child_token(),
            idx,
        ));
        Ok(())
    }
}

/// 按索引阻塞查询，成员变化时广播
///
/// 出错时保持索引不变并退避重试，直到取消。
async fn refresh_loop(
    cli: Arc<Client>,
    set: Arc<ServiceSet>,
    options: RegistryOptions,
    token: CancellationToken,
    mut idx: u64,
) {
    let name = set.service_name().to_string();
    let mut ticker = interval_at(Instant::now() + options.poll_interval, options.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    debug!(service = %name, index = idx, "Refresh loop started");
    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let result = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            result = timeout(options.query_timeout, cli.service(&name, idx, options.passing_only)) => {
                result.unwrap_or_else(|_| Err(FlareError::timeout("consul query timed out")))
            }
        };

        match result {
            Ok((services, new_idx)) => {
                if !services.is_empty() && new_idx != idx {
                    debug!(
                        service = %name,
                        instances = services.len(),
                        index = new_idx,
                        "Service membership changed"
                    );
                    set.broadcast(services);
                }
                idx = new_idx;
            }
            Err(e) if e.is_cancelled() => break,
            Err(e) => {
                warn!(service = %name, index = idx, error = %e, "Consul service query failed");
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(options.retry_backoff) => {}
                }
            }
        }
    }
    debug!(service = %name, "Refresh loop stopped");
}

#[async_trait]
impl Registrar for ConsulRegistry {
    async fn register(&self, instance: &ServiceInstance) -> Result<()> {
        self.cli.register(instance, self.enable_health_check).await
    }

    async fn deregister(&self, instance: &ServiceInstance) -> Result<()> {
        self.cli.deregister(&instance.id).await
    }
}

#[async_trait]
impl Discovery for ConsulRegistry {
    async fn get_service(&self, name: &str) -> Result<Vec<ServiceInstance>> {
        if let Some(set) = self.service_set(name).await {
            let snapshot = set.snapshot();
            if !snapshot.is_empty() {
                return Ok(snapshot.as_ref().clone());
            }
        }

        let (services, _) = self.cli.service(name, 0, self.options.passing_only).await?;
        if services.is_empty() {
            return Err(FlareError::service_not_found(name));
        }
        Ok(services)
    }

    async fn watch(&self, name: &str) -> Result<Arc<dyn Watcher>> {
        if self.is_closed() {
            return Err(FlareError::registry_unavailable("registry closed"));
        }

        let mut registry = self.registry.write().await;
        if let Some(set) = registry.get(name) {
            return Ok(Arc::new(ConsulWatcher::new(set.clone(), &self.lifetime)));
        }

        // 解析成功后才登记集合，失败或被取消时下次监听会重新解析
        let set = Arc::new(ServiceSet::new(name));
        let watcher = Arc::new(ConsulWatcher::new(set.clone(), &self.lifetime));
        if let Err(e) = self.resolve(set.clone()).await {
            warn!(service = %name, error = %e, "Initial resolve failed");
            return Err(e);
        }
        registry.insert(name.to_string(), set);
        Ok(watcher)
    }
}

impl Drop for ConsulRegistry {
    fn drop(&mut self) {
        self.lifetime.cancel();
    }
}
