//! Consul 注册中心客户端
//!
//! 负责服务注册/注销、TTL 心跳以及健康服务的阻塞查询。

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::{Instant, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use url::Url;

use super::api::{
    AgentServiceCheck, AgentServiceRegistration, CheckStatus, ConsulApi, QueryOptions,
    ServiceAddress, ServiceEntry,
};
use crate::config::RegistryConfig;
use crate::error::{FlareError, Result};
use crate::registry::ServiceInstance;

/// RPC 原生协议，使用 gRPC 健康检查，其余协议使用 TCP 检查
const RPC_SCHEME: &str = "grpc";

/// Consul 内置的网络地址标签，不是服务端点
const NETWORK_ADDRESS_TAGS: [&str; 4] = ["lan_ipv4", "wan_ipv4", "lan_ipv6", "wan_ipv6"];

/// 把 Consul 条目转换为服务实例的函数
pub type ServiceResolver = Arc<dyn Fn(&[ServiceEntry]) -> Vec<ServiceInstance> + Send + Sync>;

/// 客户端选项
#[derive(Clone)]
pub struct ClientOptions {
    /// 健康检查/心跳间隔
    pub health_check_interval: Duration,
    /// 是否启用 TTL 心跳
    pub heartbeat: bool,
    /// 严重错误后自动注销的时间
    pub deregister_critical_service_after: Duration,
    /// TCP/gRPC 检查超时
    pub check_timeout: Duration,
    /// 注册后首次心跳的延迟，避免心跳早于注册到达
    pub heartbeat_initial_delay: Duration,
    /// 阻塞查询的等待上限
    pub wait_time: Duration,
    /// 用户自定义检查项
    pub service_checks: Vec<AgentServiceCheck>,
    /// 条目解析函数
    pub service_resolver: ServiceResolver,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            health_check_interval: Duration::from_secs(10),
            heartbeat: true,
            deregister_critical_service_after: Duration::from_secs(600),
            check_timeout: Duration::from_secs(5),
            heartbeat_initial_delay: Duration::from_secs(1),
            wait_time: Duration::from_secs(55),
            service_checks: Vec::new(),
            service_resolver: Arc::new(default_resolver),
        }
    }
}

impl fmt::Debug for ClientOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientOptions")
            .field("health_check_interval", &self.health_check_interval)
            .field("heartbeat", &self.heartbeat)
            .field(
                "deregister_critical_service_after",
                &self.deregister_critical_service_after,
            )
            .field("check_timeout", &self.check_timeout)
            .field("heartbeat_initial_delay", &self.heartbeat_initial_delay)
            .field("wait_time", &self.wait_time)
            .field("service_checks", &self.service_checks)
            .finish_non_exhaustive()
    }
}

impl ClientOptions {
    /// 从注册配置构建
    pub fn from_config(config: &RegistryConfig, wait_time: Duration) -> Self {
        Self {
            health_check_interval: Duration::from_secs(config.health_check_interval_secs),
            heartbeat: config.heartbeat,
            deregister_critical_service_after: Duration::from_secs(
                config.deregister_critical_service_after_secs,
            ),
            check_timeout: Duration::from_secs(config.check_timeout_secs),
            wait_time,
            ..Default::default()
        }
    }

    pub fn with_heartbeat(mut self, enable: bool) -> Self {
        self.heartbeat = enable;
        self
    }

    pub fn with_health_check_interval(mut self, interval: Duration) -> Self {
        self.health_check_interval = interval;
        self
    }

    pub fn with_deregister_critical_service_after(mut self, after: Duration) -> Self {
        self.deregister_critical_service_after = after;
        self
    }

    pub fn with_check_timeout(mut self, timeout: Duration) -> Self {
        self.check_timeout = timeout;
        self
    }

    pub fn with_heartbeat_initial_delay(mut self, delay: Duration) -> Self {
        self.heartbeat_initial_delay = delay;
        self
    }

    pub fn with_wait_time(mut self, wait_time: Duration) -> Self {
        self.wait_time = wait_time;
        self
    }

    pub fn with_service_checks(mut self, checks: Vec<AgentServiceCheck>) -> Self {
        self.service_checks = checks;
        self
    }

    pub fn with_service_resolver<F>(mut self, resolver: F) -> Self
    where
        F: Fn(&[ServiceEntry]) -> Vec<ServiceInstance> + Send + Sync + 'static,
    {
        self.service_resolver = Arc::new(resolver);
        self
    }
}

/// 默认条目解析
///
/// 版本取自 `version=<v>` 标签；端点取自按协议标记的地址（跳过网络地址标签），
/// 没有标记地址时回退到 `http://Address:Port`。
pub fn default_resolver(entries: &[ServiceEntry]) -> Vec<ServiceInstance> {
    entries
        .iter()
        .map(|entry| {
            let service = &entry.service;
            let version = service
                .tags
                .iter()
                .flatten()
                .filter_map(|tag| tag.split_once('='))
                .find(|(key, _)| *key == "version")
                .map(|(_, value)| value.to_string())
                .unwrap_or_default();

            let mut endpoints: Vec<String> = service
                .tagged_addresses
                .iter()
                .flatten()
                .filter(|(scheme, _)| !NETWORK_ADDRESS_TAGS.contains(&scheme.as_str()))
                .map(|(_, addr)| addr.address.clone())
                .collect();

            if endpoints.is_empty() && !service.address.is_empty() && service.port != 0 {
                endpoints.push(format!("http://{}:{}", service.address, service.port));
            }

            ServiceInstance {
                id: service.id.clone(),
                name: service.service.clone(),
                version,
                metadata: service.meta.clone().unwrap_or_default(),
                endpoints,
            }
        })
        .collect()
}

/// 解析后的端点
struct ParsedEndpoint {
    scheme: String,
    host: String,
    port: u16,
}

impl ParsedEndpoint {
    fn parse(endpoint: &str) -> Result<Self> {
        let raw = Url::parse(endpoint)
            .map_err(|e| FlareError::invalid_endpoint(endpoint, e.to_string()))?;
        let host = raw
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| FlareError::invalid_endpoint(endpoint, "missing host"))?;
        let port = raw
            .port_or_known_default()
            .ok_or_else(|| FlareError::invalid_endpoint(endpoint, "missing port"))?;

        Ok(Self {
            scheme: raw.scheme().to_string(),
            host: host.trim_start_matches('[').trim_end_matches(']').to_string(),
            port,
        })
    }

    /// `host:port`，IPv6 地址带方括号
    fn host_port(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

/// Consul 注册中心客户端
pub struct Client {
    api: Arc<dyn ConsulApi>,
    options: ClientOptions,
    lifetime: CancellationToken,
    heartbeats: Mutex<HashMap<String, CancellationToken>>,
}

impl Client {
    /// 使用默认选项创建
    pub fn new(api: Arc<dyn ConsulApi>) -> Self {
        Self::with_options(api, ClientOptions::default())
    }

    /// 使用指定选项创建
    pub fn with_options(api: Arc<dyn ConsulApi>, options: ClientOptions) -> Self {
        Self {
            api,
            options,
            lifetime: CancellationToken::new(),
            heartbeats: Mutex::new(HashMap::new()),
        }
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    /// 正在运行心跳的实例数量
    pub fn heartbeat_count(&self) -> usize {
        self.heartbeats
            .lock()
            .values()
            .filter(|token| !token.is_cancelled())
            .count()
    }

    /// 构建注册请求体
    pub fn build_registration(
        &self,
        instance: &ServiceInstance,
        enable_health_check: bool,
    ) -> Result<AgentServiceRegistration> {
        let mut tagged_addresses = std::collections::BTreeMap::new();
        let mut tcp_check_addresses = Vec::new();
        let mut grpc_check_addresses = Vec::new();

        for endpoint in &instance.endpoints {
            let parsed = ParsedEndpoint::parse(endpoint)?;
            if parsed.scheme == RPC_SCHEME {
                grpc_check_addresses.push((parsed.host.clone(), parsed.port));
            } else {
                tcp_check_addresses.push((parsed.host.clone(), parsed.port));
            }
            tagged_addresses.insert(
                parsed.scheme.clone(),
                ServiceAddress {
                    address: endpoint.clone(),
                    port: parsed.port,
                },
            );
        }

        let mut registration = AgentServiceRegistration {
            id: instance.id.clone(),
            name: instance.name.clone(),
            tags: vec![format!("version={}", instance.version)],
            meta: instance.metadata.clone(),
            tagged_addresses,
            ..Default::default()
        };

        // 主地址优先取 RPC 端点
        if let Some((host, port)) = grpc_check_addresses
            .first()
            .or_else(|| tcp_check_addresses.first())
        {
            registration.address = host.clone();
            registration.port = *port;
        }

        let interval = format!("{}s", self.options.health_check_interval.as_secs());
        let deregister_after = format!(
            "{}s",
            self.options.deregister_critical_service_after.as_secs()
        );
        let timeout = format!("{}s", self.options.check_timeout.as_secs());

        if enable_health_check {
            for (host, port) in &tcp_check_addresses {
                let endpoint = ParsedEndpoint {
                    scheme: String::new(),
                    host: host.clone(),
                    port: *port,
                };
                registration.checks.push(AgentServiceCheck {
                    tcp: Some(endpoint.host_port()),
                    interval: Some(interval.clone()),
                    timeout: Some(timeout.clone()),
                    deregister_critical_service_after: Some(deregister_after.clone()),
                    ..Default::default()
                });
            }
            // gRPC 检查依赖服务端注册了 grpc.health.v1 服务
            for (host, port) in &grpc_check_addresses {
                let endpoint = ParsedEndpoint {
                    scheme: String::new(),
                    host: host.clone(),
                    port: *port,
                };
                registration.checks.push(AgentServiceCheck {
                    grpc: Some(endpoint.host_port()),
                    grpc_use_tls: false,
                    interval: Some(interval.clone()),
                    timeout: Some(timeout.clone()),
                    deregister_critical_service_after: Some(deregister_after.clone()),
                    ..Default::default()
                });
            }
        }

        if self.options.heartbeat {
            registration.checks.push(AgentServiceCheck {
                check_id: Some(ttl_check_id(&instance.id)),
                ttl: Some(format!(
                    "{}s",
                    self.options.health_check_interval.as_secs() * 2
                )),
                deregister_critical_service_after: Some(deregister_after),
                ..Default::default()
            });
        }

        registration
            .checks
            .extend(self.options.service_checks.iter().cloned());

        Ok(registration)
    }

    /// 注册服务实例
    ///
    /// 同一个 ID 重复注册只会覆盖 Consul 中的注册信息，心跳任务保持一个。
    pub async fn register(
        &self,
        instance: &ServiceInstance,
        enable_health_check: bool,
    ) -> Result<()> {
        let registration = self.build_registration(instance, enable_health_check)?;
        self.api.service_register(&registration).await?;

        info!(
            service = %instance.name,
            instance_id = %instance.id,
            endpoints = ?instance.endpoints,
            "Service registered with Consul"
        );

        if self.options.heartbeat {
            self.spawn_heartbeat(&instance.id);
        }
        Ok(())
    }

    /// 注销服务实例
    pub async fn deregister(&self, service_id: &str) -> Result<()> {
        if let Some(token) = self.heartbeats.lock().remove(service_id) {
            token.cancel();
        }
        self.api.service_deregister(service_id).await?;
        info!(instance_id = %service_id, "Service deregistered from Consul");
        Ok(())
    }

    /// 查询服务实例
    ///
    /// `wait_index` 为 0 时立即返回，否则阻塞直到成员变化或等待超过 `wait_time`。
    /// 返回解析后的实例和新的索引。
    pub async fn service(
        &self,
        name: &str,
        wait_index: u64,
        passing_only: bool,
    ) -> Result<(Vec<ServiceInstance>, u64)> {
        let options = QueryOptions {
            wait_index,
            wait_time: self.options.wait_time,
        };

        let (entries, meta) = tokio::select! {
            biased;
            _ = self.lifetime.cancelled() => {
                return Err(FlareError::cancelled("consul client closed"));
            }
            result = self.api.health_service(name, passing_only, &options) => result?,
        };

        debug!(
            service = %name,
            entries = entries.len(),
            last_index = meta.last_index,
            "Consul health query returned"
        );
        Ok(((self.options.service_resolver)(&entries), meta.last_index))
    }

    /// 结束客户端生命周期，停止所有心跳并中断进行中的查询
    pub fn close(&self) {
        self.lifetime.cancel();
    }

    fn spawn_heartbeat(&self, service_id: &str) {
        let mut heartbeats = self.heartbeats.lock();
        if heartbeats
            .get(service_id)
            .is_some_and(|token| !token.is_cancelled())
        {
            return;
        }

        let token = self.lifetime.child_token();
        heartbeats.insert(service_id.to_string(), token.clone());
        drop(heartbeats);

        let api = self.api.clone();
        let check_id = ttl_check_id(service_id);
        let period = self.options.health_check_interval;
        let initial_delay = self.options.heartbeat_initial_delay;

        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(initial_delay) => {}
            }

            // 立即心跳，使服务注册后立刻通过健康检查
            let mut ticker = interval_at(Instant::now(), period);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                tokio::select! {
                    _ = token.cancelled() => break,
                    result = api.update_ttl(&check_id, "pass", CheckStatus::Passing) => {
                        if let Err(e) = result {
                            error!(check_id = %check_id, error = %e, "Update ttl heartbeat to consul failed");
                        }
                    }
                }
            }
            debug!(check_id = %check_id, "Heartbeat loop stopped");
        });
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.lifetime.cancel();
    }
}

/// TTL 检查 ID
pub fn ttl_check_id(service_id: &str) -> String {
    format!("service:{}", service_id)
}
