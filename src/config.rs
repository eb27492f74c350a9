use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::selector::SelectorKind;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DiscoveryConfig {
    #[serde(default)]
    pub consul: ConsulConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub resolver: ResolverConfig,
    #[serde(default)]
    pub client: ClientConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ConsulConfig {
    pub address: String, // http://127.0.0.1:8500
    pub token: Option<String>,
    pub datacenter: Option<String>,
    /// 阻塞查询等待时间（秒）
    pub wait_time_secs: u64,
    /// 单次 HTTP 请求超时（秒），需大于 wait_time_secs
    pub query_timeout_secs: u64,
    pub passing_only: bool,
}

impl Default for ConsulConfig {
    fn default() -> Self {
        Self {
            address: "http://127.0.0.1:8500".to_string(),
            token: None,
            datacenter: None,
            wait_time_secs: 55,
            query_timeout_secs: 120,
            passing_only: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub enable_health_check: bool,
    pub heartbeat: bool,
    pub health_check_interval_secs: u64,
    pub deregister_critical_service_after_secs: u64,
    pub check_timeout_secs: u64,
    pub poll_interval_ms: u64,
    pub retry_backoff_ms: u64,
    pub resolve_timeout_secs: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            enable_health_check: true,
            heartbeat: true,
            health_check_interval_secs: 10,
            deregister_critical_service_after_secs: 600,
            check_timeout_secs: 5,
            poll_interval_ms: 1000,
            retry_backoff_ms: 1000,
            resolve_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// 创建监听器的超时（毫秒）
    pub timeout_ms: u64,
    pub insecure: bool,
    pub scheme: String, // grpc
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 10_000,
            insecure: false,
            scheme: "grpc".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ClientConfig {
    pub balancer: SelectorKind,
    pub timeout_ms: u64,
    pub connect_timeout_ms: u64,
    /// 没有可用连接时等待的上限（毫秒）
    pub pick_timeout_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            balancer: SelectorKind::default(),
            timeout_ms: 2_000,
            connect_timeout_ms: 5_000,
            pick_timeout_ms: 3_000,
        }
    }
}

impl DiscoveryConfig {
    pub fn load_from_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config: DiscoveryConfig = toml::from_str(&content)?;
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// 环境变量覆盖文件中的配置
    pub fn apply_env_overrides(&mut self) {
        if let Ok(address) = std::env::var("CONSUL_HTTP_ADDR") {
            self.consul.address = if address.starts_with("http://") || address.starts_with("https://") {
                address
            } else {
                format!("http://{}", address)
            };
        }
        if let Ok(token) = std::env::var("CONSUL_HTTP_TOKEN") {
            if !token.is_empty() {
                self.consul.token = Some(token);
            }
        }
        if let Some(interval) = std::env::var("SERVICE_HEARTBEAT_INTERVAL")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|v| *v > 0)
        {
            self.registry.health_check_interval_secs = interval;
        }
        if let Ok(passing_only) = std::env::var("CONSUL_PASSING_ONLY") {
            self.consul.passing_only = passing_only == "true";
        }
    }
}
