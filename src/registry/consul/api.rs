//! Consul HTTP API 封装
//!
//! 只覆盖注册发现需要的几个接口：服务注册/注销、TTL 更新、健康服务阻塞查询。
//! [`ConsulApi`] 抽象出这几个调用，测试中可以用内存实现替换。

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client as HttpClient;
use serde::{Deserialize, Serialize};

use crate::config::ConsulConfig;
use crate::error::{FlareError, Result};

/// 阻塞查询返回的索引头
const CONSUL_INDEX_HEADER: &str = "X-Consul-Index";
/// ACL token 请求头
const CONSUL_TOKEN_HEADER: &str = "X-Consul-Token";

/// 服务注册请求体（`PUT /v1/agent/service/register`）
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct AgentServiceRegistration {
    #[serde(rename = "ID")]
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub port: u16,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub address: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tagged_addresses: BTreeMap<String, ServiceAddress>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub meta: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub checks: Vec<AgentServiceCheck>,
}

fn is_zero(port: &u16) -> bool {
    *port == 0
}

/// 按协议标记的地址
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct ServiceAddress {
    pub address: String,
    #[serde(default)]
    pub port: u16,
}

/// 服务健康检查定义
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct AgentServiceCheck {
    #[serde(rename = "CheckID", default, skip_serializing_if = "Option::is_none")]
    pub check_id: Option<String>,
    #[serde(rename = "TCP", default, skip_serializing_if = "Option::is_none")]
    pub tcp: Option<String>,
    #[serde(rename = "GRPC", default, skip_serializing_if = "Option::is_none")]
    pub grpc: Option<String>,
    #[serde(rename = "GRPCUseTLS", default, skip_serializing_if = "std::ops::Not::not")]
    pub grpc_use_tls: bool,
    #[serde(rename = "HTTP", default, skip_serializing_if = "Option::is_none")]
    pub http: Option<String>,
    #[serde(rename = "TTL", default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deregister_critical_service_after: Option<String>,
}

/// 健康服务查询结果条目（`GET /v1/health/service/:name`）
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct ServiceEntry {
    pub service: AgentService,
    #[serde(default)]
    pub checks: Vec<HealthCheck>,
}

/// 条目中的服务部分
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct AgentService {
    #[serde(rename = "ID")]
    pub id: String,
    pub service: String,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub meta: Option<HashMap<String, String>>,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub tagged_addresses: Option<BTreeMap<String, ServiceAddress>>,
}

/// 条目中的检查状态
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct HealthCheck {
    #[serde(rename = "CheckID", default)]
    pub check_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub status: String,
    #[serde(rename = "ServiceID", default)]
    pub service_id: String,
}

/// TTL 检查状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Passing,
    Warning,
    Critical,
}

/// 阻塞查询参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryOptions {
    /// 0 表示立即返回
    pub wait_index: u64,
    /// 阻塞上限
    pub wait_time: Duration,
}

/// 查询元信息
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryMeta {
    pub last_index: u64,
}

/// Consul agent 接口
#[async_trait]
pub trait ConsulApi: Send + Sync {
    /// 注册服务
    async fn service_register(&self, registration: &AgentServiceRegistration) -> Result<()>;

    /// 注销服务
    async fn service_deregister(&self, service_id: &str) -> Result<()>;

    /// 更新 TTL 检查状态
    async fn update_ttl(&self, check_id: &str, output: &str, status: CheckStatus) -> Result<()>;

    /// 健康服务阻塞查询
    async fn health_service(
        &self,
        service: &str,
        passing_only: bool,
        options: &QueryOptions,
    ) -> Result<(Vec<ServiceEntry>, QueryMeta)>;
}

/// 基于 reqwest 的 Consul HTTP 实现
pub struct HttpConsulApi {
    http_client: HttpClient,
    base_url: String,
    token: Option<String>,
    datacenter: Option<String>,
}

impl HttpConsulApi {
    /// 从配置创建
    pub fn new(config: &ConsulConfig) -> Result<Self> {
        // 阻塞查询最长等待 wait_time，再加上 Consul 自身最多 1/16 的抖动
        let http_client = HttpClient::builder()
            .timeout(Duration::from_secs(config.query_timeout_secs))
            .build()?;

        Ok(Self {
            http_client,
            base_url: config.address.trim_end_matches('/').to_string(),
            token: config.token.clone(),
            datacenter: config.datacenter.clone(),
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        let mut builder = self.http_client.request(method, url);
        if let Some(token) = &self.token {
            builder = builder.header(CONSUL_TOKEN_HEADER, token);
        }
        if let Some(dc) = &self.datacenter {
            builder = builder.query(&[("dc", dc)]);
        }
        builder
    }

    async fn send(&self, builder: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        let resp = builder.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(FlareError::registry_unavailable(format!(
                "consul request failed with status {}",
                status
            ))
            .with_details(body));
        }
        Ok(resp)
    }
}

#[async_trait]
impl ConsulApi for HttpConsulApi {
    async fn service_register(&self, registration: &AgentServiceRegistration) -> Result<()> {
        let builder = self
            .request(reqwest::Method::PUT, "/v1/agent/service/register")
            .json(registration);
        self.send(builder).await?;
        Ok(())
    }

    async fn service_deregister(&self, service_id: &str) -> Result<()> {
        let path = format!("/v1/agent/service/deregister/{}", service_id);
        self.send(self.request(reqwest::Method::PUT, &path)).await?;
        Ok(())
    }

    async fn update_ttl(&self, check_id: &str, output: &str, status: CheckStatus) -> Result<()> {
        let path = format!("/v1/agent/check/update/{}", check_id);
        let builder = self
            .request(reqwest::Method::PUT, &path)
            .json(&serde_json::json!({ "Status": status, "Output": output }));
        self.send(builder).await?;
        Ok(())
    }

    async fn health_service(
        &self,
        service: &str,
        passing_only: bool,
        options: &QueryOptions,
    ) -> Result<(Vec<ServiceEntry>, QueryMeta)> {
        let path = format!("/v1/health/service/{}", service);
        let mut query: Vec<(&str, String)> = Vec::with_capacity(3);
        if options.wait_index > 0 {
            query.push(("index", options.wait_index.to_string()));
            query.push(("wait", format!("{}s", options.wait_time.as_secs().max(1))));
        }
        if passing_only {
            query.push(("passing", "true".to_string()));
        }

        let resp = self
            .send(self.request(reqwest::Method::GET, &path).query(&query))
            .await?;

        let last_index = resp
            .headers()
            .get(CONSUL_INDEX_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(0);

        let entries: Vec<ServiceEntry> = resp.json().await?;
        Ok((entries, QueryMeta { last_index }))
    }
}
