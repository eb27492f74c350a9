//! 测试公共工具：内存版 Consul agent

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use flare_discovery::error::{FlareError, Result};
use flare_discovery::registry::consul::api::{
    AgentService, AgentServiceRegistration, CheckStatus, ConsulApi, QueryMeta, QueryOptions,
    ServiceAddress, ServiceEntry,
};
use flare_discovery::registry::ServiceInstance;
use parking_lot::Mutex;
use tokio::sync::Notify;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedQuery {
    pub service: String,
    pub wait_index: u64,
    pub passing_only: bool,
}

#[derive(Default)]
struct State {
    index: u64,
    services: HashMap<String, Vec<ServiceEntry>>,
}

/// 内存实现，记录所有调用；阻塞查询在索引变化或等待超时后返回
#[derive(Default)]
pub struct MockConsulApi {
    state: Mutex<State>,
    changed: Notify,
    pub registrations: Mutex<Vec<AgentServiceRegistration>>,
    pub deregistrations: Mutex<Vec<String>>,
    pub ttl_updates: Mutex<Vec<(String, CheckStatus)>>,
    pub queries: Mutex<Vec<RecordedQuery>>,
    fail_queries: AtomicUsize,
    fail_ttl: AtomicBool,
}

impl MockConsulApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(State {
                index: 1,
                services: HashMap::new(),
            }),
            ..Default::default()
        })
    }

    /// 替换服务的实例列表并推进索引
    pub fn set_service(&self, name: &str, instances: &[ServiceInstance]) {
        {
            let mut state = self.state.lock();
            state.index += 1;
            state
                .services
                .insert(name.to_string(), instances.iter().map(entry_for).collect());
        }
        self.changed.notify_waiters();
    }

    pub fn index(&self) -> u64 {
        self.state.lock().index
    }

    /// 接下来的 `n` 次查询失败
    pub fn fail_next_queries(&self, n: usize) {
        self.fail_queries.store(n, Ordering::SeqCst);
    }

    pub fn fail_ttl(&self, fail: bool) {
        self.fail_ttl.store(fail, Ordering::SeqCst);
    }

    pub fn query_count(&self) -> usize {
        self.queries.lock().len()
    }

    pub fn ttl_count(&self) -> usize {
        self.ttl_updates.lock().len()
    }

    fn current(&self, service: &str) -> (Vec<ServiceEntry>, QueryMeta) {
        let state = self.state.lock();
        let entries = state.services.get(service).cloned().unwrap_or_default();
        (
            entries,
            QueryMeta {
                last_index: state.index,
            },
        )
    }
}

#[async_trait]
impl ConsulApi for MockConsulApi {
    async fn service_register(&self, registration: &AgentServiceRegistration) -> Result<()> {
        self.registrations.lock().push(registration.clone());
        Ok(())
    }

    async fn service_deregister(&self, service_id: &str) -> Result<()> {
        self.deregistrations.lock().push(service_id.to_string());
        Ok(())
    }

    async fn update_ttl(&self, check_id: &str, _output: &str, status: CheckStatus) -> Result<()> {
        self.ttl_updates.lock().push((check_id.to_string(), status));
        if self.fail_ttl.load(Ordering::SeqCst) {
            return Err(FlareError::registry_unavailable("ttl update rejected"));
        }
        Ok(())
    }

    async fn health_service(
        &self,
        service: &str,
        passing_only: bool,
        options: &QueryOptions,
    ) -> Result<(Vec<ServiceEntry>, QueryMeta)> {
        self.queries.lock().push(RecordedQuery {
            service: service.to_string(),
            wait_index: options.wait_index,
            passing_only,
        });

        let remaining = self.fail_queries.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_queries.store(remaining - 1, Ordering::SeqCst);
            return Err(FlareError::registry_unavailable("consul agent unreachable"));
        }

        if options.wait_index == 0 {
            return Ok(self.current(service));
        }

        let notified = self.changed.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        if self.index() != options.wait_index {
            return Ok(self.current(service));
        }

        tokio::select! {
            _ = notified => {}
            _ = tokio::time::sleep(options.wait_time) => {}
        }
        Ok(self.current(service))
    }
}

/// 按默认解析规则构造 Consul 条目
pub fn entry_for(instance: &ServiceInstance) -> ServiceEntry {
    let mut tagged_addresses = BTreeMap::new();
    for endpoint in &instance.endpoints {
        if let Some((scheme, _)) = endpoint.split_once("://") {
            tagged_addresses.insert(
                scheme.to_string(),
                ServiceAddress {
                    address: endpoint.clone(),
                    port: 0,
                },
            );
        }
    }

    ServiceEntry {
        service: AgentService {
            id: instance.id.clone(),
            service: instance.name.clone(),
            tags: Some(vec![format!("version={}", instance.version)]),
            meta: Some(instance.metadata.clone()),
            address: String::new(),
            port: 0,
            tagged_addresses: Some(tagged_addresses),
        },
        checks: Vec::new(),
    }
}

pub fn grpc_instance(name: &str, id: &str, addr: &str) -> ServiceInstance {
    ServiceInstance::new(name)
        .with_id(id)
        .with_version("v1.0.0")
        .with_endpoint(format!("grpc://{}", addr))
}

/// 轮询等待条件成立
pub async fn wait_until<F>(timeout: Duration, mut cond: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    cond()
}

/// 记录解析器推送的连接管理器
#[derive(Default)]
pub struct SpyClientConn {
    pub states: Mutex<Vec<flare_discovery::resolver::ResolverState>>,
}

impl SpyClientConn {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn update_count(&self) -> usize {
        self.states.lock().len()
    }

    /// 最近一次推送的地址
    pub fn last_addrs(&self) -> Vec<String> {
        self.states
            .lock()
            .last()
            .map(|s| s.addresses.iter().map(|a| a.addr.clone()).collect())
            .unwrap_or_default()
    }
}

impl flare_discovery::resolver::ClientConn for SpyClientConn {
    fn update_state(&self, state: flare_discovery::resolver::ResolverState) -> Result<()> {
        self.states.lock().push(state);
        Ok(())
    }
}
