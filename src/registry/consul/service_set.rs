//! 单个服务名的成员快照与订阅者集合

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use arc_swap::ArcSwap;
use parking_lot::RwLock;
use tokio::sync::Notify;

use crate::registry::ServiceInstance;

/// 服务集合
///
/// 快照整体替换，读操作无锁；每个订阅者持有一个单许可的 [`Notify`]，
/// 连续多次广播在消费前只会留下一次唤醒。
pub struct ServiceSet {
    service_name: String,
    services: ArcSwap<Vec<ServiceInstance>>,
    watchers: RwLock<HashMap<u64, Arc<Notify>>>,
    next_watcher_id: AtomicU64,
}

impl ServiceSet {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            services: ArcSwap::from_pointee(Vec::new()),
            watchers: RwLock::new(HashMap::new()),
            next_watcher_id: AtomicU64::new(1),
        }
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// 当前快照
    pub fn snapshot(&self) -> Arc<Vec<ServiceInstance>> {
        self.services.load_full()
    }

    /// 替换快照并唤醒所有订阅者
    pub fn broadcast(&self, services: Vec<ServiceInstance>) {
        self.services.store(Arc::new(services));
        for event in self.watchers.read().values() {
            // 许可已存在时不会累加
            event.notify_one();
        }
    }

    /// 注册订阅者，返回订阅 ID 和唤醒信号
    pub fn subscribe(&self) -> (u64, Arc<Notify>) {
        let id = self.next_watcher_id.fetch_add(1, Ordering::Relaxed);
        let event = Arc::new(Notify::new());
        self.watchers.write().insert(id, event.clone());
        (id, event)
    }

    pub fn unsubscribe(&self, id: u64) {
        self.watchers.write().remove(&id);
    }

    pub fn watcher_count(&self) -> usize {
        self.watchers.read().len()
    }
}

impl std::fmt::Debug for ServiceSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceSet")
            .field("service_name", &self.service_name)
            .field("services", &self.services.load().len())
            .field("watchers", &self.watcher_count())
            .finish()
    }
}
