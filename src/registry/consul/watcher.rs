//! Consul 服务监听器

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use super::service_set::ServiceSet;
use crate::error::{FlareError, Result};
use crate::registry::{ServiceInstance, Watcher};

/// 绑定到某个 [`ServiceSet`] 的监听器
pub struct ConsulWatcher {
    id: u64,
    event: Arc<Notify>,
    set: Arc<ServiceSet>,
    cancel: CancellationToken,
}

impl ConsulWatcher {
    /// 在服务集合上创建监听器
    ///
    /// 集合已有非空快照时预先发出一次信号，首个 `next` 立即返回。
    pub fn new(set: Arc<ServiceSet>, parent: &CancellationToken) -> Self {
        let (id, event) = set.subscribe();
        if !set.snapshot().is_empty() {
            event.notify_one();
        }
        Self {
            id,
            event,
            set,
            cancel: parent.child_token(),
        }
    }

    pub fn service_name(&self) -> &str {
        self.set.service_name()
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

#[async_trait]
impl Watcher for ConsulWatcher {
    async fn next(&self) -> Result<Vec<ServiceInstance>> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(FlareError::watcher_stopped()),
            _ = self.event.notified() => Ok(self.set.snapshot().as_ref().clone()),
        }
    }

    fn stop(&self) -> Result<()> {
        self.cancel.cancel();
        self.set.unsubscribe(self.id);
        Ok(())
    }
}

impl Drop for ConsulWatcher {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}
