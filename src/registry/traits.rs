//! 服务注册发现 Trait 定义

use std::sync::Arc;

use async_trait::async_trait;

use super::instance::ServiceInstance;
use crate::error::Result;

/// 服务注册接口
#[async_trait]
pub trait Registrar: Send + Sync {
    /// 注册服务实例
    async fn register(&self, instance: &ServiceInstance) -> Result<()>;

    /// 注销服务实例
    async fn deregister(&self, instance: &ServiceInstance) -> Result<()>;
}

/// 服务发现接口
#[async_trait]
pub trait Discovery: Send + Sync {
    /// 获取服务实例列表，缓存和注册中心都没有结果时返回 `ServiceNotFound`
    async fn get_service(&self, name: &str) -> Result<Vec<ServiceInstance>>;

    /// 监听服务实例变化
    async fn watch(&self, name: &str) -> Result<Arc<dyn Watcher>>;
}

/// 服务监听器
///
/// 拉取式接口：`next` 阻塞直到有新的快照，多次变化会被合并为一次唤醒。
#[async_trait]
pub trait Watcher: Send + Sync {
    /// 等待下一次变化，返回最新快照的副本
    ///
    /// 监听器停止后返回 `WatcherStopped` 错误
    async fn next(&self) -> Result<Vec<ServiceInstance>>;

    /// 停止监听，可重复调用
    fn stop(&self) -> Result<()>;
}
