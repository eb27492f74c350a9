//! Consul 注册中心实现

pub mod api;
pub mod client;
pub mod registry;
pub mod service_set;
pub mod watcher;

pub use api::{ConsulApi, HttpConsulApi};
pub use client::{Client, ClientOptions, ServiceResolver, default_resolver};
pub use registry::{ConsulRegistry, RegistryOptions};
pub use service_set::ServiceSet;
pub use watcher::ConsulWatcher;
