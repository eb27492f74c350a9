//! 服务注册发现模块
//!
//! 定义服务实例和注册/发现/监听接口，Consul 为内置实现。

pub mod consul;
pub mod instance;
pub mod traits;

pub use consul::ConsulRegistry;
pub use instance::{ServiceInstance, WEIGHT_METADATA_KEY};
pub use traits::{Discovery, Registrar, Watcher};
