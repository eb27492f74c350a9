//! Flare Discovery Library
//!
//! Dynamic service discovery and client-side load balancing for gRPC services:
//! Consul registration with TTL heartbeats, long-poll membership watching with
//! coalesced fan-out, a resolver that turns membership into address lists, and
//! pluggable per-call node selection (random / wrr / p2c).

pub mod config;
pub mod error;
pub mod logging;

// 注册发现
pub mod registry;
pub mod resolver;

// 负载均衡
pub mod balancer;
pub mod selector;

// 客户端
pub mod client;

// Re-exports
pub use config::{ClientConfig, ConsulConfig, DiscoveryConfig, RegistryConfig, ResolverConfig};
pub use error::{ErrorCategory, ErrorCode, FlareError, InfraResult, Result};
pub use logging::init_logging;

pub use registry::consul::{
    Client as RegistryClient, ClientOptions, ConsulApi, ConsulRegistry, ConsulWatcher,
    HttpConsulApi, RegistryOptions, ServiceSet,
};
pub use registry::{Discovery, Registrar, ServiceInstance, Watcher};

pub use resolver::{
    Address, ClientConn, DirectBuilder, DiscoveryBuilder, DiscoveryResolver, Resolver,
    ResolverBuilder, ResolverState, Target,
};

pub use balancer::{
    BalancerRegistry, DoneGuard, ErrPicker, PickInfo, PickResult, Picker, PickerBuilder,
    SelectorPickerBuilder, SubConn,
};
pub use selector::{DoneFn, DoneInfo, Node, Selector, SelectorKind, WeightedNode};

pub use client::{BalancedChannel, ClientBuilder, SubConnPool};
