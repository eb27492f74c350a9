//! 节点选择
//!
//! 每次成员变化时用新的节点集合整体重建选择器状态，每次调用通过
//! [`Selector::select`] 选出一个节点，调用结束后经 [`DoneFn`] 回传结果，
//! 自适应算法（p2c + EWMA）据此调整负载估计。

pub mod builder;
pub mod node;
pub mod p2c;
pub mod random;
pub mod wrr;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tonic::metadata::MetadataMap;

use crate::error::Result;
use crate::registry::ServiceInstance;

pub use builder::{DefaultSelector, DefaultSelectorBuilder, SelectorKind};

/// 候选节点
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    scheme: String,
    address: String,
    service_name: String,
    version: String,
    metadata: HashMap<String, String>,
    initial_weight: Option<i64>,
    instance: Option<Arc<ServiceInstance>>,
}

impl Node {
    /// 从地址和原始实例构建，权重取自实例元数据中的 `weight`
    pub fn new(
        scheme: impl Into<String>,
        address: impl Into<String>,
        instance: Option<Arc<ServiceInstance>>,
    ) -> Self {
        let mut node = Self {
            scheme: scheme.into(),
            address: address.into(),
            service_name: String::new(),
            version: String::new(),
            metadata: HashMap::new(),
            initial_weight: None,
            instance: None,
        };
        if let Some(instance) = instance {
            node.service_name = instance.name.clone();
            node.version = instance.version.clone();
            node.metadata = instance.metadata.clone();
            node.initial_weight = instance.weight();
            node.instance = Some(instance);
        }
        node
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn metadata(&self) -> &HashMap<String, String> {
        &self.metadata
    }

    pub fn initial_weight(&self) -> Option<i64> {
        self.initial_weight
    }

    pub fn instance(&self) -> Option<&Arc<ServiceInstance>> {
        self.instance.as_ref()
    }
}

/// 调用结果
#[derive(Debug, Default)]
pub struct DoneInfo {
    /// 调用错误
    pub err: Option<tonic::Status>,
    /// 响应元数据（header + trailer）
    pub reply_md: MetadataMap,
    /// 是否已经发送过数据
    pub bytes_sent: bool,
    /// 是否已经收到过数据
    pub bytes_received: bool,
}

impl DoneInfo {
    pub fn ok() -> Self {
        Self {
            bytes_sent: true,
            bytes_received: true,
            ..Default::default()
        }
    }

    pub fn with_error(err: tonic::Status) -> Self {
        Self {
            err: Some(err),
            bytes_sent: true,
            ..Default::default()
        }
    }
}

/// 调用结束回调
pub type DoneFn = Box<dyn FnOnce(&DoneInfo) + Send>;

/// 不关心结果的回调
pub fn noop_done() -> DoneFn {
    Box::new(|_: &DoneInfo| {})
}

/// 带运行时统计的节点
pub trait WeightedNode: Send + Sync {
    /// 原始节点
    fn raw(&self) -> &Arc<Node>;

    /// 当前权重，越大越优先
    fn weight(&self) -> f64;

    /// 标记被选中，返回调用结束时的回调
    fn pick(&self) -> DoneFn;

    /// 距离上次被选中的时间
    fn pick_elapsed(&self) -> Duration;
}

/// 把节点包装成带统计的节点
pub trait WeightedNodeBuilder: Send + Sync {
    fn build(&self, node: Arc<Node>) -> Arc<dyn WeightedNode>;
}

/// 选择算法
pub trait Balancer: Send + Sync {
    fn pick(&self, nodes: &[Arc<dyn WeightedNode>]) -> Result<(Arc<dyn WeightedNode>, DoneFn)>;
}

pub trait BalancerBuilder: Send + Sync {
    fn build(&self) -> Box<dyn Balancer>;
}

/// 用新的节点集合重建状态
pub trait Rebalancer: Send + Sync {
    fn apply(&self, nodes: Vec<Arc<Node>>);
}

/// 节点选择器
pub trait Selector: Rebalancer {
    /// 选出一个节点；没有节点时返回 `NoAvailableNode`
    fn select(&self) -> Result<(Arc<Node>, DoneFn)>;
}

pub trait SelectorBuilder: Send + Sync {
    fn build(&self) -> Box<dyn Selector>;
}
