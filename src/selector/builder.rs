//! 默认选择器与算法枚举

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};

use super::node::direct::DirectNodeBuilder;
use super::node::ewma::EwmaNodeBuilder;
use super::p2c::P2cBuilder;
use super::random::RandomBuilder;
use super::wrr::WrrBuilder;
use super::{
    BalancerBuilder, Balancer, DoneFn, Node, Rebalancer, Selector, SelectorBuilder, WeightedNode,
    WeightedNodeBuilder,
};
use crate::error::{FlareError, Result};

/// 节点构建器 + 选择算法
///
/// 节点列表保存在 [`ArcSwap`] 中整体替换，进行中的选择继续使用旧列表。
pub struct DefaultSelector {
    node_builder: Arc<dyn WeightedNodeBuilder>,
    balancer: Box<dyn Balancer>,
    nodes: ArcSwap<Vec<Arc<dyn WeightedNode>>>,
}

impl DefaultSelector {
    pub fn new(node_builder: Arc<dyn WeightedNodeBuilder>, balancer: Box<dyn Balancer>) -> Self {
        Self {
            node_builder,
            balancer,
            nodes: ArcSwap::from_pointee(Vec::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Rebalancer for DefaultSelector {
    fn apply(&self, nodes: Vec<Arc<Node>>) {
        let weighted: Vec<Arc<dyn WeightedNode>> = nodes
            .into_iter()
            .map(|node| self.node_builder.build(node))
            .collect();
        self.nodes.store(Arc::new(weighted));
    }
}

impl Selector for DefaultSelector {
    fn select(&self) -> Result<(Arc<Node>, DoneFn)> {
        let candidates = self.nodes.load_full();
        if candidates.is_empty() {
            return Err(FlareError::no_available_node());
        }
        let (selected, done) = self.balancer.pick(&candidates)?;
        Ok((selected.raw().clone(), done))
    }
}

#[derive(Clone)]
pub struct DefaultSelectorBuilder {
    pub node: Arc<dyn WeightedNodeBuilder>,
    pub balancer: Arc<dyn BalancerBuilder>,
}

impl SelectorBuilder for DefaultSelectorBuilder {
    fn build(&self) -> Box<dyn Selector> {
        Box::new(DefaultSelector::new(self.node.clone(), self.balancer.build()))
    }
}

/// 内置选择算法
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SelectorKind {
    /// 均匀随机
    #[serde(rename = "random")]
    Random,
    /// 平滑加权轮询
    #[serde(rename = "wrr")]
    WeightedRoundRobin,
    /// 两次随机选择 + EWMA 负载估计
    #[default]
    #[serde(rename = "p2c")]
    P2c,
}

impl SelectorKind {
    pub const ALL: [SelectorKind; 3] = [
        SelectorKind::Random,
        SelectorKind::WeightedRoundRobin,
        SelectorKind::P2c,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            SelectorKind::Random => "random",
            SelectorKind::WeightedRoundRobin => "wrr",
            SelectorKind::P2c => "p2c",
        }
    }

    /// 对应的选择器构建器
    pub fn builder(&self) -> DefaultSelectorBuilder {
        match self {
            SelectorKind::Random => DefaultSelectorBuilder {
                node: Arc::new(DirectNodeBuilder),
                balancer: Arc::new(RandomBuilder),
            },
            SelectorKind::WeightedRoundRobin => DefaultSelectorBuilder {
                node: Arc::new(DirectNodeBuilder),
                balancer: Arc::new(WrrBuilder),
            },
            SelectorKind::P2c => DefaultSelectorBuilder {
                node: Arc::new(EwmaNodeBuilder::default()),
                balancer: Arc::new(P2cBuilder::default()),
            },
        }
    }
}

impl fmt::Display for SelectorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SelectorKind {
    type Err = FlareError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "random" => Ok(SelectorKind::Random),
            "wrr" | "weighted_round_robin" => Ok(SelectorKind::WeightedRoundRobin),
            "p2c" => Ok(SelectorKind::P2c),
            other => Err(FlareError::localized(
                crate::error::ErrorCode::BalancerNotFound,
                format!("unknown balancer: {}", other),
            )),
        }
    }
}
