//! 静态权重节点，不收集调用结果

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

use crate::selector::{DoneFn, Node, WeightedNode, WeightedNodeBuilder, noop_done};

/// 元数据中没有权重时的默认值
pub const DEFAULT_WEIGHT: f64 = 100.0;

pub struct DirectNode {
    node: Arc<Node>,
    last_pick: Mutex<Option<Instant>>,
}

impl DirectNode {
    pub fn new(node: Arc<Node>) -> Self {
        Self {
            node,
            last_pick: Mutex::new(None),
        }
    }
}

impl WeightedNode for DirectNode {
    fn raw(&self) -> &Arc<Node> {
        &self.node
    }

    fn weight(&self) -> f64 {
        self.node
            .initial_weight()
            .map(|w| w as f64)
            .unwrap_or(DEFAULT_WEIGHT)
    }

    fn pick(&self) -> DoneFn {
        *self.last_pick.lock() = Some(Instant::now());
        noop_done()
    }

    fn pick_elapsed(&self) -> Duration {
        self.last_pick
            .lock()
            .map(|t| t.elapsed())
            .unwrap_or(Duration::MAX)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DirectNodeBuilder;

impl WeightedNodeBuilder for DirectNodeBuilder {
    fn build(&self, node: Arc<Node>) -> Arc<dyn WeightedNode> {
        Arc::new(DirectNode::new(node))
    }
}
