//! 两次随机选择（power of two choices）
//!
//! 随机取两个不同节点，选权重较高的一个。落选节点超过 3 秒没有被选中时，
//! 强制选它一次以刷新其统计。

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::{Balancer, BalancerBuilder, DoneFn, WeightedNode};
use crate::error::{FlareError, Result};

const FORCE_PICK: Duration = Duration::from_secs(3);

pub struct P2cBalancer {
    rng: Mutex<StdRng>,
    picked: AtomicBool,
}

impl P2cBalancer {
    pub fn new() -> Self {
        Self::from_rng(StdRng::from_entropy())
    }

    /// 固定随机种子，结果可复现
    pub fn with_seed(seed: u64) -> Self {
        Self::from_rng(StdRng::seed_from_u64(seed))
    }

    fn from_rng(rng: StdRng) -> Self {
        Self {
            rng: Mutex::new(rng),
            picked: AtomicBool::new(false),
        }
    }

    fn pre_pick<'a>(
        &self,
        nodes: &'a [Arc<dyn WeightedNode>],
    ) -> (&'a Arc<dyn WeightedNode>, &'a Arc<dyn WeightedNode>) {
        let (a, mut b) = {
            let mut rng = self.rng.lock();
            (rng.gen_range(0..nodes.len()), rng.gen_range(0..nodes.len() - 1))
        };
        if b >= a {
            b += 1;
        }
        (&nodes[a], &nodes[b])
    }
}

impl Default for P2cBalancer {
    fn default() -> Self {
        Self::new()
    }
}

impl Balancer for P2cBalancer {
    fn pick(&self, nodes: &[Arc<dyn WeightedNode>]) -> Result<(Arc<dyn WeightedNode>, DoneFn)> {
        match nodes.len() {
            0 => return Err(FlareError::no_available_node()),
            1 => {
                let done = nodes[0].pick();
                return Ok((nodes[0].clone(), done));
            }
            _ => {}
        }

        let (node_a, node_b) = self.pre_pick(nodes);
        let (mut pc, upc) = if node_b.weight() > node_a.weight() {
            (node_b, node_a)
        } else {
            (node_a, node_b)
        };

        if upc.pick_elapsed() > FORCE_PICK
            && self
                .picked
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        {
            pc = upc;
            self.picked.store(false, Ordering::Release);
        }

        let done = pc.pick();
        Ok((pc.clone(), done))
    }
}

/// p2c 构建器，`seed` 为空时使用系统熵
#[derive(Debug, Default, Clone, Copy)]
pub struct P2cBuilder {
    pub seed: Option<u64>,
}

impl P2cBuilder {
    pub fn with_seed(seed: u64) -> Self {
        Self { seed: Some(seed) }
    }
}

impl BalancerBuilder for P2cBuilder {
    fn build(&self) -> Box<dyn Balancer> {
        match self.seed {
            Some(seed) => Box::new(P2cBalancer::with_seed(seed)),
            None => Box::new(P2cBalancer::new()),
        }
    }
}
