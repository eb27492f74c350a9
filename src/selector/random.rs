//! 均匀随机选择

use std::sync::Arc;

use rand::Rng;

use super::{Balancer, BalancerBuilder, DoneFn, WeightedNode};
use crate::error::{FlareError, Result};

#[derive(Debug, Default)]
pub struct RandomBalancer;

impl Balancer for RandomBalancer {
    fn pick(&self, nodes: &[Arc<dyn WeightedNode>]) -> Result<(Arc<dyn WeightedNode>, DoneFn)> {
        if nodes.is_empty() {
            return Err(FlareError::no_available_node());
        }
        let selected = nodes[rand::thread_rng().gen_range(0..nodes.len())].clone();
        let done = selected.pick();
        Ok((selected, done))
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct RandomBuilder;

impl BalancerBuilder for RandomBuilder {
    fn build(&self) -> Box<dyn Balancer> {
        Box::new(RandomBalancer)
    }
}
