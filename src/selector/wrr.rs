//! 平滑加权轮询（nginx 算法）
//!
//! 每轮所有节点的当前权重加上自身权重，选当前权重最大的节点，
//! 再把它的当前权重减去总权重。

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use super::{Balancer, BalancerBuilder, DoneFn, WeightedNode};
use crate::error::{FlareError, Result};

#[derive(Debug, Default)]
pub struct WrrBalancer {
    current_weight: Mutex<HashMap<String, f64>>,
}

impl Balancer for WrrBalancer {
    fn pick(&self, nodes: &[Arc<dyn WeightedNode>]) -> Result<(Arc<dyn WeightedNode>, DoneFn)> {
        let selected = {
            let mut current_weight = self.current_weight.lock();
            let mut total_weight = 0.0;
            let mut selected: Option<(&Arc<dyn WeightedNode>, f64)> = None;

            for node in nodes {
                let weight = node.weight();
                total_weight += weight;
                let cwt = current_weight
                    .entry(node.raw().address().to_string())
                    .or_insert(0.0);
                *cwt += weight;
                if selected.is_none_or(|(_, best)| best < *cwt) {
                    selected = Some((node, *cwt));
                }
            }

            let (node, weight) = selected.ok_or_else(FlareError::no_available_node)?;
            current_weight.insert(node.raw().address().to_string(), weight - total_weight);
            node.clone()
        };

        let done = selected.pick();
        Ok((selected, done))
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct WrrBuilder;

impl BalancerBuilder for WrrBuilder {
    fn build(&self) -> Box<dyn Balancer> {
        Box::new(WrrBalancer::default())
    }
}
