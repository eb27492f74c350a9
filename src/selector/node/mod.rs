//! 节点统计实现

pub mod direct;
pub mod ewma;

pub use direct::{DirectNode, DirectNodeBuilder};
pub use ewma::{EwmaNode, EwmaNodeBuilder};
