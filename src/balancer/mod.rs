//! 负载均衡 Picker
//!
//! 就绪连接集合每次变化时通过 [`PickerBuilder`] 重建 Picker；
//! 每次调用由 Picker 选出子连接，并把调用结果回传给选择器。

pub mod registry;

use std::collections::HashMap;
use std::sync::Arc;

use tonic::transport::Channel;

use crate::error::{FlareError, Result};
use crate::resolver::Address;
use crate::selector::{DoneFn, DoneInfo, Node, SelectorBuilder, SelectorKind};

pub use registry::BalancerRegistry;

/// 节点协议
const NODE_SCHEME: &str = "grpc";

/// 一个就绪的子连接
#[derive(Debug, Clone)]
pub struct SubConn {
    address: Address,
    channel: Channel,
}

impl SubConn {
    pub fn new(address: Address, channel: Channel) -> Self {
        Self { address, channel }
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn addr(&self) -> &str {
        &self.address.addr
    }

    pub fn channel(&self) -> &Channel {
        &self.channel
    }
}

/// 构建 Picker 的输入
#[derive(Debug, Clone, Default)]
pub struct PickerBuildInfo {
    pub ready: Vec<SubConn>,
}

/// 单次调用信息
#[derive(Debug, Clone, Default)]
pub struct PickInfo {
    /// 完整方法路径，例如 `/user.v1.User/GetUser`
    pub method: String,
}

/// 调用结果回传
///
/// 回调最多执行一次；没有回传就被释放时按 `Cancelled` 回传，
/// 保证节点的并发计数不会因为调用方放弃请求而泄漏。
pub struct DoneGuard {
    done: Option<DoneFn>,
}

impl DoneGuard {
    pub fn new(done: DoneFn) -> Self {
        Self { done: Some(done) }
    }

    /// 不需要回传的调用
    pub fn noop() -> Self {
        Self { done: None }
    }

    /// 回调还没有执行
    pub fn is_pending(&self) -> bool {
        self.done.is_some()
    }

    pub fn finish(&mut self, info: &DoneInfo) {
        if let Some(done) = self.done.take() {
            done(info);
        }
    }
}

impl Drop for DoneGuard {
    fn drop(&mut self) {
        if self.is_pending() {
            self.finish(&DoneInfo {
                err: Some(tonic::Status::cancelled("call dropped before completion")),
                ..Default::default()
            });
        }
    }
}

impl std::fmt::Debug for DoneGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DoneGuard")
            .field("pending", &self.is_pending())
            .finish()
    }
}

/// 选择结果
#[derive(Debug)]
pub struct PickResult {
    pub sub_conn: SubConn,
    /// 调用结束时回传结果
    pub done: DoneGuard,
}

impl PickResult {
    /// 回传调用结果
    pub fn finish(mut self, info: &DoneInfo) {
        self.done.finish(info);
    }
}

/// 每次调用的选择入口
pub trait Picker: Send + Sync {
    fn pick(&self, info: &PickInfo) -> Result<PickResult>;
}

/// 就绪连接变化时构建新的 Picker
pub trait PickerBuilder: Send + Sync {
    fn build(&self, info: PickerBuildInfo) -> Arc<dyn Picker>;
}

/// 总是返回同一个错误的 Picker
#[derive(Debug, Clone)]
pub struct ErrPicker {
    err: FlareError,
}

impl ErrPicker {
    pub fn new(err: FlareError) -> Self {
        Self { err }
    }
}

impl Picker for ErrPicker {
    fn pick(&self, _info: &PickInfo) -> Result<PickResult> {
        Err(self.err.clone())
    }
}

/// 基于 [`Selector`](crate::selector::Selector) 的 PickerBuilder
///
/// 每次构建都创建新的选择器并用全部就绪连接初始化，不保留旧的统计。
#[derive(Clone)]
pub struct SelectorPickerBuilder {
    builder: Arc<dyn SelectorBuilder>,
}

impl SelectorPickerBuilder {
    pub fn new(builder: Arc<dyn SelectorBuilder>) -> Self {
        Self { builder }
    }

    pub fn from_kind(kind: SelectorKind) -> Self {
        Self::new(Arc::new(kind.builder()))
    }
}

impl PickerBuilder for SelectorPickerBuilder {
    fn build(&self, info: PickerBuildInfo) -> Arc<dyn Picker> {
        if info.ready.is_empty() {
            return Arc::new(ErrPicker::new(FlareError::no_sub_conn_available()));
        }

        let mut nodes = Vec::with_capacity(info.ready.len());
        let mut sub_conns = HashMap::with_capacity(info.ready.len());
        for sub_conn in info.ready {
            nodes.push(Arc::new(Node::new(
                NODE_SCHEME,
                sub_conn.addr(),
                sub_conn.address.instance.clone(),
            )));
            sub_conns.insert(sub_conn.addr().to_string(), sub_conn);
        }

        let selector = self.builder.build();
        selector.apply(nodes);
        Arc::new(SelectorPicker {
            selector,
            sub_conns,
        })
    }
}

struct SelectorPicker {
    selector: Box<dyn crate::selector::Selector>,
    sub_conns: HashMap<String, SubConn>,
}

impl Picker for SelectorPicker {
    fn pick(&self, _info: &PickInfo) -> Result<PickResult> {
        let (node, done) = self.selector.select()?;
        let sub_conn = self
            .sub_conns
            .get(node.address())
            .cloned()
            .ok_or_else(FlareError::no_sub_conn_available)?;
        Ok(PickResult {
            sub_conn,
            done: DoneGuard::new(done),
        })
    }
}
