//! 负载均衡通道
//!
//! 实现 `tower::Service`，可以直接交给 tonic 生成的客户端使用：
//! `UserClient::new(balanced_channel)`。

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use futures::future::BoxFuture;
use http::HeaderMap;
use http_body::{Body as _, Frame, SizeHint};
use tokio::sync::watch;
use tokio::time::Instant;
use tonic::body::Body;
use tonic::metadata::MetadataMap;
use tonic::{Code, Status};
use tower::{BoxError, Service, ServiceExt};
use tracing::debug;

use super::pool::SubConnPool;
use crate::balancer::{DoneGuard, PickInfo, PickResult, Picker};
use crate::error::{ErrorCode, FlareError, Result};
use crate::resolver::Resolver;
use crate::selector::DoneInfo;

/// 最后一个通道副本释放时关闭解析器
struct ResolverGuard {
    resolver: Box<dyn Resolver>,
}

impl Drop for ResolverGuard {
    fn drop(&mut self) {
        self.resolver.close();
    }
}

/// 按调用选择子连接的通道
#[derive(Clone)]
pub struct BalancedChannel {
    target: Arc<str>,
    pool: Arc<SubConnPool>,
    picker_rx: watch::Receiver<Arc<dyn Picker>>,
    pick_timeout: Duration,
    resolver: Arc<ResolverGuard>,
}

impl BalancedChannel {
    pub(crate) fn new(
        target: impl Into<Arc<str>>,
        pool: Arc<SubConnPool>,
        resolver: Box<dyn Resolver>,
        pick_timeout: Duration,
    ) -> Self {
        Self {
            target: target.into(),
            picker_rx: pool.subscribe(),
            pool,
            pick_timeout,
            resolver: Arc::new(ResolverGuard { resolver }),
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    /// 连接池
    pub fn pool(&self) -> &Arc<SubConnPool> {
        &self.pool
    }

    /// 请求解析器立即刷新
    pub fn resolve_now(&self) {
        self.resolver.resolver.resolve_now();
    }

    /// 选择一个子连接
    ///
    /// Picker 报告没有可用子连接时等待下一次重建，最多等待 `pick_timeout`。
    pub async fn pick(&self, info: &PickInfo) -> Result<PickResult> {
        pick_with_wait(self.picker_rx.clone(), info, self.pick_timeout).await
    }
}

async fn pick_with_wait(
    mut picker_rx: watch::Receiver<Arc<dyn Picker>>,
    info: &PickInfo,
    wait: Duration,
) -> Result<PickResult> {
    let deadline = Instant::now() + wait;
    loop {
        let picker = picker_rx.borrow_and_update().clone();
        match picker.pick(info) {
            Ok(result) => return Ok(result),
            Err(e) if e.code() == Some(ErrorCode::NoSubConnAvailable) => {
                match tokio::time::timeout_at(deadline, picker_rx.changed()).await {
                    Ok(Ok(())) => continue,
                    Ok(Err(_)) => return Err(FlareError::connection_failed("balanced channel closed")),
                    Err(_) => return Err(e),
                }
            }
            Err(e) => return Err(e),
        }
    }
}

impl Service<http::Request<Body>> for BalancedChannel {
    type Response = http::Response<Body>;
    type Error = BoxError;
    type Future = BoxFuture<'static, std::result::Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<std::result::Result<(), Self::Error>> {
        // 等待可用子连接放在 call 中，受 pick_timeout 约束
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: http::Request<Body>) -> Self::Future {
        let picker_rx = self.picker_rx.clone();
        let wait = self.pick_timeout;

        Box::pin(async move {
            let info = PickInfo {
                method: req.uri().path().to_string(),
            };
            let picked = pick_with_wait(picker_rx, &info, wait)
                .await
                .map_err(|e| -> BoxError { Box::new(Status::from(e)) })?;

            let channel = picked.sub_conn.channel().clone();
            debug!(method = %info.method, addr = %picked.sub_conn.addr(), "Picked sub connection");

            match channel.oneshot(req).await {
                Ok(resp) => {
                    let mut done = picked.done;
                    // trailers-only 响应的 grpc-status 位于响应头，调用已经结束
                    if let Some(status) = Status::from_header_map(resp.headers()) {
                        done.finish(&DoneInfo {
                            err: (status.code() != Code::Ok).then_some(status),
                            reply_md: MetadataMap::from_headers(resp.headers().clone()),
                            bytes_sent: true,
                            bytes_received: true,
                        });
                        return Ok(resp);
                    }

                    let (parts, body) = resp.into_parts();
                    let body = DoneBody::new(body, &parts.headers, done);
                    Ok(http::Response::from_parts(parts, Body::new(body)))
                }
                Err(e) => {
                    let done = DoneInfo {
                        err: Some(Status::unavailable(e.to_string())),
                        ..Default::default()
                    };
                    picked.finish(&done);
                    Err(Box::new(e) as BoxError)
                }
            }
        })
    }
}

/// 在响应体结束时回传调用结果的包装
///
/// 收到 trailer 时按其中的 `grpc-status` 回传，没有 trailer 的结束视为成功，
/// 读完之前被释放时由 [`DoneGuard`] 按取消回传。
pub struct DoneBody {
    inner: Body,
    headers: HeaderMap,
    done: DoneGuard,
}

impl DoneBody {
    pub fn new(inner: Body, headers: &HeaderMap, done: DoneGuard) -> Self {
        Self {
            inner,
            headers: headers.clone(),
            done,
        }
    }

    fn complete(&mut self, trailers: Option<&HeaderMap>, err: Option<Status>) {
        if !self.done.is_pending() {
            return;
        }
        let mut reply_md = std::mem::take(&mut self.headers);
        if let Some(trailers) = trailers {
            reply_md.extend(trailers.clone());
        }
        self.done.finish(&DoneInfo {
            err,
            reply_md: MetadataMap::from_headers(reply_md),
            bytes_sent: true,
            bytes_received: true,
        });
    }
}

impl http_body::Body for DoneBody {
    type Data = Bytes;
    type Error = Status;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<std::result::Result<Frame<Bytes>, Status>>> {
        let this = self.get_mut();
        let polled = Pin::new(&mut this.inner).poll_frame(cx);
        match &polled {
            Poll::Ready(Some(Ok(frame))) => {
                if let Some(trailers) = frame.trailers_ref() {
                    let err = Status::from_header_map(trailers).filter(|s| s.code() != Code::Ok);
                    this.complete(Some(trailers), err);
                }
            }
            Poll::Ready(Some(Err(status))) => this.complete(None, Some(status.clone())),
            Poll::Ready(None) => this.complete(None, None),
            Poll::Pending => {}
        }
        polled
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

impl std::fmt::Debug for DoneBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DoneBody").field("done", &self.done).finish()
    }
}

impl std::fmt::Debug for BalancedChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BalancedChannel")
            .field("target", &self.target)
            .field("pool", &self.pool)
            .field("pick_timeout", &self.pick_timeout)
            .finish()
    }
}
