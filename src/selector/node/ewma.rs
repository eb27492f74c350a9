//! EWMA 负载估计节点
//!
//! 延迟和成功率都按指数加权移动平均更新，衰减常数为 600ms：
//! 两次回调间隔越长，历史值的权重越小。负载 = 平均延迟 × 并发数，
//! 长时间未返回的请求会通过预测延迟提前抬高负载。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tonic::Code;

use crate::selector::{DoneFn, DoneInfo, Node, WeightedNode, WeightedNodeBuilder};

/// 衰减常数
const TAU: Duration = Duration::from_millis(600);
/// 还没有延迟数据时的惩罚延迟
const PENALTY: Duration = Duration::from_secs(10);
/// 成功率满分
const FULL_SUCCESS: u64 = 1000;

const MIN_PREDICT_INTERVAL: Duration = Duration::from_millis(5);
const MAX_PREDICT_INTERVAL: Duration = Duration::from_millis(200);

/// 判断调用结果是否算作失败
pub type ErrHandler = Arc<dyn Fn(&tonic::Status) -> bool + Send + Sync>;

#[derive(Debug)]
struct Stats {
    /// 平均延迟（纳秒）
    lag: u64,
    /// 成功率 ×1000
    success: u64,
    /// 并发数，从 1 开始
    inflight: u64,
    /// 进行中请求的开始时间
    inflights: HashMap<u64, Instant>,
    /// 上一次回调时间
    stamp: Option<Instant>,
    predict_ts: Option<Instant>,
    /// 预测延迟（纳秒）
    predict: u64,
    reqs: u64,
    last_pick: Option<Instant>,
}

impl Stats {
    fn new() -> Self {
        Self {
            lag: 0,
            success: FULL_SUCCESS,
            inflight: 1,
            inflights: HashMap::new(),
            stamp: None,
            predict_ts: None,
            predict: 0,
            reqs: 0,
            last_pick: None,
        }
    }

    fn load(&mut self, now: Instant) -> u64 {
        let avg_lag = self.lag;
        let predict_interval = Duration::from_nanos(avg_lag / 5)
            .clamp(MIN_PREDICT_INTERVAL, MAX_PREDICT_INTERVAL);

        let due = self
            .predict_ts
            .is_none_or(|ts| now.saturating_duration_since(ts) > predict_interval);
        if due {
            self.predict_ts = Some(now);
            let (mut total, mut count) = (0u64, 0usize);
            for start in self.inflights.values() {
                let lag = nanos(now.saturating_duration_since(*start));
                if lag > avg_lag {
                    count += 1;
                    total = total.saturating_add(lag);
                }
            }
            self.predict = if count > self.inflights.len() / 2 + 1 {
                total / count as u64
            } else {
                0
            };
        }

        if avg_lag == 0 {
            nanos(PENALTY).saturating_mul(self.inflight)
        } else {
            avg_lag.max(self.predict).saturating_mul(self.inflight)
        }
    }
}

fn nanos(d: Duration) -> u64 {
    u64::try_from(d.as_nanos()).unwrap_or(u64::MAX)
}

/// 默认失败判定：超时、取消和服务不可用
fn is_failure(status: &tonic::Status) -> bool {
    matches!(
        status.code(),
        Code::DeadlineExceeded | Code::Cancelled | Code::Unavailable
    )
}

pub struct EwmaNode {
    node: Arc<Node>,
    stats: Arc<Mutex<Stats>>,
    err_handler: Option<ErrHandler>,
}

impl EwmaNode {
    pub fn new(node: Arc<Node>, err_handler: Option<ErrHandler>) -> Self {
        Self {
            node,
            stats: Arc::new(Mutex::new(Stats::new())),
            err_handler,
        }
    }

    /// 成功率 ×1000
    pub fn health(&self) -> u64 {
        self.stats.lock().success
    }

    /// 当前负载估计（纳秒 × 并发数）
    pub fn load(&self) -> u64 {
        self.stats.lock().load(Instant::now())
    }

    /// 平均延迟
    pub fn lag(&self) -> Duration {
        Duration::from_nanos(self.stats.lock().lag)
    }

    /// 累计被选中次数
    pub fn requests(&self) -> u64 {
        self.stats.lock().reqs
    }
}

impl WeightedNode for EwmaNode {
    fn raw(&self) -> &Arc<Node> {
        &self.node
    }

    fn weight(&self) -> f64 {
        let mut stats = self.stats.lock();
        let load = stats.load(Instant::now()).max(1);
        stats.success as f64 * nanos(Duration::from_secs(1)) as f64 / load as f64
    }

    fn pick(&self) -> DoneFn {
        let now = Instant::now();
        let seq = {
            let mut stats = self.stats.lock();
            stats.last_pick = Some(now);
            stats.inflight += 1;
            stats.reqs += 1;
            let seq = stats.reqs;
            stats.inflights.insert(seq, now);
            seq
        };

        let stats = self.stats.clone();
        let err_handler = self.err_handler.clone();
        Box::new(move |info: &DoneInfo| {
            let now = Instant::now();
            let mut stats = stats.lock();
            let start = stats.inflights.remove(&seq).unwrap_or(now);
            stats.inflight = stats.inflight.saturating_sub(1).max(1);

            // 首次回调没有上一次时间，新样本完全覆盖
            let mut w = match stats.stamp.replace(now) {
                Some(prev) => {
                    let td = now.saturating_duration_since(prev);
                    (-(td.as_nanos() as f64) / TAU.as_nanos() as f64).exp()
                }
                None => 0.0,
            };

            let lag = nanos(now.saturating_duration_since(start));
            if stats.lag == 0 {
                w = 0.0;
            }
            stats.lag = (stats.lag as f64 * w + lag as f64 * (1.0 - w)) as u64;

            let failed = match &info.err {
                Some(status) => match &err_handler {
                    Some(handler) => handler(status),
                    None => is_failure(status),
                },
                None => false,
            };
            let sample = if failed { 0 } else { FULL_SUCCESS };
            stats.success = (stats.success as f64 * w + sample as f64 * (1.0 - w)) as u64;
        })
    }

    fn pick_elapsed(&self) -> Duration {
        self.stats
            .lock()
            .last_pick
            .map(|t| t.elapsed())
            .unwrap_or(Duration::MAX)
    }
}

/// EWMA 节点构建器，可自定义失败判定
#[derive(Default, Clone)]
pub struct EwmaNodeBuilder {
    pub err_handler: Option<ErrHandler>,
}

impl EwmaNodeBuilder {
    pub fn with_err_handler<F>(handler: F) -> Self
    where
        F: Fn(&tonic::Status) -> bool + Send + Sync + 'static,
    {
        Self {
            err_handler: Some(Arc::new(handler)),
        }
    }
}

impl WeightedNodeBuilder for EwmaNodeBuilder {
    fn build(&self, node: Arc<Node>) -> Arc<dyn WeightedNode> {
        Arc::new(EwmaNode::new(node, self.err_handler.clone()))
    }
}
