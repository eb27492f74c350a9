//! 日志初始化

use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::error::InfraResult;

/// 安装全局 tracing subscriber
///
/// `RUST_LOG` 优先，未设置时使用 `default_filter`。`log` crate 的记录通过
/// tracing-log 转发。已有全局 subscriber 时返回 `Ok(false)`，可重复调用。
pub fn init_logging(default_filter: &str, json: bool) -> InfraResult<bool> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(default_filter))?;

    let registry = tracing_subscriber::registry().with(filter);
    let installed = if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_target(true))
            .try_init()
            .is_ok()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .try_init()
            .is_ok()
    };

    if installed {
        // 其他 log 记录器已安装时忽略
        let _ = tracing_log::LogTracer::init();
    }
    Ok(installed)
}
