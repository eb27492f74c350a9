//! Flare 统一错误类型

use super::code::ErrorCode;
use thiserror::Error;

/// Flare 统一错误类型
#[derive(Error, Debug, Clone)]
pub enum FlareError {
    /// 带错误代码的业务错误
    #[error("错误 [{code}] {reason}", code = .code.as_str())]
    Localized {
        code: ErrorCode,
        reason: String,
        details: Option<String>,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// 系统错误（用于内部错误，不暴露给用户）
    #[error("系统错误: {0}")]
    System(String),

    /// IO 错误
    #[error("IO 错误: {0}")]
    Io(String),
}

impl FlareError {
    /// 创建带错误代码的错误
    pub fn localized(code: ErrorCode, reason: impl Into<String>) -> Self {
        FlareError::Localized {
            code,
            reason: reason.into(),
            details: None,
            timestamp: chrono::Utc::now(),
        }
    }

    /// 附加错误详情
    pub fn with_details(self, details: impl Into<String>) -> Self {
        match self {
            FlareError::Localized {
                code,
                reason,
                timestamp,
                ..
            } => FlareError::Localized {
                code,
                reason,
                details: Some(details.into()),
                timestamp,
            },
            other => other,
        }
    }

    /// 创建系统错误
    pub fn system(msg: impl Into<String>) -> Self {
        FlareError::System(msg.into())
    }

    /// 创建 IO 错误
    pub fn io(msg: impl Into<String>) -> Self {
        FlareError::Io(msg.into())
    }

    // ============================================================
    // 便捷方法：连接与网络
    // ============================================================

    /// 创建连接失败错误
    pub fn connection_failed(reason: impl Into<String>) -> Self {
        Self::localized(ErrorCode::ConnectionFailed, reason)
    }

    /// 创建操作超时错误
    pub fn timeout(reason: impl Into<String>) -> Self {
        Self::localized(ErrorCode::OperationTimeout, reason)
    }

    /// 创建操作取消错误
    pub fn cancelled(reason: impl Into<String>) -> Self {
        Self::localized(ErrorCode::OperationCancelled, reason)
    }

    /// 创建配置错误
    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::localized(ErrorCode::ConfigurationError, reason)
    }

    /// 创建序列化错误
    pub fn serialization_error(reason: impl Into<String>) -> Self {
        Self::localized(ErrorCode::SerializationError, reason)
    }

    /// 创建反序列化错误
    pub fn deserialization_error(reason: impl Into<String>) -> Self {
        Self::localized(ErrorCode::DeserializationError, reason)
    }

    // ============================================================
    // 便捷方法：服务发现
    // ============================================================

    /// 服务在缓存和注册中心中都不存在
    pub fn service_not_found(service: impl AsRef<str>) -> Self {
        Self::localized(
            ErrorCode::ServiceNotFound,
            format!("service {} not found in registry", service.as_ref()),
        )
    }

    /// 选择器中没有节点
    pub fn no_available_node() -> Self {
        Self::localized(ErrorCode::NoAvailableNode, "no_available_node")
    }

    /// 当前没有就绪的子连接，调用方应等待新的 picker
    pub fn no_sub_conn_available() -> Self {
        Self::localized(ErrorCode::NoSubConnAvailable, "no SubConn is available")
    }

    /// 创建 watcher 超时
    pub fn watcher_overtime() -> Self {
        Self::localized(ErrorCode::WatcherOvertime, "discovery create watcher overtime")
    }

    /// watcher 已停止
    pub fn watcher_stopped() -> Self {
        Self::localized(ErrorCode::WatcherStopped, "watcher stopped")
    }

    /// 端点 URL 非法
    pub fn invalid_endpoint(endpoint: impl AsRef<str>, reason: impl AsRef<str>) -> Self {
        Self::localized(
            ErrorCode::InvalidEndpoint,
            format!("invalid endpoint {}: {}", endpoint.as_ref(), reason.as_ref()),
        )
    }

    /// 注册中心请求失败
    pub fn registry_unavailable(reason: impl Into<String>) -> Self {
        Self::localized(ErrorCode::RegistryUnavailable, reason)
    }

    // ============================================================
    // 信息获取方法
    // ============================================================

    /// 获取错误代码
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            FlareError::Localized { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// 获取错误原因
    pub fn reason(&self) -> &str {
        match self {
            FlareError::Localized { reason, .. } => reason,
            FlareError::System(msg) => msg,
            FlareError::Io(msg) => msg,
        }
    }

    /// 获取错误详情
    pub fn details(&self) -> Option<&str> {
        match self {
            FlareError::Localized { details, .. } => details.as_deref(),
            _ => None,
        }
    }

    /// 判断是否为可重试的错误
    pub fn is_retryable(&self) -> bool {
        self.code().map(|code| code.is_retryable()).unwrap_or(false)
    }

    /// 判断是否由取消（watcher 停止或生命周期结束）引起
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self.code(),
            Some(ErrorCode::OperationCancelled) | Some(ErrorCode::WatcherStopped)
        )
    }
}

/// 结果类型别名
pub type Result<T> = std::result::Result<T, FlareError>;
