//! 错误代码定义
//!
//! 错误代码按类别分组，每个类别占用1000个代码范围：
//! - 1000-1999: 连接相关错误
//! - 6000-6999: 系统相关错误
//! - 7000-7999: 网络相关错误
//! - 8000-8999: 序列化相关错误
//! - 9000-9999: 通用错误
//! - 10000-10999: 服务发现与负载均衡错误

use serde::{Deserialize, Serialize};
use std::fmt;

/// 错误代码枚举
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u32)]
pub enum ErrorCode {
    // ============================================================
    // 连接相关错误 (1000-1999)
    // ============================================================
    ConnectionFailed = 1000,
    ConnectionTimeout = 1001,
    ConnectionClosed = 1002,

    // ============================================================
    // 系统相关错误 (6000-6999)
    // ============================================================
    InternalError = 6000,
    ServiceUnavailable = 6001,
    ConfigurationError = 6003,

    // ============================================================
    // 网络相关错误 (7000-7999)
    // ============================================================
    NetworkError = 7000,
    NetworkTimeout = 7001,

    // ============================================================
    // 序列化相关错误 (8000-8999)
    // ============================================================
    SerializationError = 8000,
    DeserializationError = 8001,

    // ============================================================
    // 通用错误 (9000-9999)
    // ============================================================
    GeneralError = 9000,
    InvalidParameter = 9001,
    OperationCancelled = 9002,
    OperationTimeout = 9004,

    // ============================================================
    // 服务发现与负载均衡错误 (10000-10999)
    // ============================================================
    ServiceNotFound = 10000,
    NoAvailableNode = 10001,
    NoSubConnAvailable = 10002,
    WatcherOvertime = 10003,
    InvalidEndpoint = 10004,
    RegistryUnavailable = 10005,
    WatcherStopped = 10006,
    ResolverNotFound = 10007,
    BalancerNotFound = 10008,

    UnknownError = 99999,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl ErrorCode {
    /// 获取错误代码的数字值
    #[inline]
    pub fn as_u32(&self) -> u32 {
        *self as u32
    }

    /// 错误代码的字符串形式
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ConnectionFailed => "CONNECTION_FAILED",
            ErrorCode::ConnectionTimeout => "CONNECTION_TIMEOUT",
            ErrorCode::ConnectionClosed => "CONNECTION_CLOSED",
            ErrorCode::InternalError => "INTERNAL_ERROR",
            ErrorCode::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            ErrorCode::ConfigurationError => "CONFIGURATION_ERROR",
            ErrorCode::NetworkError => "NETWORK_ERROR",
            ErrorCode::NetworkTimeout => "NETWORK_TIMEOUT",
            ErrorCode::SerializationError => "SERIALIZATION_ERROR",
            ErrorCode::DeserializationError => "DESERIALIZATION_ERROR",
            ErrorCode::GeneralError => "GENERAL_ERROR",
            ErrorCode::InvalidParameter => "INVALID_PARAMETER",
            ErrorCode::OperationCancelled => "OPERATION_CANCELLED",
            ErrorCode::OperationTimeout => "OPERATION_TIMEOUT",
            ErrorCode::ServiceNotFound => "SERVICE_NOT_FOUND",
            ErrorCode::NoAvailableNode => "NO_AVAILABLE_NODE",
            ErrorCode::NoSubConnAvailable => "NO_SUB_CONN_AVAILABLE",
            ErrorCode::WatcherOvertime => "WATCHER_OVERTIME",
            ErrorCode::InvalidEndpoint => "INVALID_ENDPOINT",
            ErrorCode::RegistryUnavailable => "REGISTRY_UNAVAILABLE",
            ErrorCode::WatcherStopped => "WATCHER_STOPPED",
            ErrorCode::ResolverNotFound => "RESOLVER_NOT_FOUND",
            ErrorCode::BalancerNotFound => "BALANCER_NOT_FOUND",
            ErrorCode::UnknownError => "UNKNOWN_ERROR",
        }
    }

    /// 获取错误类别
    pub fn category(&self) -> ErrorCategory {
        match self.as_u32() {
            1000..=1999 => ErrorCategory::Connection,
            6000..=6999 => ErrorCategory::System,
            7000..=7999 => ErrorCategory::Network,
            8000..=8999 => ErrorCategory::Serialization,
            10000..=10999 => ErrorCategory::Discovery,
            _ => ErrorCategory::General,
        }
    }

    /// 判断错误是否可重试
    ///
    /// 注册中心查询失败、连接失败、暂无可用子连接都属于瞬时错误
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorCode::ConnectionFailed
                | ErrorCode::ConnectionTimeout
                | ErrorCode::ServiceUnavailable
                | ErrorCode::NetworkError
                | ErrorCode::NetworkTimeout
                | ErrorCode::OperationTimeout
                | ErrorCode::NoSubConnAvailable
                | ErrorCode::RegistryUnavailable
        )
    }
}

/// 错误类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Connection,
    System,
    Network,
    Serialization,
    General,
    Discovery,
}
