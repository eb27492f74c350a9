//! 错误类型转换实现

use super::{ErrorCode, FlareError};
use std::io;

impl From<io::Error> for FlareError {
    fn from(err: io::Error) -> Self {
        FlareError::io(err.to_string())
    }
}

impl From<serde_json::Error> for FlareError {
    fn from(err: serde_json::Error) -> Self {
        FlareError::serialization_error(format!("JSON 序列化错误: {}", err))
    }
}

impl From<toml::de::Error> for FlareError {
    fn from(err: toml::de::Error) -> Self {
        FlareError::configuration(format!("TOML 解析错误: {}", err))
    }
}

impl From<url::ParseError> for FlareError {
    fn from(err: url::ParseError) -> Self {
        FlareError::localized(ErrorCode::InvalidEndpoint, err.to_string())
    }
}

impl From<reqwest::Error> for FlareError {
    fn from(err: reqwest::Error) -> Self {
        let code = if err.is_timeout() {
            ErrorCode::NetworkTimeout
        } else if err.is_connect() {
            ErrorCode::ConnectionFailed
        } else if err.is_decode() {
            ErrorCode::DeserializationError
        } else {
            ErrorCode::RegistryUnavailable
        };
        FlareError::localized(code, err.to_string())
    }
}

impl From<tonic::Status> for FlareError {
    fn from(status: tonic::Status) -> Self {
        let error_code = match status.code() {
            tonic::Code::InvalidArgument => ErrorCode::InvalidParameter,
            tonic::Code::NotFound => ErrorCode::ServiceNotFound,
            tonic::Code::Internal => ErrorCode::InternalError,
            tonic::Code::Unavailable => ErrorCode::ServiceUnavailable,
            tonic::Code::DeadlineExceeded => ErrorCode::OperationTimeout,
            tonic::Code::Cancelled => ErrorCode::OperationCancelled,
            _ => ErrorCode::UnknownError,
        };

        FlareError::localized(error_code, status.message())
    }
}

impl From<FlareError> for tonic::Status {
    fn from(err: FlareError) -> Self {
        let message = err.to_string();
        match err.code() {
            Some(ErrorCode::NoAvailableNode)
            | Some(ErrorCode::NoSubConnAvailable)
            | Some(ErrorCode::ServiceUnavailable)
            | Some(ErrorCode::RegistryUnavailable)
            | Some(ErrorCode::ConnectionFailed) => tonic::Status::unavailable(message),
            Some(ErrorCode::OperationTimeout)
            | Some(ErrorCode::WatcherOvertime)
            | Some(ErrorCode::NetworkTimeout) => tonic::Status::deadline_exceeded(message),
            Some(ErrorCode::ServiceNotFound) => tonic::Status::not_found(message),
            Some(ErrorCode::InvalidEndpoint) | Some(ErrorCode::InvalidParameter) => {
                tonic::Status::invalid_argument(message)
            }
            Some(ErrorCode::OperationCancelled) | Some(ErrorCode::WatcherStopped) => {
                tonic::Status::cancelled(message)
            }
            _ => tonic::Status::internal(message),
        }
    }
}
