//! Flare Discovery 错误处理模块
//!
//! 提供统一的错误类型、错误代码分类和错误转换

pub mod code;
pub mod conversions;
pub mod flare_error;

pub use code::{ErrorCategory, ErrorCode};
pub use flare_error::{FlareError, Result};

/// 基础设施层默认使用的结果类型
pub type InfraResult<T> = anyhow::Result<T>;
