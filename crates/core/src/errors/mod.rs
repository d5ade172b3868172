//! 错误类型模块
//!
//! ## 模块结构
//! - `provider_error`: 单个 Provider 调用错误（ProviderError）
//! - `compression_error`: 编排器对外错误（CompressionError, ErrorCategory）
//! - `config_error`: 配置加载错误（ConfigError）

pub mod compression_error;
pub mod config_error;
pub mod provider_error;

pub use compression_error::{CompressionError, ErrorCategory, ProviderFailure};
pub use config_error::ConfigError;
pub use provider_error::ProviderError;
