//! 核心类型和工具模块
//!
//! 包含数据模型、错误类型、配置、质量等级选择和日志初始化等基础功能

pub mod app_utils;
pub mod config;
pub mod errors;
pub mod logger;
pub mod models;
pub mod tier;

pub use config::{
    CircuitBreakerSettings, CloudinaryCredentials, CloudinarySettings, OrchestratorConfig,
    ProviderCredentials, RetrySettings, TinifySettings, PROVIDER_CLOUDINARY, PROVIDER_TINYPNG,
};
pub use errors::{CompressionError, ConfigError, ErrorCategory, ProviderError, ProviderFailure};
pub use models::{
    CompressionRequest, CompressionResult, HealthStatus, ProviderHealth, ProviderQuota,
};
pub use tier::{select_tier, QualityTier, QualityTierTable};

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
