//! Squashcast - 多 Provider 图片压缩编排
//!
//! 通过多个可互换的第三方压缩服务压缩、缩放图片，
//! 用熔断、竞速、重试和请求去重容忍单个服务的不稳定。
//!
//! ## Workspace 结构
//!
//! - squashcast-core（数据模型、错误、配置、质量等级、日志）
//! - squashcast-infra（熔断、重试、超时、请求去重）
//! - squashcast-providers（Provider trait 与 TinyPNG / Cloudinary 实现）
//! - squashcast-services（编排器与指标）

use anyhow::Context;
use std::path::Path;

pub use squashcast_core::{
    logger, select_tier, CompressionError, CompressionRequest, CompressionResult, ConfigError,
    ErrorCategory, HealthStatus, OrchestratorConfig, ProviderError, ProviderFailure,
    ProviderHealth, ProviderQuota, QualityTier, QualityTierTable,
};
pub use squashcast_infra::{CircuitSnapshot, CircuitState};
pub use squashcast_providers::{
    build_providers, CloudinaryProvider, CompressionProvider, SharedProvider, TinifyProvider,
};
pub use squashcast_services::{CompressionOrchestrator, MetricsCollector, MetricsSnapshot};

/// 配置文件路径
pub const CONFIG_PATH_ENV: &str = "SQUASHCAST_CONFIG";
/// 日志级别
pub const LOG_LEVEL_ENV: &str = "SQUASHCAST_LOG";

/// 读取 YAML 配置（可选）并叠加环境变量
pub fn load_config(path: Option<&Path>) -> anyhow::Result<OrchestratorConfig> {
    let mut config = match path {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("读取配置文件失败: {}", path.display()))?;
            OrchestratorConfig::from_yaml_str(&content)
                .with_context(|| format!("解析配置文件失败: {}", path.display()))?
        }
        None => OrchestratorConfig::default(),
    };
    config
        .apply_env(|key| std::env::var(key).ok())
        .context("环境变量配置无效")?;
    Ok(config)
}

/// 初始化日志并从进程环境构建编排器
pub fn bootstrap_from_env() -> anyhow::Result<CompressionOrchestrator> {
    let level = std::env::var(LOG_LEVEL_ENV)
        .map(|value| logger::parse_level(&value))
        .unwrap_or(tracing::Level::INFO);
    logger::init_logging(level);

    let path = std::env::var_os(CONFIG_PATH_ENV).map(std::path::PathBuf::from);
    let config = load_config(path.as_deref())?;

    tracing::info!(
        "[BOOTSTRAP] squashcast v{} priority={:?}",
        squashcast_core::version(),
        config.provider_priority
    );
    Ok(CompressionOrchestrator::new(config))
}
