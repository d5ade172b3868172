//! 编排器配置
//!
//! 进程启动时构建一次，之后只读。凭证缺失不会导致构建失败，
//! 对应的 Provider 只是被排除在调用之外。

use crate::app_utils::mask_optional;
use crate::errors::ConfigError;
use crate::tier::QualityTierTable;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const PROVIDER_TINYPNG: &str = "tinypng";
pub const PROVIDER_CLOUDINARY: &str = "cloudinary";

const DEFAULT_TINYPNG_BASE_URL: &str = "https://api.tinify.com";
const DEFAULT_CLOUDINARY_BASE_URL: &str = "https://api.cloudinary.com";

/// 编排器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct OrchestratorConfig {
    /// Provider 凭证
    pub credentials: ProviderCredentials,
    /// Provider 优先级（只决定尝试哪些 Provider，不决定结果偏好）
    pub provider_priority: Vec<String>,
    /// 单次转换调用超时（毫秒）
    pub transform_timeout_ms: u64,
    /// 下载超时（毫秒）
    pub download_timeout_ms: u64,
    pub retry: RetrySettings,
    pub circuit_breaker: CircuitBreakerSettings,
    /// 质量等级表
    pub tiers: QualityTierTable,
    /// 小于该大小的图片不建议压缩（由调用方执行）
    pub skip_below_bytes: u64,
    /// 产生赢家后是否中止其余尝试
    pub cancel_losing_attempts: bool,
    pub tinypng: TinifySettings,
    pub cloudinary: CloudinarySettings,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            credentials: ProviderCredentials::default(),
            provider_priority: vec![
                PROVIDER_TINYPNG.to_string(),
                PROVIDER_CLOUDINARY.to_string(),
            ],
            transform_timeout_ms: 30_000,
            download_timeout_ms: 20_000,
            retry: RetrySettings::default(),
            circuit_breaker: CircuitBreakerSettings::default(),
            tiers: QualityTierTable::default(),
            skip_below_bytes: 50 * 1024,
            cancel_losing_attempts: false,
            tinypng: TinifySettings::default(),
            cloudinary: CloudinarySettings::default(),
        }
    }
}

impl OrchestratorConfig {
    /// 从 YAML 解析配置，缺省字段使用默认值
    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// 默认配置叠加进程环境变量
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// 用环境变量覆盖配置
    ///
    /// `lookup` 返回变量值，方便测试时注入。
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(key) = read("TINYPNG_API_KEY") {
            self.credentials.tinypng_api_key = Some(key.trim().to_string());
        }

        let cloud_name = read("CLOUDINARY_CLOUD_NAME");
        let api_key = read("CLOUDINARY_API_KEY");
        let api_secret = read("CLOUDINARY_API_SECRET");
        if let (Some(cloud_name), Some(api_key), Some(api_secret)) = (cloud_name, api_key, api_secret)
        {
            self.credentials.cloudinary = Some(CloudinaryCredentials {
                cloud_name: cloud_name.trim().to_string(),
                api_key: api_key.trim().to_string(),
                api_secret: api_secret.trim().to_string(),
            });
        }

        if let Some(priority) = read("COMPRESSION_PROVIDER_PRIORITY") {
            self.provider_priority = priority
                .split(',')
                .map(|name| name.trim().to_lowercase())
                .filter(|name| !name.is_empty())
                .collect();
        }

        if let Some(value) = read("COMPRESSION_TIMEOUT_MS") {
            self.transform_timeout_ms = parse_u64("COMPRESSION_TIMEOUT_MS", &value)?;
        }
        if let Some(value) = read("COMPRESSION_DOWNLOAD_TIMEOUT_MS") {
            self.download_timeout_ms = parse_u64("COMPRESSION_DOWNLOAD_TIMEOUT_MS", &value)?;
        }

        self.validate()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.transform_timeout_ms == 0 {
            return Err(invalid("transformTimeoutMs", "必须大于 0"));
        }
        if self.download_timeout_ms == 0 {
            return Err(invalid("downloadTimeoutMs", "必须大于 0"));
        }
        if self.retry.max_attempts == 0 {
            return Err(invalid("retry.maxAttempts", "至少为 1"));
        }
        if self.retry.max_delay_ms < self.retry.base_delay_ms {
            return Err(invalid("retry.maxDelayMs", "不能小于 baseDelayMs"));
        }
        if self.circuit_breaker.failure_threshold == 0 {
            return Err(invalid("circuitBreaker.failureThreshold", "至少为 1"));
        }
        if self.circuit_breaker.successes_to_close == 0 {
            return Err(invalid("circuitBreaker.successesToClose", "至少为 1"));
        }
        if self.circuit_breaker.half_open_max_attempts == 0 {
            return Err(invalid("circuitBreaker.halfOpenMaxAttempts", "至少为 1"));
        }
        Ok(())
    }

    pub fn transform_timeout(&self) -> Duration {
        Duration::from_millis(self.transform_timeout_ms)
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_millis(self.download_timeout_ms)
    }
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.trim().parse::<u64>().map_err(|e| invalid(key, &e.to_string()))
}

fn invalid(key: &str, message: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        message: message.to_string(),
    }
}

/// Provider 凭证
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ProviderCredentials {
    pub tinypng_api_key: Option<String>,
    pub cloudinary: Option<CloudinaryCredentials>,
}

impl std::fmt::Debug for ProviderCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderCredentials")
            .field(
                "tinypng_api_key",
                &mask_optional(self.tinypng_api_key.as_deref()),
            )
            .field("cloudinary", &self.cloudinary)
            .finish()
    }
}

/// Cloudinary 凭证
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloudinaryCredentials {
    pub cloud_name: String,
    pub api_key: String,
    pub api_secret: String,
}

impl CloudinaryCredentials {
    pub fn is_complete(&self) -> bool {
        !self.cloud_name.trim().is_empty()
            && !self.api_key.trim().is_empty()
            && !self.api_secret.trim().is_empty()
    }
}

impl std::fmt::Debug for CloudinaryCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudinaryCredentials")
            .field("cloud_name", &self.cloud_name)
            .field("api_key", &mask_optional(Some(&self.api_key)))
            .field("api_secret", &"****")
            .finish()
    }
}

/// 重试配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RetrySettings {
    /// 单个 Provider 的总尝试次数（含首次）
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            base_delay_ms: 1_000,
            max_delay_ms: 5_000,
        }
    }
}

/// 熔断器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CircuitBreakerSettings {
    pub failure_threshold: u32,
    pub reset_timeout_ms: u64,
    pub half_open_max_attempts: u32,
    pub successes_to_close: u32,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            reset_timeout_ms: 60_000,
            half_open_max_attempts: 1,
            successes_to_close: 2,
        }
    }
}

/// TinyPNG 设置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TinifySettings {
    pub base_url: String,
    /// 每月免费额度
    pub monthly_limit: u64,
}

impl Default for TinifySettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_TINYPNG_BASE_URL.to_string(),
            monthly_limit: 500,
        }
    }
}

/// Cloudinary 设置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CloudinarySettings {
    pub base_url: String,
    /// 输出格式（f_ 参数）
    pub format: String,
    /// 临时资源目录
    pub folder: String,
    /// 配额缓存刷新间隔（秒）
    pub quota_refresh_secs: u64,
}

impl Default for CloudinarySettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_CLOUDINARY_BASE_URL.to_string(),
            format: "webp".to_string(),
            folder: "squashcast-tmp".to_string(),
            quota_refresh_secs: 300,
        }
    }
}
