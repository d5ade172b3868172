//! 配置错误

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("配置解析失败: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("质量等级表无效: {0}")]
    InvalidTiers(String),

    #[error("配置值无效 {key}: {message}")]
    InvalidValue { key: String, message: String },
}
