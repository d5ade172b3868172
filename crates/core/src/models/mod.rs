//! 数据模型
//!
//! - `compression` - 压缩请求与结果
//! - `health` - Provider 健康状态与配额

mod compression;
mod health;

pub use compression::{CompressionRequest, CompressionResult};
pub use health::{HealthStatus, ProviderHealth, ProviderQuota};
