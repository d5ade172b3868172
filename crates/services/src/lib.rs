//! 服务层
//!
//! 包含压缩编排器和运行指标收集。

pub mod compression_service;
pub mod metrics;

pub use compression_service::CompressionOrchestrator;
pub use metrics::{MetricsCollector, MetricsSnapshot};
