//! Provider 能力 trait

use async_trait::async_trait;
use squashcast_core::{
    CompressionRequest, CompressionResult, ProviderError, ProviderHealth, ProviderQuota,
};
use std::sync::Arc;

/// 压缩 Provider
///
/// 所有实现都必须满足：
/// - `is_configured` 不会失败，只反映凭证是否齐全；
/// - `compress` 失败时返回已分类的 [`ProviderError`]，成功时不会返回残缺数据；
/// - `check_health` 只做轻量探测，不消耗有意义的配额。
#[async_trait]
pub trait CompressionProvider: Send + Sync {
    /// Provider ID
    fn id(&self) -> &str;

    fn is_configured(&self) -> bool;

    async fn compress(
        &self,
        request: &CompressionRequest,
    ) -> Result<CompressionResult, ProviderError>;

    async fn check_health(&self) -> ProviderHealth;

    async fn get_quota(&self) -> ProviderQuota;

    /// 用上游报告的用量更新本地配额
    fn update_quota(&self, used: u64);

    /// 脱敏后的调试信息
    fn debug_info(&self) -> serde_json::Value;
}

pub type SharedProvider = Arc<dyn CompressionProvider>;
