//! Provider 发现
//!
//! 按配置的优先级构建 Provider 列表。未知名称记录警告后忽略，
//! 优先级中遗漏的已知 Provider 追加到末尾。

use crate::cloudinary::CloudinaryProvider;
use crate::tinify::TinifyProvider;
use crate::traits::SharedProvider;
use squashcast_core::{OrchestratorConfig, PROVIDER_CLOUDINARY, PROVIDER_TINYPNG};
use squashcast_infra::{TimeoutConfig, TimeoutController};
use std::sync::Arc;

const KNOWN_PROVIDERS: [&str; 2] = [PROVIDER_TINYPNG, PROVIDER_CLOUDINARY];

/// 解析后的 Provider 顺序
fn resolve_order(priority: &[String]) -> Vec<&'static str> {
    let mut order: Vec<&'static str> = Vec::with_capacity(KNOWN_PROVIDERS.len());

    for name in priority {
        let normalized = name.trim().to_ascii_lowercase();
        match KNOWN_PROVIDERS.iter().find(|known| **known == normalized) {
            Some(known) if !order.contains(known) => order.push(known),
            Some(_) => {}
            None => tracing::warn!("[PROVIDERS] 忽略未知 Provider: {}", name),
        }
    }

    for known in KNOWN_PROVIDERS {
        if !order.contains(&known) {
            order.push(known);
        }
    }
    order
}

/// 构建全部 Provider（包括未配置的，编排器据此报告健康状态）
pub fn build_providers(config: &OrchestratorConfig) -> Vec<SharedProvider> {
    let timeouts = TimeoutController::new(TimeoutConfig::from(config));

    let providers: Vec<SharedProvider> = resolve_order(&config.provider_priority)
        .into_iter()
        .map(|name| -> SharedProvider {
            if name == PROVIDER_TINYPNG {
                Arc::new(TinifyProvider::new(
                    config.credentials.tinypng_api_key.clone(),
                    config.tinypng.clone(),
                    timeouts.clone(),
                ))
            } else {
                Arc::new(CloudinaryProvider::new(
                    config.credentials.cloudinary.clone(),
                    config.cloudinary.clone(),
                    timeouts.clone(),
                ))
            }
        })
        .collect();

    tracing::info!(
        "[PROVIDERS] 顺序: {}",
        providers
            .iter()
            .map(|p| format!("{}{}", p.id(), if p.is_configured() { "" } else { "(未配置)" }))
            .collect::<Vec<_>>()
            .join(" → ")
    );
    providers
}
