//! 日志管理模块
//!
//! 基于 `tracing` 输出日志，上游响应写入日志前先做凭证脱敏。

use regex::Regex;
use std::sync::OnceLock;
use tracing::Level;

/// 安装全局 fmt 订阅者
///
/// 可重复调用，已有订阅者时返回 `false`。
pub fn init_logging(level: Level) -> bool {
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(true)
        .try_init()
        .is_ok()
}

/// 从字符串解析日志级别，无法识别时回退到 INFO
pub fn parse_level(value: &str) -> Level {
    value.trim().parse::<Level>().unwrap_or(Level::INFO)
}

fn sanitize_patterns() -> &'static [(Regex, &'static str)] {
    static PATTERNS: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        let patterns = [
            (r"Basic\s+[A-Za-z0-9+/=]+", "Basic ***"),
            (
                r#"api[_-]?key["']?\s*[:=]\s*["']?[A-Za-z0-9._-]+"#,
                "api_key: ***",
            ),
            (
                r#"api[_-]?secret["']?\s*[:=]\s*["']?[A-Za-z0-9._-]+"#,
                "api_secret: ***",
            ),
            (
                r#"signature["']?\s*[:=]\s*["']?[A-Fa-f0-9]+"#,
                "signature: ***",
            ),
            (
                r#"secret["']?\s*[:=]\s*["']?[A-Za-z0-9._-]+"#,
                "secret: ***",
            ),
        ];
        patterns
            .iter()
            .filter_map(|(pattern, replacement)| {
                Regex::new(pattern).ok().map(|re| (re, *replacement))
            })
            .collect()
    })
}

/// 日志脱敏
pub fn sanitize_log_message(message: &str) -> String {
    let mut sanitized = message.to_string();
    for (re, replacement) in sanitize_patterns() {
        sanitized = re.replace_all(&sanitized, *replacement).to_string();
    }
    sanitized
}
