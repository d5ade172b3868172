//! 通用工具函数
//!
//! 包含凭证掩码、图片 MIME 嗅探等与具体 Provider 无关的逻辑。

/// 掩码敏感 Token
pub fn mask_token(token: &str) -> String {
    let chars: Vec<char> = token.chars().collect();
    if chars.len() <= 12 {
        "****".to_string()
    } else {
        let prefix: String = chars[..6].iter().collect();
        let suffix: String = chars[chars.len() - 4..].iter().collect();
        format!("{prefix}****{suffix}")
    }
}

/// 掩码可选凭证，未配置时返回 `None`
pub fn mask_optional(token: Option<&str>) -> Option<String> {
    token.filter(|t| !t.trim().is_empty()).map(mask_token)
}

/// 根据文件头推断图片 MIME 类型
pub fn sniff_image_mime(bytes: &[u8]) -> &'static str {
    match bytes {
        [0x89, b'P', b'N', b'G', ..] => "image/png",
        [0xFF, 0xD8, 0xFF, ..] => "image/jpeg",
        [b'G', b'I', b'F', b'8', ..] => "image/gif",
        [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => "image/webp",
        [_, _, _, _, b'f', b't', b'y', b'p', b'a', b'v', b'i', b'f', ..] => "image/avif",
        [b'B', b'M', ..] => "image/bmp",
        _ => "application/octet-stream",
    }
}

/// 截断过长的上游响应，便于写入错误消息
pub fn preview_payload(payload: &str) -> String {
    const MAX_PREVIEW_CHARS: usize = 300;
    let trimmed = payload.trim();
    if trimmed.chars().count() <= MAX_PREVIEW_CHARS {
        return trimmed.to_string();
    }
    let head: String = trimmed.chars().take(MAX_PREVIEW_CHARS).collect();
    format!("{head}...")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_token() {
        assert_eq!(mask_token("short"), "****");
        assert_eq!(mask_token("abcdef1234567890"), "abcdef****7890");
    }

    #[test]
    fn test_mask_optional() {
        assert_eq!(mask_optional(None), None);
        assert_eq!(mask_optional(Some("  ")), None);
        assert_eq!(mask_optional(Some("key")), Some("****".to_string()));
    }

    #[test]
    fn test_sniff_image_mime() {
        assert_eq!(sniff_image_mime(b"\x89PNG\r\n\x1a\n"), "image/png");
        assert_eq!(sniff_image_mime(&[0xFF, 0xD8, 0xFF, 0xE0]), "image/jpeg");
        assert_eq!(sniff_image_mime(b"RIFF\x00\x00\x00\x00WEBPVP8 "), "image/webp");
        assert_eq!(sniff_image_mime(b"GIF89a"), "image/gif");
        assert_eq!(sniff_image_mime(b"hello"), "application/octet-stream");
        assert_eq!(sniff_image_mime(&[]), "application/octet-stream");
    }

    #[test]
    fn test_preview_payload() {
        assert_eq!(preview_payload("  ok \n"), "ok");
        let long = "x".repeat(400);
        let preview = preview_payload(&long);
        assert!(preview.ends_with("..."));
        assert_eq!(preview.chars().count(), 303);
    }
}
