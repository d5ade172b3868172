//! 质量等级选择
//!
//! 根据输入大小选择压缩力度：图片越大，质量越低、目标宽度越小。

use crate::errors::ConfigError;
use serde::{Deserialize, Serialize};

const KB: u64 = 1024;
const MB: u64 = 1024 * KB;

/// 质量等级
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityTier {
    /// 大小上限（字节，含），`None` 表示无上限
    pub max_size: Option<u64>,
    /// 质量标签
    pub quality: String,
    /// 目标宽度（像素）
    pub target_width: u32,
}

impl QualityTier {
    pub fn new(max_size: Option<u64>, quality: &str, target_width: u32) -> Self {
        Self {
            max_size,
            quality: quality.to_string(),
            target_width,
        }
    }

    fn accepts(&self, size: u64) -> bool {
        self.max_size.is_none_or(|max| max >= size)
    }
}

/// 从有序等级表中选择第一个 `max_size >= size` 的等级
pub fn select_tier(tiers: &[QualityTier], size: u64) -> Option<&QualityTier> {
    tiers.iter().find(|tier| tier.accepts(size))
}

/// 经过校验的质量等级表
///
/// 非空、按 `max_size` 严格升序，且最后一级无上限，因此任意大小都能匹配。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<QualityTier>", into = "Vec<QualityTier>")]
pub struct QualityTierTable {
    tiers: Vec<QualityTier>,
}

impl QualityTierTable {
    pub fn new(tiers: Vec<QualityTier>) -> Result<Self, ConfigError> {
        validate_tiers(&tiers)?;
        Ok(Self { tiers })
    }

    pub fn tiers(&self) -> &[QualityTier] {
        &self.tiers
    }

    /// 选择等级
    pub fn select(&self, size: u64) -> &QualityTier {
        select_tier(&self.tiers, size).unwrap_or_else(|| self.last())
    }

    fn last(&self) -> &QualityTier {
        &self.tiers[self.tiers.len() - 1]
    }
}

impl Default for QualityTierTable {
    fn default() -> Self {
        Self {
            tiers: vec![
                QualityTier::new(Some(500 * KB), "good", 1000),
                QualityTier::new(Some(MB), "eco", 900),
                QualityTier::new(Some(3 * MB), "eco", 800),
                QualityTier::new(Some(5 * MB), "low", 700),
                QualityTier::new(None, "low", 600),
            ],
        }
    }
}

impl TryFrom<Vec<QualityTier>> for QualityTierTable {
    type Error = ConfigError;

    fn try_from(tiers: Vec<QualityTier>) -> Result<Self, Self::Error> {
        Self::new(tiers)
    }
}

impl From<QualityTierTable> for Vec<QualityTier> {
    fn from(table: QualityTierTable) -> Self {
        table.tiers
    }
}

fn validate_tiers(tiers: &[QualityTier]) -> Result<(), ConfigError> {
    let Some((last, bounded)) = tiers.split_last() else {
        return Err(ConfigError::InvalidTiers("等级表为空".to_string()));
    };

    if last.max_size.is_some() {
        return Err(ConfigError::InvalidTiers(
            "最后一级必须无大小上限".to_string(),
        ));
    }

    let mut previous: Option<u64> = None;
    for tier in bounded {
        let Some(max) = tier.max_size else {
            return Err(ConfigError::InvalidTiers(format!(
                "只有最后一级可以无上限 (quality={})",
                tier.quality
            )));
        };
        if previous.is_some_and(|prev| max <= prev) {
            return Err(ConfigError::InvalidTiers(format!(
                "max_size 必须严格递增 ({max})"
            )));
        }
        previous = Some(max);
    }

    for tier in tiers {
        if tier.quality.trim().is_empty() || tier.target_width == 0 {
            return Err(ConfigError::InvalidTiers(format!(
                "等级缺少质量标签或宽度 (max_size={:?})",
                tier.max_size
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_small_image_gets_good_quality() {
        let table = QualityTierTable::default();
        let tier = table.select(400 * KB);
        assert_eq!(tier.quality, "good");
        assert_eq!(tier.target_width, 1000);
    }

    #[test]
    fn test_medium_image_gets_eco_800() {
        let table = QualityTierTable::default();
        let tier = table.select(2 * MB);
        assert_eq!(tier.quality, "eco");
        assert_eq!(tier.target_width, 800);
    }

    #[test]
    fn test_boundaries_are_inclusive() {
        let table = QualityTierTable::default();
        assert_eq!(table.select(500 * KB).target_width, 1000);
        assert_eq!(table.select(500 * KB + 1).target_width, 900);
        assert_eq!(table.select(5 * MB).target_width, 700);
        assert_eq!(table.select(5 * MB + 1).target_width, 600);
        assert_eq!(table.select(u64::MAX).target_width, 600);
        assert_eq!(table.select(0).quality, "good");
    }

    #[test]
    fn test_invalid_tables_rejected() {
        assert!(QualityTierTable::new(vec![]).is_err());
        assert!(QualityTierTable::new(vec![QualityTier::new(Some(10), "good", 100)]).is_err());
        assert!(QualityTierTable::new(vec![
            QualityTier::new(Some(100), "good", 1000),
            QualityTier::new(Some(50), "eco", 800),
            QualityTier::new(None, "low", 600),
        ])
        .is_err());
        assert!(QualityTierTable::new(vec![
            QualityTier::new(None, "good", 1000),
            QualityTier::new(None, "low", 600),
        ])
        .is_err());
    }

    #[test]
    fn test_deserialize_validates() {
        let yaml = "- maxSize: 1000\n  quality: good\n  targetWidth: 1200\n- maxSize: null\n  quality: low\n  targetWidth: 640\n";
        let table: QualityTierTable = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(table.tiers().len(), 2);
        assert_eq!(table.select(5000).target_width, 640);

        let bounded = "- maxSize: 1000\n  quality: good\n  targetWidth: 1200\n";
        assert!(serde_yaml::from_str::<QualityTierTable>(bounded).is_err());
    }

    fn rank(max_size: Option<u64>) -> u128 {
        max_size.map_or(u128::MAX, u128::from)
    }

    proptest! {
        #[test]
        fn prop_tier_selection_is_monotonic(a in 0u64..20 * MB, b in 0u64..20 * MB) {
            let table = QualityTierTable::default();
            let (small, large) = if a <= b { (a, b) } else { (b, a) };
            let small_tier = table.select(small);
            let large_tier = table.select(large);
            prop_assert!(rank(small_tier.max_size) <= rank(large_tier.max_size));
            prop_assert!(small_tier.target_width >= large_tier.target_width);
        }

        #[test]
        fn prop_selected_tier_accepts_size(size in any::<u64>()) {
            let table = QualityTierTable::default();
            prop_assert!(table.select(size).accepts(size));
        }
    }
}
