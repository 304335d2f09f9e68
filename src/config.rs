use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::core::error::ConfigError;

const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

pub const SEVERITY_MIN: u8 = 1;
pub const SEVERITY_MAX: u8 = 10;

/// Every tunable of the engine. Build it, then call [`EngineConfig::validate`];
/// the engine constructors do so as well.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct EngineConfig {
    #[serde(default)]
    pub fusion: FusionConfig,
    #[serde(default)]
    pub extraction: ExtractionConfig,
    #[serde(default)]
    pub severity: SeverityConfig,
    #[serde(default)]
    pub change: ChangeConfig,
    #[serde(default)]
    pub tiling: TilingConfig,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum MatchPolicy {
    /// Each detection independently takes its best overlap, even one an
    /// earlier detection already took.
    #[default]
    FirstMatch,
    /// Candidates taken by an earlier detection are skipped.
    Exclusive,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FusionConfig {
    pub visual_weight: f64,
    pub spectral_weight: f64,
    pub spatial_match_threshold: f64,
    pub min_fused_confidence: f64,
    pub single_source_penalty: f64,
    pub match_policy: MatchPolicy,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            visual_weight: 0.6,
            spectral_weight: 0.4,
            spatial_match_threshold: 0.3,
            min_fused_confidence: 0.4,
            single_source_penalty: 0.7,
            match_policy: MatchPolicy::FirstMatch,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdPolicy {
    Fixed(f64),
    /// Percentile (0-100) of the map's own finite values.
    Percentile(f64),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Normalization {
    #[default]
    MinMax,
    Clip,
    /// Maps an index in [-1, 1] onto [0, 1].
    Signed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MethodConfig {
    pub name: String,
    pub threshold: ThresholdPolicy,
    pub weight: f64,
    /// Subtracted from the method's region mean before weighting.
    #[serde(default)]
    pub baseline: f64,
    #[serde(default)]
    pub normalization: Normalization,
}

impl MethodConfig {
    pub fn new(name: impl Into<String>, threshold: ThresholdPolicy, weight: f64) -> Self {
        Self {
            name: name.into(),
            threshold,
            weight,
            baseline: 0.0,
            normalization: Normalization::MinMax,
        }
    }

    pub fn with_baseline(mut self, baseline: f64) -> Self {
        self.baseline = baseline;
        self
    }

    pub fn with_normalization(mut self, normalization: Normalization) -> Self {
        self.normalization = normalization;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExtractionConfig {
    pub quorum: usize,
    pub min_region_pixels: usize,
    pub methods: Vec<MethodConfig>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            quorum: 2,
            min_region_pixels: 5,
            methods: vec![
                MethodConfig::new("rx", ThresholdPolicy::Percentile(99.0), 0.25),
                MethodConfig::new("ndwi", ThresholdPolicy::Fixed(0.3), 0.15)
                    .with_baseline(0.3)
                    .with_normalization(Normalization::Signed),
                MethodConfig::new("ace", ThresholdPolicy::Fixed(0.7), 0.35)
                    .with_normalization(Normalization::Clip),
                MethodConfig::new("mf", ThresholdPolicy::Percentile(95.0), 0.25),
            ],
        }
    }
}

impl ExtractionConfig {
    pub fn method(&self, name: &str) -> Option<&MethodConfig> {
        self.methods.iter().find(|method| method.name == name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SeverityConfig {
    pub base: BTreeMap<String, i32>,
    pub default_base: i32,
    pub high_confidence_threshold: f64,
    pub high_confidence_bonus: i32,
    pub corroboration_bonus: i32,
    pub reliable_method: Option<String>,
    pub reliable_score_threshold: f64,
    pub reliable_bonus: i32,
}

impl Default for SeverityConfig {
    fn default() -> Self {
        let base = [
            ("leak", 8),
            ("crack", 6),
            ("corrosion", 5),
            ("faulty_pipe", 7),
            ("pipe", 0),
            ("none", 0),
        ]
        .into_iter()
        .map(|(name, value)| (name.to_string(), value))
        .collect();
        Self {
            base,
            default_base: 5,
            high_confidence_threshold: 0.8,
            high_confidence_bonus: 1,
            corroboration_bonus: 1,
            reliable_method: Some("ace".to_string()),
            reliable_score_threshold: 0.8,
            reliable_bonus: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ChangeConfig {
    pub iou_threshold: f64,
    pub severity_delta: i32,
    pub confidence_delta: f64,
    /// Classes whose disappearance reads as a repair rather than a loss.
    pub transient_classes: Vec<String>,
    pub corroboration_iou: f64,
    pub default_severity: u8,
    pub match_policy: MatchPolicy,
}

impl Default for ChangeConfig {
    fn default() -> Self {
        Self {
            iou_threshold: 0.5,
            severity_delta: 2,
            confidence_delta: 0.2,
            transient_classes: vec!["faulty_pipe".to_string(), "leak".to_string()],
            corroboration_iou: 0.1,
            default_severity: 5,
            match_policy: MatchPolicy::FirstMatch,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TilingConfig {
    pub nms_iou: f64,
    pub min_confidence: f64,
}

impl Default for TilingConfig {
    fn default() -> Self {
        Self {
            nms_iou: 0.5,
            min_confidence: 0.25,
        }
    }
}

pub(crate) fn check_unit(name: &str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::WeightOutOfRange {
            name: name.to_string(),
            value,
        })
    }
}

fn check_sum(group: &str, sum: f64) -> Result<(), ConfigError> {
    if (sum - 1.0).abs() <= WEIGHT_SUM_TOLERANCE {
        Ok(())
    } else {
        Err(ConfigError::WeightsDoNotSumToOne {
            group: group.to_string(),
            sum,
        })
    }
}

impl FusionConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_unit("fusion.visual_weight", self.visual_weight)?;
        check_unit("fusion.spectral_weight", self.spectral_weight)?;
        check_sum("fusion", self.visual_weight + self.spectral_weight)?;
        check_unit("fusion.spatial_match_threshold", self.spatial_match_threshold)?;
        check_unit("fusion.min_fused_confidence", self.min_fused_confidence)?;
        check_unit("fusion.single_source_penalty", self.single_source_penalty)
    }
}

impl ExtractionConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.quorum == 0 || self.quorum > self.methods.len() {
            return Err(ConfigError::InvalidQuorum {
                quorum: self.quorum,
                methods: self.methods.len(),
            });
        }

        let mut seen = BTreeSet::new();
        for method in &self.methods {
            if !seen.insert(method.name.as_str()) {
                return Err(ConfigError::DuplicateMethod(method.name.clone()));
            }
            check_unit(&format!("extraction.{}.weight", method.name), method.weight)?;
            match method.threshold {
                ThresholdPolicy::Fixed(value) if !value.is_finite() => {
                    return Err(ConfigError::InvalidThreshold {
                        name: method.name.clone(),
                        reason: format!("fixed threshold {value} is not finite"),
                    });
                }
                ThresholdPolicy::Percentile(p) if !(0.0..=100.0).contains(&p) => {
                    return Err(ConfigError::InvalidThreshold {
                        name: method.name.clone(),
                        reason: format!("percentile {p} outside [0, 100]"),
                    });
                }
                _ => {}
            }
            if !method.baseline.is_finite() {
                return Err(ConfigError::InvalidThreshold {
                    name: method.name.clone(),
                    reason: "baseline is not finite".to_string(),
                });
            }
        }

        check_sum("extraction", self.methods.iter().map(|m| m.weight).sum())
    }
}

impl SeverityConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_unit("severity.high_confidence_threshold", self.high_confidence_threshold)?;
        if !self.reliable_score_threshold.is_finite() {
            return Err(ConfigError::InvalidSeverity(
                "reliable_score_threshold is not finite".to_string(),
            ));
        }
        Ok(())
    }
}

impl ChangeConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_unit("change.iou_threshold", self.iou_threshold)?;
        check_unit("change.corroboration_iou", self.corroboration_iou)?;
        check_unit("change.confidence_delta", self.confidence_delta)?;
        if self.severity_delta < 0 {
            return Err(ConfigError::InvalidSeverity(format!(
                "change.severity_delta {} is negative",
                self.severity_delta
            )));
        }
        if !(SEVERITY_MIN..=SEVERITY_MAX).contains(&self.default_severity) {
            return Err(ConfigError::InvalidSeverity(format!(
                "change.default_severity {} outside [{SEVERITY_MIN}, {SEVERITY_MAX}]",
                self.default_severity
            )));
        }
        Ok(())
    }
}

impl TilingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_unit("tiling.nms_iou", self.nms_iou)?;
        check_unit("tiling.min_confidence", self.min_confidence)
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.fusion.validate()?;
        self.extraction.validate()?;
        self.severity.validate()?;
        self.change.validate()?;
        self.tiling.validate()
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        let config = Self::from_toml_str(&content)
            .with_context(|| format!("Invalid config: {}", path.display()))?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn default_config_is_valid() {
        let config = EngineConfig::default();
        assert_eq!(config.validate(), Ok(()));
        assert_eq!(config.fusion.visual_weight, 0.6);
        assert_eq!(config.extraction.quorum, 2);
        assert_eq!(config.severity.base.get("leak"), Some(&8));
        assert_eq!(config.change.iou_threshold, 0.5);
    }

    #[test]
    fn rejects_fusion_weights_not_summing_to_one() {
        let mut config = EngineConfig::default();
        config.fusion.spectral_weight = 0.5;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::WeightsDoNotSumToOne { .. })
        ));
    }

    #[test]
    fn rejects_weight_outside_unit_interval() {
        let mut config = EngineConfig::default();
        config.fusion.visual_weight = 1.2;
        config.fusion.spectral_weight = -0.2;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::WeightOutOfRange { .. })
        ));
    }

    #[test]
    fn rejects_quorum_above_method_count() {
        let mut config = EngineConfig::default();
        config.extraction.quorum = 5;
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidQuorum {
                quorum: 5,
                methods: 4
            })
        );
    }

    #[test]
    fn rejects_duplicate_methods_and_bad_percentiles() {
        let mut config = EngineConfig::default();
        config.extraction.methods[1].name = "rx".to_string();
        assert_eq!(
            config.validate(),
            Err(ConfigError::DuplicateMethod("rx".to_string()))
        );

        let mut config = EngineConfig::default();
        config.extraction.methods[0].threshold = ThresholdPolicy::Percentile(120.0);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidThreshold { .. })
        ));
    }

    #[test]
    fn parses_partial_toml_with_defaults() {
        let config = EngineConfig::from_toml_str(
            r#"
            [fusion]
            visual_weight = 0.5
            spectral_weight = 0.5
            match_policy = "exclusive"

            [change]
            transient_classes = ["leak"]
            "#,
        )
        .unwrap();
        assert_eq!(config.fusion.visual_weight, 0.5);
        assert_eq!(config.fusion.match_policy, MatchPolicy::Exclusive);
        assert_eq!(config.fusion.min_fused_confidence, 0.4);
        assert_eq!(config.change.transient_classes, vec!["leak".to_string()]);
        assert_eq!(config.extraction.methods.len(), 4);
    }

    #[test]
    fn parses_method_thresholds() {
        let config = EngineConfig::from_toml_str(
            r#"
            [extraction]
            quorum = 1
            methods = [
                { name = "a", threshold = { fixed = 0.5 }, weight = 0.5 },
                { name = "b", threshold = { percentile = 90.0 }, weight = 0.5, normalization = "clip" },
            ]
            "#,
        )
        .unwrap();
        assert_eq!(config.extraction.methods[0].threshold, ThresholdPolicy::Fixed(0.5));
        assert_eq!(
            config.extraction.methods[1].threshold,
            ThresholdPolicy::Percentile(90.0)
        );
        assert_eq!(config.extraction.methods[1].normalization, Normalization::Clip);
    }

    #[test]
    fn invalid_toml_is_rejected_eagerly() {
        let result = EngineConfig::from_toml_str("[fusion]\nvisual_weight = 0.9\n");
        assert!(matches!(result, Err(ConfigError::WeightsDoNotSumToOne { .. })));
    }

    #[test]
    fn round_trips_through_toml() {
        let config = EngineConfig::default();
        let text = config.to_toml_string().unwrap();
        assert_eq!(EngineConfig::from_toml_str(&text).unwrap(), config);
    }
}
