use crate::config::{SeverityConfig, SEVERITY_MAX, SEVERITY_MIN};
use crate::core::model::FusedDetection;

/// Rule-based severity: a base per defect type plus one-time bonuses, clamped
/// to [1, 10]. Pure function of the detection's fields.
#[derive(Debug, Clone)]
pub struct SeverityScorer {
    config: SeverityConfig,
}

impl SeverityScorer {
    pub fn new(config: SeverityConfig) -> Self {
        Self { config }
    }

    pub fn base(&self, defect_type: &str) -> i32 {
        self.config
            .base
            .get(defect_type)
            .copied()
            .unwrap_or(self.config.default_base)
    }

    pub fn score(&self, detection: &FusedDetection) -> u8 {
        let mut severity = self.base(&detection.defect_type);

        if detection.combined_confidence > self.config.high_confidence_threshold {
            severity += self.config.high_confidence_bonus;
        }
        if detection.provenance.has_visual() && detection.provenance.has_spectral() {
            severity += self.config.corroboration_bonus;
        }
        if let Some(method) = &self.config.reliable_method {
            let reliable = detection
                .metadata
                .spectral_scores
                .get(method)
                .is_some_and(|score| *score > self.config.reliable_score_threshold);
            if reliable {
                severity += self.config.reliable_bonus;
            }
        }

        severity.clamp(i32::from(SEVERITY_MIN), i32::from(SEVERITY_MAX)) as u8
    }
}

impl Default for SeverityScorer {
    fn default() -> Self {
        Self::new(SeverityConfig::default())
    }
}
