use crate::config::FusionConfig;
use crate::core::model::Detection;

/// Per-modality and combined confidence of one fused object.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusedConfidence {
    pub visual: f64,
    pub spectral: f64,
    pub combined: f64,
}

pub fn score_confidence(detection: &Detection, config: &FusionConfig) -> FusedConfidence {
    match detection {
        Detection::Paired {
            visual, candidate, ..
        } => FusedConfidence {
            visual: visual.confidence,
            spectral: candidate.confidence,
            combined: (visual.confidence * config.visual_weight
                + candidate.confidence * config.spectral_weight)
                .clamp(0.0, 1.0),
        },
        Detection::Visual(visual) => FusedConfidence {
            visual: visual.confidence,
            spectral: 0.0,
            combined: (visual.confidence * config.single_source_penalty).clamp(0.0, 1.0),
        },
        Detection::Spectral(candidate) => FusedConfidence {
            visual: 0.0,
            spectral: candidate.confidence,
            combined: (candidate.confidence * config.single_source_penalty).clamp(0.0, 1.0),
        },
    }
}
