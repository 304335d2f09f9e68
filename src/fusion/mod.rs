pub mod align;
pub mod finalize;
pub mod nms;
pub mod resolve;

use tracing::{debug, info};

use crate::config::EngineConfig;
use crate::core::error::{ConfigError, FusionResult};
use crate::core::geometry::{BBox, GridShape};
use crate::core::identity::{IdentityProvider, SystemIdentity};
use crate::core::model::{CandidateRegion, Detection, FusedDetection, VisualDetection};
use crate::core::severity::SeverityScorer;

pub use align::{AlignmentResult, MatchedPair, SpatialMatch, SpatialMatcher};

pub trait FusionEngine {
    fn fuse(
        &self,
        visual: &[VisualDetection],
        candidates: &[CandidateRegion],
        visual_grid: GridShape,
        spectral_grid: GridShape,
    ) -> FusionResult<Vec<FusedDetection>>;
}

/// Pairs visual detections with spectral candidates, blends their
/// confidences, scores severity and ranks the result.
#[derive(Debug)]
pub struct DefectFusionEngine<P = SystemIdentity> {
    config: EngineConfig,
    matcher: SpatialMatcher,
    scorer: SeverityScorer,
    identity: P,
}

impl DefectFusionEngine<SystemIdentity> {
    pub fn new(config: EngineConfig) -> Result<Self, ConfigError> {
        Self::with_identity(config, SystemIdentity)
    }
}

impl<P: IdentityProvider> DefectFusionEngine<P> {
    pub fn with_identity(config: EngineConfig, identity: P) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            matcher: SpatialMatcher::new(
                config.fusion.spatial_match_threshold,
                config.fusion.match_policy,
            ),
            scorer: SeverityScorer::new(config.severity.clone()),
            config,
            identity,
        })
    }
}

impl<P: IdentityProvider> FusionEngine for DefectFusionEngine<P> {
    fn fuse(
        &self,
        visual: &[VisualDetection],
        candidates: &[CandidateRegion],
        visual_grid: GridShape,
        spectral_grid: GridShape,
    ) -> FusionResult<Vec<FusedDetection>> {
        for det in visual {
            det.validate()?;
        }
        for candidate in candidates {
            candidate.validate()?;
        }
        info!(
            visual = visual.len(),
            spectral = candidates.len(),
            "fusing detections"
        );

        let visual_boxes: Vec<BBox> = visual.iter().map(|d| d.bbox).collect();
        let candidate_boxes: Vec<BBox> = candidates.iter().map(|c| c.bbox).collect();
        let alignment =
            self.matcher
                .align_across(&visual_boxes, &candidate_boxes, &visual_grid, &spectral_grid);
        debug!(
            paired = alignment.matched.len(),
            visual_only = alignment.unmatched_a.len(),
            spectral_only = alignment.unmatched_b.len(),
            "spatial alignment complete"
        );

        let fused: Vec<FusedDetection> = resolve::collect_detections(visual, candidates, &alignment)
            .into_iter()
            .map(|detection: Detection| {
                resolve::resolve_detection(
                    detection,
                    &self.config.fusion,
                    &visual_grid,
                    &spectral_grid,
                    &self.identity,
                )
            })
            .collect();
        let produced = fused.len();

        let result = finalize::finalize(fused, self.config.fusion.min_fused_confidence, &self.scorer);
        info!(
            produced,
            dropped = produced - result.len(),
            kept = result.len(),
            "fusion complete"
        );
        Ok(result)
    }
}

/// One-shot fusion with a freshly validated config and system identifiers.
pub fn fuse(
    visual: &[VisualDetection],
    candidates: &[CandidateRegion],
    visual_grid: GridShape,
    spectral_grid: GridShape,
    config: &EngineConfig,
) -> FusionResult<Vec<FusedDetection>> {
    DefectFusionEngine::new(config.clone())?.fuse(visual, candidates, visual_grid, spectral_grid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;

    use crate::core::error::FusionError;
    use crate::core::identity::SequentialIdentity;
    use crate::core::model::Provenance;

    fn engine() -> DefectFusionEngine<SequentialIdentity> {
        DefectFusionEngine::with_identity(
            EngineConfig::default(),
            SequentialIdentity::with_prefix("det"),
        )
        .unwrap()
    }

    fn candidate(id: &str, bbox: BBox, confidence: f64) -> CandidateRegion {
        CandidateRegion {
            id: id.to_string(),
            centroid: bbox.center(),
            bbox,
            area_pixels: bbox.area() as usize,
            scores: BTreeMap::new(),
            votes: 2,
            confidence,
            defect_type: None,
        }
    }

    #[test]
    fn fuses_paired_detection_with_expected_confidence_and_severity() {
        let visual = vec![VisualDetection::new(
            "v1",
            BBox::new(40.0, 40.0, 80.0, 80.0),
            0.8,
            "leak",
        )];
        let candidates = vec![candidate("c1", BBox::new(10.0, 10.0, 20.0, 20.0), 0.6)];
        let out = engine()
            .fuse(
                &visual,
                &candidates,
                GridShape::new(400, 400),
                GridShape::new(100, 100),
            )
            .unwrap();
        assert_eq!(out.len(), 1);
        assert!((out[0].combined_confidence - 0.72).abs() < 1e-9);
        assert_eq!(out[0].severity, 9);
        assert_eq!(out[0].provenance, Provenance::Fused);
    }

    #[test]
    fn weak_visual_only_detection_is_dropped() {
        let visual = vec![VisualDetection::new(
            "v1",
            BBox::new(0.0, 0.0, 10.0, 10.0),
            0.5,
            "crack",
        )];
        let grid = GridShape::new(100, 100);
        let out = engine().fuse(&visual, &[], grid, grid).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn confident_spectral_only_candidate_survives_after_equal_priority_visual() {
        let visual = vec![
            VisualDetection::new("v-pair", BBox::new(0.0, 0.0, 10.0, 10.0), 0.8, "leak"),
            VisualDetection::new("v-solo", BBox::new(40.0, 40.0, 50.0, 50.0), 0.9, "corrosion"),
        ];
        let candidates = vec![
            candidate("c-pair", BBox::new(0.0, 0.0, 10.0, 10.0), 0.6),
            candidate("c-solo", BBox::new(80.0, 80.0, 90.0, 90.0), 0.9),
        ];
        let grid = GridShape::new(100, 100);
        let out = engine().fuse(&visual, &candidates, grid, grid).unwrap();

        let order: Vec<_> = out.iter().map(|d| d.provenance).collect();
        assert_eq!(
            order,
            vec![Provenance::Fused, Provenance::Visual, Provenance::Spectral]
        );
        let spectral = &out[2];
        assert!((spectral.combined_confidence - 0.63).abs() < 1e-9);
        assert_eq!(spectral.defect_type, "unknown");
        assert_eq!(spectral.severity, 5);
        assert_eq!(spectral.metadata.candidate_id.as_deref(), Some("c-solo"));
        // corrosion 0.63 * 5 ties with the spectral-only record and keeps its place
        assert_eq!(out[1].priority(), spectral.priority());
    }

    #[test]
    fn empty_inputs_give_empty_output() {
        let grid = GridShape::new(10, 10);
        assert!(engine().fuse(&[], &[], grid, grid).unwrap().is_empty());
    }

    #[test]
    fn malformed_record_is_reported_by_id() {
        let visual = vec![VisualDetection::new(
            "bad-1",
            BBox::new(0.0, 0.0, 10.0, 10.0),
            f64::NAN,
            "leak",
        )];
        let grid = GridShape::new(100, 100);
        match engine().fuse(&visual, &[], grid, grid) {
            Err(FusionError::MalformedRecord { id, .. }) => assert_eq!(id, "bad-1"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn invalid_config_is_rejected_before_fusing() {
        let mut config = EngineConfig::default();
        config.fusion.visual_weight = 0.9;
        assert!(DefectFusionEngine::new(config.clone()).is_err());
        let grid = GridShape::new(1, 1);
        assert!(matches!(
            fuse(&[], &[], grid, grid, &config),
            Err(FusionError::Config(_))
        ));
    }
}
