use crate::config::{FusionConfig, SEVERITY_MIN};
use crate::core::confidence::score_confidence;
use crate::core::geometry::GridShape;
use crate::core::identity::IdentityProvider;
use crate::core::model::{
    CandidateRegion, Detection, FusedDetection, FusionMetadata, SourceGrid, VisualDetection,
};
use crate::fusion::align::AlignmentResult;

const SPECTRAL_CLASS: &str = "spectral_anomaly";
const UNKNOWN_DEFECT: &str = "unknown";

/// Turns an alignment into one `Detection` per object: matched and
/// visual-only detections in visual order, then unclaimed candidates.
pub fn collect_detections(
    visual: &[VisualDetection],
    candidates: &[CandidateRegion],
    alignment: &AlignmentResult,
) -> Vec<Detection> {
    let mut detections = Vec::with_capacity(visual.len() + alignment.unmatched_b.len());
    let mut matched = alignment.matched.iter().peekable();

    for (idx, det) in visual.iter().enumerate() {
        match matched.next_if(|pair| pair.a == idx) {
            Some(pair) => detections.push(Detection::Paired {
                visual: det.clone(),
                candidate: candidates[pair.b].clone(),
                iou: pair.iou,
            }),
            None => detections.push(Detection::Visual(det.clone())),
        }
    }

    for &idx in &alignment.unmatched_b {
        detections.push(Detection::Spectral(candidates[idx].clone()));
    }
    detections
}

/// Builds the unified record for one detection. Severity is left at the
/// minimum; it is assigned after filtering.
pub fn resolve_detection<P: IdentityProvider + ?Sized>(
    detection: Detection,
    config: &FusionConfig,
    visual_grid: &GridShape,
    spectral_grid: &GridShape,
    identity: &P,
) -> FusedDetection {
    let confidence = score_confidence(&detection, config);
    let provenance = detection.provenance();
    let mut metadata = FusionMetadata {
        visual_id: None,
        candidate_id: None,
        visual_class: None,
        spectral_defect_type: None,
        spectral_area_pixels: None,
        methods_agreed: None,
        iou: None,
        spectral_scores: Default::default(),
        created_at: identity.now(),
    };

    let (bbox, grid, area, center, defect_type, class_name) = match detection {
        Detection::Visual(visual) => {
            annotate_visual(&mut metadata, &visual);
            (
                visual.bbox,
                SourceGrid::Visual,
                visual.area(),
                visual.center(),
                visual.class_name.clone(),
                visual.class_name,
            )
        }
        Detection::Spectral(candidate) => {
            let defect_type = candidate
                .defect_type
                .clone()
                .unwrap_or_else(|| UNKNOWN_DEFECT.to_string());
            let bbox = candidate.bbox;
            let area = candidate.area_pixels as f64;
            let center = candidate.centroid;
            annotate_spectral(&mut metadata, candidate);
            (bbox, SourceGrid::Spectral, area, center, defect_type, SPECTRAL_CLASS.to_string())
        }
        Detection::Paired {
            visual,
            candidate,
            iou,
        } => {
            metadata.iou = Some(iou);
            annotate_visual(&mut metadata, &visual);
            let defect_type = candidate
                .defect_type
                .clone()
                .unwrap_or_else(|| visual.class_name.clone());
            let geometry = if spectral_grid.pixel_count() > visual_grid.pixel_count() {
                (
                    candidate.bbox,
                    SourceGrid::Spectral,
                    candidate.area_pixels as f64,
                    candidate.centroid,
                )
            } else {
                (visual.bbox, SourceGrid::Visual, visual.area(), visual.center())
            };
            annotate_spectral(&mut metadata, candidate);
            (
                geometry.0,
                geometry.1,
                geometry.2,
                geometry.3,
                defect_type,
                visual.class_name,
            )
        }
    };

    FusedDetection {
        detection_id: identity.next_id(),
        bbox,
        grid,
        visual_confidence: confidence.visual,
        spectral_confidence: confidence.spectral,
        combined_confidence: confidence.combined,
        defect_type,
        class_name,
        area,
        center,
        severity: SEVERITY_MIN,
        provenance,
        metadata,
    }
}

fn annotate_visual(metadata: &mut FusionMetadata, visual: &VisualDetection) {
    metadata.visual_id = Some(visual.id.clone());
    metadata.visual_class = Some(visual.class_name.clone());
}

fn annotate_spectral(metadata: &mut FusionMetadata, candidate: CandidateRegion) {
    metadata.candidate_id = Some(candidate.id);
    metadata.spectral_defect_type = candidate.defect_type;
    metadata.spectral_area_pixels = Some(candidate.area_pixels);
    metadata.methods_agreed = Some(candidate.votes);
    metadata.spectral_scores = candidate.scores;
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;

    use crate::core::geometry::BBox;
    use crate::core::identity::SequentialIdentity;
    use crate::core::model::Provenance;
    use crate::fusion::align::MatchedPair;

    fn visual(id: &str, class_name: &str) -> VisualDetection {
        VisualDetection::new(id, BBox::new(0.0, 0.0, 40.0, 40.0), 0.8, class_name)
    }

    fn candidate(id: &str, defect_type: Option<&str>) -> CandidateRegion {
        CandidateRegion {
            id: id.to_string(),
            centroid: (5.0, 5.0),
            bbox: BBox::new(0.0, 0.0, 10.0, 10.0),
            area_pixels: 80,
            scores: BTreeMap::from([("ace".to_string(), 0.4)]),
            votes: 3,
            confidence: 0.6,
            defect_type: defect_type.map(str::to_string),
        }
    }

    #[test]
    fn collects_in_visual_then_candidate_order() {
        let visual = vec![visual("v1", "leak"), visual("v2", "crack")];
        let candidates = vec![candidate("c1", None), candidate("c2", None)];
        let alignment = AlignmentResult {
            matched: vec![MatchedPair { a: 1, b: 0, iou: 0.5 }],
            unmatched_a: vec![0],
            unmatched_b: vec![1],
        };
        let detections = collect_detections(&visual, &candidates, &alignment);
        let kinds: Vec<_> = detections.iter().map(Detection::provenance).collect();
        assert_eq!(
            kinds,
            vec![Provenance::Visual, Provenance::Fused, Provenance::Spectral]
        );
        assert_eq!(detections[1].source_id(), "v2");
        assert_eq!(detections[2].source_id(), "c2");
    }

    #[test]
    fn paired_prefers_spectral_defect_type_and_visual_box() {
        let identity = SequentialIdentity::with_prefix("det");
        let detection = Detection::Paired {
            visual: visual("v1", "faulty_pipe"),
            candidate: candidate("c1", Some("leak")),
            iou: 0.6,
        };
        let fused = resolve_detection(
            detection,
            &FusionConfig::default(),
            &GridShape::new(400, 400),
            &GridShape::new(100, 100),
            &identity,
        );
        assert_eq!(fused.detection_id, "det-000001");
        assert_eq!(fused.defect_type, "leak");
        assert_eq!(fused.class_name, "faulty_pipe");
        assert_eq!(fused.grid, SourceGrid::Visual);
        assert_eq!(fused.bbox, BBox::new(0.0, 0.0, 40.0, 40.0));
        assert_eq!(fused.provenance, Provenance::Fused);
        assert_eq!(fused.metadata.iou, Some(0.6));
        assert_eq!(fused.metadata.methods_agreed, Some(3));
        assert_eq!(fused.metadata.spectral_scores.get("ace"), Some(&0.4));
    }

    #[test]
    fn paired_uses_spectral_box_when_that_grid_is_finer() {
        let identity = SequentialIdentity::with_prefix("det");
        let detection = Detection::Paired {
            visual: visual("v1", "leak"),
            candidate: candidate("c1", None),
            iou: 0.6,
        };
        let fused = resolve_detection(
            detection,
            &FusionConfig::default(),
            &GridShape::new(100, 100),
            &GridShape::new(400, 400),
            &identity,
        );
        assert_eq!(fused.grid, SourceGrid::Spectral);
        assert_eq!(fused.bbox, BBox::new(0.0, 0.0, 10.0, 10.0));
        assert_eq!(fused.defect_type, "leak");
    }

    #[test]
    fn spectral_only_defaults_to_unknown_type() {
        let identity = SequentialIdentity::with_prefix("det");
        let fused = resolve_detection(
            Detection::Spectral(candidate("c9", None)),
            &FusionConfig::default(),
            &GridShape::new(100, 100),
            &GridShape::new(100, 100),
            &identity,
        );
        assert_eq!(fused.defect_type, "unknown");
        assert_eq!(fused.class_name, "spectral_anomaly");
        assert_eq!(fused.area, 80.0);
        assert_eq!(fused.visual_confidence, 0.0);
        assert_eq!(fused.metadata.candidate_id.as_deref(), Some("c9"));
    }
}
