use crate::core::model::FusedDetection;
use crate::core::severity::SeverityScorer;

/// Drops low-confidence records, scores severity, and orders by triage
/// priority (`combined_confidence * severity`, highest first; ties keep input order).
pub fn finalize(
    detections: Vec<FusedDetection>,
    min_confidence: f64,
    scorer: &SeverityScorer,
) -> Vec<FusedDetection> {
    let mut kept: Vec<FusedDetection> = detections
        .into_iter()
        .filter(|d| d.combined_confidence >= min_confidence)
        .map(|mut d| {
            d.severity = scorer.score(&d);
            d
        })
        .collect();
    kept.sort_by(|a, b| b.priority().total_cmp(&a.priority()));
    kept
}
