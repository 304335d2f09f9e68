//! Before/after comparison of two detection sets.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::{check_unit, ChangeConfig, EngineConfig, SEVERITY_MAX, SEVERITY_MIN};
use crate::core::error::{ConfigError, FusionError, FusionResult};
use crate::core::geometry::BBox;
use crate::core::identity::{IdentityProvider, SystemIdentity};
use crate::core::model::{
    CandidateRegion, ChangeRecord, ChangeType, FusedDetection, FusionMetadata, Provenance,
    SourceGrid, SpectralCorroboration, VisualDetection,
};
use crate::fusion::align::SpatialMatcher;

/// Absorbs floating-point noise when comparing confidence deltas to their cutoff.
const DELTA_TOLERANCE: f64 = 1e-9;

#[derive(Debug)]
pub struct ChangeDetector<P = SystemIdentity> {
    config: ChangeConfig,
    identity: P,
}

impl ChangeDetector<SystemIdentity> {
    pub fn new(config: ChangeConfig) -> Result<Self, ConfigError> {
        Self::with_identity(config, SystemIdentity)
    }
}

impl<P: IdentityProvider> ChangeDetector<P> {
    pub fn with_identity(config: ChangeConfig, identity: P) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config, identity })
    }

    pub fn detect_changes(
        &self,
        before: &[FusedDetection],
        after: &[FusedDetection],
    ) -> FusionResult<Vec<ChangeRecord>> {
        self.detect_changes_with_threshold(before, after, self.config.iou_threshold)
    }

    pub fn detect_changes_with_threshold(
        &self,
        before: &[FusedDetection],
        after: &[FusedDetection],
        iou_threshold: f64,
    ) -> FusionResult<Vec<ChangeRecord>> {
        check_unit("change.iou_threshold", iou_threshold)?;
        for det in before.iter().chain(after) {
            validate(det)?;
        }
        info!(
            before = before.len(),
            after = after.len(),
            iou_threshold,
            "detecting changes"
        );

        let matcher = SpatialMatcher::new(iou_threshold, self.config.match_policy);
        let before_boxes: Vec<BBox> = before.iter().map(|d| d.bbox).collect();
        let after_boxes: Vec<BBox> = after.iter().map(|d| d.bbox).collect();
        let alignment = matcher.align(&before_boxes, &after_boxes);

        let mut changes = Vec::new();
        let mut matched = alignment.matched.iter().peekable();
        for (idx, old) in before.iter().enumerate() {
            match matched.next_if(|pair| pair.a == idx) {
                Some(pair) => {
                    let new = &after[pair.b];
                    if self.has_condition_changed(old, new) {
                        changes.push(ChangeRecord::changed(
                            self.identity.next_id(),
                            old.clone(),
                            new.clone(),
                            self.identity.now(),
                        ));
                    }
                }
                None => {
                    let change_type = if self.is_transient(&old.class_name) {
                        ChangeType::PossibleRepair
                    } else {
                        ChangeType::InfrastructureLoss
                    };
                    changes.push(ChangeRecord::vanished(
                        self.identity.next_id(),
                        change_type,
                        old.clone(),
                        self.identity.now(),
                    ));
                }
            }
        }

        for &idx in &alignment.unmatched_b {
            changes.push(ChangeRecord::appeared(
                self.identity.next_id(),
                after[idx].clone(),
                self.identity.now(),
            ));
        }

        let summary = ChangeSummary::from_records(&changes);
        info!(
            total = summary.total,
            new_damage = summary.new_damage,
            possible_repair = summary.possible_repair,
            infrastructure_loss = summary.infrastructure_loss,
            condition_deteriorated = summary.condition_deteriorated,
            "change detection complete"
        );
        Ok(changes)
    }

    /// Compares raw visual detections, treating each as an uncorroborated
    /// record at the configured default severity.
    pub fn detect_raw_changes(
        &self,
        before: &[VisualDetection],
        after: &[VisualDetection],
    ) -> FusionResult<Vec<ChangeRecord>> {
        let before = self.promote_all(before)?;
        let after = self.promote_all(after)?;
        self.detect_changes(&before, &after)
    }

    /// Marks `after` records overlapping a spectral candidate. Only adds data;
    /// the first overlapping candidate in list order wins.
    pub fn enhance_with_spectral(
        &self,
        changes: Vec<ChangeRecord>,
        candidates: &[CandidateRegion],
    ) -> Vec<ChangeRecord> {
        let mut corroborated = 0usize;
        let enhanced: Vec<ChangeRecord> = changes
            .into_iter()
            .map(|change| {
                let hit = change.after.as_ref().and_then(|after| {
                    candidates.iter().find_map(|candidate| {
                        let iou = after.bbox.iou(&candidate.bbox);
                        (iou > self.config.corroboration_iou).then(|| SpectralCorroboration {
                            candidate_id: candidate.id.clone(),
                            confidence: candidate.confidence,
                            defect_type: candidate.defect_type.clone(),
                            iou,
                        })
                    })
                });
                match hit {
                    Some(corroboration) => {
                        corroborated += 1;
                        change.with_corroboration(corroboration)
                    }
                    None => change,
                }
            })
            .collect();
        debug!(corroborated, candidates = candidates.len(), "spectral corroboration");
        enhanced
    }

    fn has_condition_changed(&self, before: &FusedDetection, after: &FusedDetection) -> bool {
        if before.class_name != after.class_name {
            return true;
        }
        let severity_delta = (i32::from(after.severity) - i32::from(before.severity)).abs();
        if severity_delta >= self.config.severity_delta {
            return true;
        }
        let confidence_delta = (after.combined_confidence - before.combined_confidence).abs();
        confidence_delta + DELTA_TOLERANCE >= self.config.confidence_delta
    }

    fn is_transient(&self, class_name: &str) -> bool {
        self.config.transient_classes.iter().any(|c| c == class_name)
    }

    fn promote_all(&self, detections: &[VisualDetection]) -> FusionResult<Vec<FusedDetection>> {
        detections
            .iter()
            .map(|det| {
                det.validate()?;
                Ok(self.promote(det))
            })
            .collect()
    }

    fn promote(&self, det: &VisualDetection) -> FusedDetection {
        FusedDetection {
            detection_id: det.id.clone(),
            bbox: det.bbox,
            grid: SourceGrid::Visual,
            visual_confidence: det.confidence,
            spectral_confidence: 0.0,
            combined_confidence: det.confidence,
            defect_type: det.class_name.clone(),
            class_name: det.class_name.clone(),
            area: det.area(),
            center: det.center(),
            severity: self.config.default_severity,
            provenance: Provenance::Visual,
            metadata: FusionMetadata {
                visual_id: Some(det.id.clone()),
                candidate_id: None,
                visual_class: Some(det.class_name.clone()),
                spectral_defect_type: None,
                spectral_area_pixels: None,
                methods_agreed: None,
                iou: None,
                spectral_scores: Default::default(),
                created_at: self.identity.now(),
            },
        }
    }
}

fn validate(det: &FusedDetection) -> FusionResult<()> {
    let malformed = |reason: String| FusionError::MalformedRecord {
        id: det.detection_id.clone(),
        reason,
    };
    if !det.combined_confidence.is_finite() || !(0.0..=1.0).contains(&det.combined_confidence) {
        return Err(malformed(format!(
            "combined confidence {} outside [0, 1]",
            det.combined_confidence
        )));
    }
    if !(SEVERITY_MIN..=SEVERITY_MAX).contains(&det.severity) {
        return Err(malformed(format!("severity {} outside [1, 10]", det.severity)));
    }
    if !det.bbox.is_finite() {
        return Err(malformed("bounding box has a non-finite coordinate".to_string()));
    }
    Ok(())
}

/// Totals of one comparison run, by change type.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChangeSummary {
    pub total: usize,
    pub new_damage: usize,
    pub possible_repair: usize,
    pub infrastructure_loss: usize,
    pub condition_deteriorated: usize,
    pub corroborated: usize,
}

impl ChangeSummary {
    pub fn from_records(records: &[ChangeRecord]) -> Self {
        let mut summary = Self {
            total: records.len(),
            ..Self::default()
        };
        for record in records {
            match record.change_type {
                ChangeType::NewDamage => summary.new_damage += 1,
                ChangeType::PossibleRepair => summary.possible_repair += 1,
                ChangeType::InfrastructureLoss => summary.infrastructure_loss += 1,
                ChangeType::ConditionDeteriorated => summary.condition_deteriorated += 1,
            }
            if record.spectral.is_some() {
                summary.corroborated += 1;
            }
        }
        summary
    }
}

/// One-shot change detection with system identifiers.
pub fn detect_changes(
    before: &[FusedDetection],
    after: &[FusedDetection],
    iou_threshold: f64,
    config: &EngineConfig,
) -> FusionResult<Vec<ChangeRecord>> {
    ChangeDetector::new(config.change.clone())?.detect_changes_with_threshold(before, after, iou_threshold)
}

/// One-shot corroboration pass with the default overlap cutoff.
pub fn enhance_with_spectral(
    changes: Vec<ChangeRecord>,
    candidates: &[CandidateRegion],
) -> FusionResult<Vec<ChangeRecord>> {
    Ok(ChangeDetector::new(ChangeConfig::default())?.enhance_with_spectral(changes, candidates))
}
