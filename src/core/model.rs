use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::error::FusionError;
use crate::core::geometry::BBox;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    Visual,
    Spectral,
    Fused,
}

impl Provenance {
    pub fn has_visual(&self) -> bool {
        matches!(self, Provenance::Visual | Provenance::Fused)
    }

    pub fn has_spectral(&self) -> bool {
        matches!(self, Provenance::Spectral | Provenance::Fused)
    }
}

/// Pixel grid a bounding box is expressed in.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SourceGrid {
    Visual,
    Spectral,
}

/// A bounding box produced by the visual object detector.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VisualDetection {
    pub id: String,
    pub bbox: BBox,
    pub confidence: f64,
    pub class_name: String,
}

impl VisualDetection {
    pub fn new(id: impl Into<String>, bbox: BBox, confidence: f64, class_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            bbox,
            confidence,
            class_name: class_name.into(),
        }
    }

    pub fn area(&self) -> f64 {
        self.bbox.area()
    }

    pub fn center(&self) -> (f64, f64) {
        self.bbox.center()
    }

    pub fn validate(&self) -> Result<(), FusionError> {
        check_record(&self.id, &self.bbox, self.confidence)
    }
}

/// A connected region where a quorum of score maps exceeded their thresholds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CandidateRegion {
    pub id: String,
    pub centroid: (f64, f64),
    pub bbox: BBox,
    pub area_pixels: usize,
    /// Mean score of each method over the region's pixels, keyed by method name.
    pub scores: BTreeMap<String, f64>,
    pub votes: usize,
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub defect_type: Option<String>,
}

impl CandidateRegion {
    pub fn with_defect_type(mut self, defect_type: impl Into<String>) -> Self {
        self.defect_type = Some(defect_type.into());
        self
    }

    pub fn validate(&self) -> Result<(), FusionError> {
        check_record(&self.id, &self.bbox, self.confidence)
    }
}

fn check_record(id: &str, bbox: &BBox, confidence: f64) -> Result<(), FusionError> {
    if !confidence.is_finite() || !(0.0..=1.0).contains(&confidence) {
        return Err(FusionError::MalformedRecord {
            id: id.to_string(),
            reason: format!("confidence {confidence} outside [0, 1]"),
        });
    }
    if !bbox.is_finite() {
        return Err(FusionError::MalformedRecord {
            id: id.to_string(),
            reason: "bounding box has a non-finite coordinate".to_string(),
        });
    }
    Ok(())
}

/// Evidence for one object after spatial matching, before confidences are fused.
#[derive(Debug, Clone, PartialEq)]
pub enum Detection {
    Visual(VisualDetection),
    Spectral(CandidateRegion),
    Paired {
        visual: VisualDetection,
        candidate: CandidateRegion,
        iou: f64,
    },
}

impl Detection {
    pub fn provenance(&self) -> Provenance {
        match self {
            Detection::Visual(_) => Provenance::Visual,
            Detection::Spectral(_) => Provenance::Spectral,
            Detection::Paired { .. } => Provenance::Fused,
        }
    }

    pub fn source_id(&self) -> &str {
        match self {
            Detection::Visual(visual) | Detection::Paired { visual, .. } => &visual.id,
            Detection::Spectral(candidate) => &candidate.id,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FusionMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visual_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub candidate_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visual_class: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spectral_defect_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spectral_area_pixels: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub methods_agreed: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iou: Option<f64>,
    #[serde(default)]
    pub spectral_scores: BTreeMap<String, f64>,
    pub created_at: DateTime<Utc>,
}

/// The unified defect record produced by fusion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FusedDetection {
    pub detection_id: String,
    pub bbox: BBox,
    pub grid: SourceGrid,
    pub visual_confidence: f64,
    pub spectral_confidence: f64,
    pub combined_confidence: f64,
    pub defect_type: String,
    pub class_name: String,
    pub area: f64,
    pub center: (f64, f64),
    /// Assigned by the severity scorer once the record survives filtering.
    pub severity: u8,
    pub provenance: Provenance,
    pub metadata: FusionMetadata,
}

impl FusedDetection {
    pub fn priority(&self) -> f64 {
        self.combined_confidence * f64::from(self.severity)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    NewDamage,
    PossibleRepair,
    InfrastructureLoss,
    ConditionDeteriorated,
}

impl ChangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeType::NewDamage => "new_damage",
            ChangeType::PossibleRepair => "possible_repair",
            ChangeType::InfrastructureLoss => "infrastructure_loss",
            ChangeType::ConditionDeteriorated => "condition_deteriorated",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SpectralCorroboration {
    pub candidate_id: String,
    pub confidence: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub defect_type: Option<String>,
    pub iou: f64,
}

/// One observed difference between a before and an after detection set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChangeRecord {
    pub change_id: String,
    pub change_type: ChangeType,
    pub before: Option<FusedDetection>,
    pub after: Option<FusedDetection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub severity_delta: Option<i32>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spectral: Option<SpectralCorroboration>,
}

impl ChangeRecord {
    pub fn appeared(change_id: String, after: FusedDetection, created_at: DateTime<Utc>) -> Self {
        Self {
            change_id,
            change_type: ChangeType::NewDamage,
            before: None,
            after: Some(after),
            severity_delta: None,
            created_at,
            spectral: None,
        }
    }

    pub fn vanished(
        change_id: String,
        change_type: ChangeType,
        before: FusedDetection,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            change_id,
            change_type,
            before: Some(before),
            after: None,
            severity_delta: None,
            created_at,
            spectral: None,
        }
    }

    pub fn changed(
        change_id: String,
        before: FusedDetection,
        after: FusedDetection,
        created_at: DateTime<Utc>,
    ) -> Self {
        let delta = i32::from(after.severity) - i32::from(before.severity);
        Self {
            change_id,
            change_type: ChangeType::ConditionDeteriorated,
            before: Some(before),
            after: Some(after),
            severity_delta: Some(delta),
            created_at,
            spectral: None,
        }
    }

    pub fn with_corroboration(mut self, corroboration: SpectralCorroboration) -> Self {
        self.spectral = Some(corroboration);
        self
    }
}
