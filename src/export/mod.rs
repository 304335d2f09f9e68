pub mod json_export;
pub mod text_export;

use std::collections::BTreeMap;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::change::ChangeSummary;
use crate::core::geometry::GridShape;
use crate::core::model::{CandidateRegion, ChangeRecord, FusedDetection, Provenance};

pub use json_export::JsonExporter;
pub use text_export::TextExporter;

pub trait Exporter {
    fn export_fusion(&self, report: &FusionReport) -> Result<()>;
    fn export_changes(&self, report: &ChangeReport) -> Result<()>;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FusionSummary {
    pub total: usize,
    pub fused: usize,
    pub visual_only: usize,
    pub spectral_only: usize,
    pub by_defect_type: BTreeMap<String, usize>,
}

impl FusionSummary {
    pub fn from_detections(detections: &[FusedDetection]) -> Self {
        let mut summary = Self {
            total: detections.len(),
            ..Self::default()
        };
        for det in detections {
            match det.provenance {
                Provenance::Fused => summary.fused += 1,
                Provenance::Visual => summary.visual_only += 1,
                Provenance::Spectral => summary.spectral_only += 1,
            }
            *summary
                .by_defect_type
                .entry(det.defect_type.clone())
                .or_default() += 1;
        }
        summary
    }
}

/// Output of one fusion run: the extracted candidates and the ranked detections.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FusionReport {
    pub generated_at: DateTime<Utc>,
    pub visual_grid: GridShape,
    pub spectral_grid: GridShape,
    pub summary: FusionSummary,
    pub candidates: Vec<CandidateRegion>,
    pub detections: Vec<FusedDetection>,
}

impl FusionReport {
    pub fn new(
        generated_at: DateTime<Utc>,
        visual_grid: GridShape,
        spectral_grid: GridShape,
        candidates: Vec<CandidateRegion>,
        detections: Vec<FusedDetection>,
    ) -> Self {
        Self {
            generated_at,
            visual_grid,
            spectral_grid,
            summary: FusionSummary::from_detections(&detections),
            candidates,
            detections,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChangeReport {
    pub generated_at: DateTime<Utc>,
    pub summary: ChangeSummary,
    pub changes: Vec<ChangeRecord>,
}

impl ChangeReport {
    pub fn new(generated_at: DateTime<Utc>, changes: Vec<ChangeRecord>) -> Self {
        Self {
            generated_at,
            summary: ChangeSummary::from_records(&changes),
            changes,
        }
    }
}
