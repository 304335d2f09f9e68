use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::change::ChangeDetector;
use crate::config::EngineConfig;
use crate::core::cancel::CancelToken;
use crate::core::geometry::GridShape;
use crate::core::identity::IdentityProvider;
use crate::core::model::{CandidateRegion, FusedDetection, VisualDetection};
use crate::export::json_export::JsonExporter;
use crate::export::text_export::TextExporter;
use crate::export::{ChangeReport, Exporter, FusionReport};
use crate::extract::{confidence_map, CandidateExtractor, ReferenceLibrary, ScoreMap};
use crate::fusion::nms::{merge_tiles, TileDetections};
use crate::fusion::{DefectFusionEngine, FusionEngine};

pub const CONFIDENCE_MAP_FILE: &str = "confidence_map.json";

/// Everything one observation pass contributes to a fusion run.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SceneInput {
    pub visual_grid: GridShape,
    pub spectral_grid: GridShape,
    #[serde(default)]
    pub visual_detections: Vec<VisualDetection>,
    /// Tile-local detections, merged into `visual_detections` before fusion.
    #[serde(default)]
    pub tiles: Vec<TileDetections>,
    #[serde(default)]
    pub score_maps: Vec<ScoreMap>,
    /// Precomputed candidates, used alongside any extracted from `score_maps`.
    #[serde(default)]
    pub candidates: Vec<CandidateRegion>,
    #[serde(default)]
    pub reference_library: ReferenceLibrary,
    /// Mean spectrum per candidate id, for signature tagging.
    #[serde(default)]
    pub candidate_spectra: BTreeMap<String, Vec<f64>>,
}

impl SceneInput {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read scene {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse scene {}", path.display()))
    }
}

/// A fused report plus the dense confidence companion when score maps were given.
#[derive(Debug, Clone, PartialEq)]
pub struct FusionRun {
    pub report: FusionReport,
    pub confidence_map: Option<ScoreMap>,
}

pub fn run_fusion<P: IdentityProvider>(
    scene: SceneInput,
    config: &EngineConfig,
    identity: P,
    cancel: &CancelToken,
) -> Result<FusionRun> {
    let SceneInput {
        visual_grid,
        spectral_grid,
        mut visual_detections,
        tiles,
        score_maps,
        candidates: precomputed,
        reference_library,
        candidate_spectra,
    } = scene;

    if !tiles.is_empty() {
        visual_detections.extend(merge_tiles(tiles, &config.tiling));
    }

    let extractor = CandidateExtractor::new(config.extraction.clone())?;
    let mut candidates = extractor
        .extract_with_cancel(&score_maps, cancel)
        .context("candidate extraction failed")?;
    candidates.extend(precomputed);

    let mut seen = BTreeSet::new();
    if let Some(duplicate) = candidates.iter().find(|c| !seen.insert(c.id.as_str())) {
        anyhow::bail!(
            "candidate id '{}' appears more than once; precomputed ids must not reuse extracted ones",
            duplicate.id
        );
    }

    if !reference_library.is_empty() {
        candidates = candidates
            .into_iter()
            .map(|candidate| match candidate_spectra.get(&candidate.id) {
                Some(spectrum) => reference_library.tag(candidate, spectrum),
                None => candidate,
            })
            .collect();
    }

    let confidence = if score_maps.is_empty() {
        None
    } else {
        Some(confidence_map(&score_maps, &config.extraction)?)
    };
    cancel.check()?;

    let engine = DefectFusionEngine::with_identity(config.clone(), &identity)?;
    let detections = engine
        .fuse(&visual_detections, &candidates, visual_grid, spectral_grid)
        .context("fusion failed")?;
    info!(
        candidates = candidates.len(),
        detections = detections.len(),
        "scene fused"
    );

    Ok(FusionRun {
        report: FusionReport::new(
            identity.now(),
            visual_grid,
            spectral_grid,
            candidates,
            detections,
        ),
        confidence_map: confidence,
    })
}

/// A detection set on disk: either a previous fusion report or a bare list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum DetectionSet {
    Report(FusionReport),
    Detections(Vec<FusedDetection>),
}

impl DetectionSet {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read detections {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse detections {}", path.display()))
    }

    pub fn into_detections(self) -> Vec<FusedDetection> {
        match self {
            DetectionSet::Report(report) => report.detections,
            DetectionSet::Detections(detections) => detections,
        }
    }
}

pub fn load_candidates(path: &Path) -> Result<Vec<CandidateRegion>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read candidates {}", path.display()))?;
    match serde_json::from_str::<DetectionSource>(&raw)
        .with_context(|| format!("failed to parse candidates {}", path.display()))?
    {
        DetectionSource::Report(report) => Ok(report.candidates),
        DetectionSource::Candidates(candidates) => Ok(candidates),
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum DetectionSource {
    Report(FusionReport),
    Candidates(Vec<CandidateRegion>),
}

pub fn run_changes<P: IdentityProvider>(
    before: Vec<FusedDetection>,
    after: Vec<FusedDetection>,
    candidates: Option<&[CandidateRegion]>,
    config: &EngineConfig,
    identity: P,
) -> Result<ChangeReport> {
    let detector = ChangeDetector::with_identity(config.change.clone(), &identity)?;
    let mut changes = detector
        .detect_changes(&before, &after)
        .context("change detection failed")?;
    match candidates {
        Some(candidates) if !candidates.is_empty() => {
            changes = detector.enhance_with_spectral(changes, candidates);
        }
        Some(_) => warn!("spectral corroboration requested with no candidates"),
        None => {}
    }
    Ok(ChangeReport::new(identity.now(), changes))
}

pub fn export_fusion(run: &FusionRun, output: &Path) -> Result<()> {
    let json = JsonExporter::new(output.to_path_buf());
    json.export_fusion(&run.report)?;
    if let Some(map) = &run.confidence_map {
        json.write(CONFIDENCE_MAP_FILE, map)?;
    }
    TextExporter::new(output.to_path_buf()).export_fusion(&run.report)?;
    Ok(())
}

pub fn export_changes(report: &ChangeReport, output: &Path) -> Result<()> {
    JsonExporter::new(output.to_path_buf()).export_changes(report)?;
    TextExporter::new(output.to_path_buf()).export_changes(report)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    use crate::core::geometry::BBox;
    use crate::core::identity::SequentialIdentity;
    use crate::core::model::Provenance;
    use crate::export::json_export::{CHANGE_REPORT_FILE, FUSION_REPORT_FILE};

    fn scene() -> SceneInput {
        SceneInput {
            visual_grid: GridShape::new(40, 40),
            spectral_grid: GridShape::new(40, 40),
            visual_detections: vec![VisualDetection::new(
                "v1",
                BBox::new(0.0, 0.0, 4.0, 4.0),
                0.9,
                "leak",
            )],
            candidates: vec![CandidateRegion {
                id: "pre_1".to_string(),
                centroid: (2.0, 2.0),
                bbox: BBox::new(0.0, 0.0, 4.0, 4.0),
                area_pixels: 16,
                scores: BTreeMap::new(),
                votes: 2,
                confidence: 0.5,
                defect_type: None,
            }],
            reference_library: ReferenceLibrary::new().with_reference(
                "wet",
                "leak",
                vec![1.0, 0.2],
            ),
            candidate_spectra: BTreeMap::from([("pre_1".to_string(), vec![0.9, 0.2])]),
            ..SceneInput::default()
        }
    }

    #[test]
    fn fuses_precomputed_candidates_and_tags_signatures() -> Result<()> {
        let run = run_fusion(
            scene(),
            &EngineConfig::default(),
            SequentialIdentity::with_prefix("det"),
            &CancelToken::new(),
        )?;
        assert_eq!(run.confidence_map, None);
        assert_eq!(run.report.candidates[0].defect_type.as_deref(), Some("leak"));
        assert_eq!(run.report.detections.len(), 1);
        assert_eq!(run.report.detections[0].provenance, Provenance::Fused);
        assert_eq!(run.report.summary.fused, 1);
        Ok(())
    }

    #[test]
    fn duplicate_candidate_ids_are_rejected() {
        let mut scene = scene();
        let copy = scene.candidates[0].clone();
        scene.candidates.push(copy);
        let err = run_fusion(
            scene,
            &EngineConfig::default(),
            SequentialIdentity::with_prefix("det"),
            &CancelToken::new(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("pre_1"));
    }

    #[test]
    fn cancelled_run_stops() {
        let token = CancelToken::new();
        token.cancel();
        let result = run_fusion(
            scene(),
            &EngineConfig::default(),
            SequentialIdentity::with_prefix("det"),
            &token,
        );
        assert!(result.is_err());
    }

    #[test]
    fn exports_and_reloads_a_report_as_a_detection_set() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let run = run_fusion(
            scene(),
            &EngineConfig::default(),
            SequentialIdentity::with_prefix("det"),
            &CancelToken::new(),
        )?;
        export_fusion(&run, dir.path())?;
        assert!(dir.path().join("triage.txt").exists());

        let reloaded = DetectionSet::load(&dir.path().join(FUSION_REPORT_FILE))?;
        let after = reloaded.into_detections();
        let ids: Vec<_> = after.iter().map(|d| d.detection_id.as_str()).collect();
        assert_eq!(ids, vec!["det-000001"]);

        let candidates = load_candidates(&dir.path().join(FUSION_REPORT_FILE))?;
        let report = run_changes(
            vec![],
            after,
            Some(&candidates),
            &EngineConfig::default(),
            SequentialIdentity::with_prefix("chg"),
        )?;
        assert_eq!(report.summary.new_damage, 1);
        assert_eq!(report.summary.corroborated, 1);

        export_changes(&report, dir.path())?;
        assert!(dir.path().join(CHANGE_REPORT_FILE).exists());
        assert!(dir.path().join("changes.txt").exists());
        Ok(())
    }
}
