pub mod components;
pub mod confidence_map;
pub mod score_map;
pub mod signature;

use std::collections::BTreeMap;

use tracing::{debug, info};

use crate::config::{ExtractionConfig, MethodConfig};
use crate::core::cancel::CancelToken;
use crate::core::error::{ConfigError, FusionError, FusionResult};
use crate::core::geometry::BBox;
use crate::core::model::CandidateRegion;

pub use components::label_components;
pub use confidence_map::confidence_map;
pub use score_map::ScoreMap;
pub use signature::{spectral_angle, ReferenceLibrary};

/// Turns several independently thresholded score maps into candidate regions
/// by quorum voting and connected-component grouping.
#[derive(Debug, Clone)]
pub struct CandidateExtractor {
    config: ExtractionConfig,
}

impl CandidateExtractor {
    pub fn new(config: ExtractionConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn extract(&self, maps: &[ScoreMap]) -> FusionResult<Vec<CandidateRegion>> {
        self.extract_with_cancel(maps, &CancelToken::new())
    }

    pub fn extract_with_cancel(
        &self,
        maps: &[ScoreMap],
        cancel: &CancelToken,
    ) -> FusionResult<Vec<CandidateRegion>> {
        let aligned = align_maps(maps, &self.config)?;
        let Some((_, first)) = aligned.first() else {
            return Ok(Vec::new());
        };
        let (width, height) = (first.width, first.height);
        if width == 0 || height == 0 {
            return Ok(Vec::new());
        }

        let votes = vote_map(&aligned);
        let keep: Vec<bool> = votes.iter().map(|v| *v >= self.config.quorum).collect();
        let kept = keep.iter().filter(|k| **k).count();
        debug!(
            methods = aligned.len(),
            quorum = self.config.quorum,
            kept_pixels = kept,
            "quorum vote complete"
        );

        let components = label_components(&keep, width, cancel)?;
        let mut regions = Vec::new();
        for (label, pixels) in components.iter().enumerate() {
            cancel.check()?;
            if pixels.len() < self.config.min_region_pixels {
                continue;
            }
            regions.push(self.describe_region(label + 1, pixels, width, &votes, &aligned));
        }

        info!(
            components = components.len(),
            candidates = regions.len(),
            "candidate extraction complete"
        );
        Ok(regions)
    }

    fn describe_region(
        &self,
        label: usize,
        pixels: &[usize],
        width: usize,
        votes: &[usize],
        aligned: &[(&MethodConfig, &ScoreMap)],
    ) -> CandidateRegion {
        let count = pixels.len() as f64;
        let (mut sum_x, mut sum_y) = (0.0, 0.0);
        let (mut min_x, mut min_y) = (usize::MAX, usize::MAX);
        let (mut max_x, mut max_y) = (0, 0);
        for &idx in pixels {
            let (x, y) = (idx % width, idx / width);
            sum_x += x as f64;
            sum_y += y as f64;
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);
        }

        let mut scores = BTreeMap::new();
        let mut confidence = 0.0;
        for (method, map) in aligned {
            let mean = region_mean(map, pixels);
            confidence += (mean - method.baseline) * method.weight;
            scores.insert(method.name.clone(), mean);
        }

        CandidateRegion {
            id: format!("candidate_{label}"),
            centroid: (sum_x / count, sum_y / count),
            bbox: BBox::new(
                min_x as f64,
                min_y as f64,
                (max_x + 1) as f64,
                (max_y + 1) as f64,
            ),
            area_pixels: pixels.len(),
            scores,
            votes: pixels.iter().map(|&idx| votes[idx]).max().unwrap_or(0),
            confidence: if confidence.is_finite() {
                confidence.clamp(0.0, 1.0)
            } else {
                0.0
            },
            defect_type: None,
        }
    }
}

/// Pairs each configured method with its score map, in configuration order,
/// and checks that every map shares one pixel grid.
pub(crate) fn align_maps<'a>(
    maps: &'a [ScoreMap],
    config: &'a ExtractionConfig,
) -> FusionResult<Vec<(&'a MethodConfig, &'a ScoreMap)>> {
    if maps.is_empty() {
        return Ok(Vec::new());
    }
    if let Some(unknown) = maps.iter().find(|map| config.method(&map.name).is_none()) {
        return Err(FusionError::UnknownMethod(unknown.name.clone()));
    }

    let mut aligned = Vec::with_capacity(config.methods.len());
    for method in &config.methods {
        let map = maps
            .iter()
            .find(|map| map.name == method.name)
            .ok_or_else(|| FusionError::MissingScoreMap(method.name.clone()))?;
        map.check_len()?;
        aligned.push((method, map));
    }

    let (width, height) = (aligned[0].1.width, aligned[0].1.height);
    for (_, map) in &aligned {
        if map.width != width || map.height != height {
            return Err(FusionError::ShapeMismatch {
                name: map.name.clone(),
                width,
                height,
                found_width: map.width,
                found_height: map.height,
            });
        }
    }
    Ok(aligned)
}

fn vote_map(aligned: &[(&MethodConfig, &ScoreMap)]) -> Vec<usize> {
    let len = aligned.first().map(|(_, map)| map.data.len()).unwrap_or(0);
    let mut votes = vec![0usize; len];
    for (method, map) in aligned {
        for (vote, passed) in votes.iter_mut().zip(map.binarize(method.threshold)) {
            if passed {
                *vote += 1;
            }
        }
    }
    votes
}

fn region_mean(map: &ScoreMap, pixels: &[usize]) -> f64 {
    let (sum, n) = pixels
        .iter()
        .map(|&idx| map.data[idx])
        .filter(|v| v.is_finite())
        .fold((0.0, 0usize), |(sum, n), v| (sum + v, n + 1));
    if n == 0 {
        0.0
    } else {
        sum / n as f64
    }
}
