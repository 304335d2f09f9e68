//! Merging visual detections gathered from overlapping image tiles.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::TilingConfig;
use crate::core::model::VisualDetection;

/// Detections from one tile, in tile-local pixel coordinates.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TileDetections {
    pub origin_x: f64,
    pub origin_y: f64,
    pub detections: Vec<VisualDetection>,
}

/// Shifts every tile's detections into full-image coordinates, then removes
/// cross-tile duplicates.
pub fn merge_tiles(tiles: Vec<TileDetections>, config: &TilingConfig) -> Vec<VisualDetection> {
    let all: Vec<VisualDetection> = tiles
        .into_iter()
        .flat_map(|tile| {
            let (dx, dy) = (tile.origin_x, tile.origin_y);
            tile.detections.into_iter().map(move |mut det| {
                det.bbox = det.bbox.translate(dx, dy);
                det
            })
        })
        .collect();
    suppress_duplicates(all, config)
}

/// Per-class greedy non-maximum suppression. Survivors keep their input order.
pub fn suppress_duplicates(
    detections: Vec<VisualDetection>,
    config: &TilingConfig,
) -> Vec<VisualDetection> {
    let total = detections.len();
    let mut by_class: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
    for (idx, det) in detections.iter().enumerate() {
        if det.confidence >= config.min_confidence {
            by_class.entry(det.class_name.as_str()).or_default().push(idx);
        }
    }

    let mut keep = vec![false; total];
    for indices in by_class.values() {
        let mut ranked = indices.clone();
        ranked.sort_by(|a, b| {
            detections[*b]
                .confidence
                .total_cmp(&detections[*a].confidence)
        });

        let mut kept: Vec<usize> = Vec::new();
        for idx in ranked {
            let overlaps = kept
                .iter()
                .any(|k| detections[*k].bbox.iou(&detections[idx].bbox) > config.nms_iou);
            if !overlaps {
                kept.push(idx);
                keep[idx] = true;
            }
        }
    }

    let merged: Vec<VisualDetection> = detections
        .into_iter()
        .zip(keep)
        .filter_map(|(det, k)| k.then_some(det))
        .collect();
    debug!(before = total, after = merged.len(), "non-maximum suppression");
    merged
}
