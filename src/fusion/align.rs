use std::collections::BTreeSet;

use crate::config::MatchPolicy;
use crate::core::geometry::{BBox, GridShape};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpatialMatch {
    /// Index into the searched box list.
    pub index: usize,
    pub iou: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchedPair {
    pub a: usize,
    pub b: usize,
    pub iou: f64,
}

/// Indices into the two aligned lists. With [`MatchPolicy::FirstMatch`] one
/// `b` may appear in several pairs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AlignmentResult {
    pub matched: Vec<MatchedPair>,
    pub unmatched_a: Vec<usize>,
    pub unmatched_b: Vec<usize>,
}

/// Greedy, local IoU matching between two box lists, optionally expressed in
/// different pixel grids.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpatialMatcher {
    threshold: f64,
    policy: MatchPolicy,
}

impl SpatialMatcher {
    pub fn new(threshold: f64, policy: MatchPolicy) -> Self {
        Self { threshold, policy }
    }

    /// Every box with IoU >= threshold against `bbox`, best first. Equal IoUs
    /// keep list order.
    pub fn rank(&self, bbox: &BBox, boxes: &[BBox]) -> Vec<SpatialMatch> {
        let mut matches: Vec<SpatialMatch> = boxes
            .iter()
            .enumerate()
            .map(|(index, other)| SpatialMatch {
                index,
                iou: bbox.iou(other),
            })
            .filter(|m| m.iou >= self.threshold)
            .collect();
        matches.sort_by(|x, y| y.iou.total_cmp(&x.iou));
        matches
    }

    /// Rescales `bbox` from grid `from` into grid `to` before ranking.
    pub fn rank_across(
        &self,
        bbox: &BBox,
        boxes: &[BBox],
        from: &GridShape,
        to: &GridShape,
    ) -> Vec<SpatialMatch> {
        let (sx, sy) = from.scale_to(to);
        self.rank(&bbox.scale(sx, sy), boxes)
    }

    /// Each `a` picks its best `b` in turn. `a_boxes` must already be in the
    /// `b` grid.
    pub fn align(&self, a_boxes: &[BBox], b_boxes: &[BBox]) -> AlignmentResult {
        let mut result = AlignmentResult::default();
        let mut used_b = BTreeSet::new();

        for (a, bbox) in a_boxes.iter().enumerate() {
            let best = self
                .rank(bbox, b_boxes)
                .into_iter()
                .find(|m| self.policy == MatchPolicy::FirstMatch || !used_b.contains(&m.index));
            match best {
                Some(m) => {
                    used_b.insert(m.index);
                    result.matched.push(MatchedPair {
                        a,
                        b: m.index,
                        iou: m.iou,
                    });
                }
                None => result.unmatched_a.push(a),
            }
        }

        result.unmatched_b = (0..b_boxes.len()).filter(|b| !used_b.contains(b)).collect();
        result
    }

    pub fn align_across(
        &self,
        a_boxes: &[BBox],
        b_boxes: &[BBox],
        a_grid: &GridShape,
        b_grid: &GridShape,
    ) -> AlignmentResult {
        let (sx, sy) = a_grid.scale_to(b_grid);
        let scaled: Vec<BBox> = a_boxes.iter().map(|b| b.scale(sx, sy)).collect();
        self.align(&scaled, b_boxes)
    }
}
