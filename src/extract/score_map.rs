use serde::{Deserialize, Serialize};

use crate::config::ThresholdPolicy;
use crate::core::error::{FusionError, FusionResult};

/// One detection method's per-pixel scores, row-major.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoreMap {
    pub name: String,
    pub width: usize,
    pub height: usize,
    pub data: Vec<f64>,
}

impl ScoreMap {
    pub fn new(name: impl Into<String>, width: usize, height: usize, data: Vec<f64>) -> FusionResult<Self> {
        let map = Self {
            name: name.into(),
            width,
            height,
            data,
        };
        map.check_len()?;
        Ok(map)
    }

    pub fn check_len(&self) -> FusionResult<()> {
        let expected = self
            .width
            .checked_mul(self.height)
            .ok_or_else(|| FusionError::GridTooLarge {
                name: self.name.clone(),
                width: self.width,
                height: self.height,
            })?;
        if self.data.len() != expected {
            return Err(FusionError::DataLength {
                name: self.name.clone(),
                expected,
                found: self.data.len(),
            });
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Linear-interpolated percentile over the finite values; `None` when there are none.
    pub fn percentile(&self, p: f64) -> Option<f64> {
        let mut values: Vec<f64> = self.data.iter().copied().filter(|v| v.is_finite()).collect();
        if values.is_empty() {
            return None;
        }
        values.sort_by(f64::total_cmp);
        let rank = (p.clamp(0.0, 100.0) / 100.0) * (values.len() - 1) as f64;
        let lo = rank.floor() as usize;
        let hi = rank.ceil() as usize;
        let frac = rank - lo as f64;
        Some(values[lo] + (values[hi] - values[lo]) * frac)
    }

    pub fn threshold(&self, policy: ThresholdPolicy) -> Option<f64> {
        match policy {
            ThresholdPolicy::Fixed(value) => Some(value),
            ThresholdPolicy::Percentile(p) => self.percentile(p),
        }
    }

    /// Pixels strictly above the policy's threshold. Non-finite scores never pass.
    pub fn binarize(&self, policy: ThresholdPolicy) -> Vec<bool> {
        match self.threshold(policy) {
            Some(threshold) => self
                .data
                .iter()
                .map(|v| v.is_finite() && *v > threshold)
                .collect(),
            None => vec![false; self.data.len()],
        }
    }

    pub fn min_max(&self) -> Option<(f64, f64)> {
        self.data
            .iter()
            .copied()
            .filter(|v| v.is_finite())
            .fold(None, |acc, v| match acc {
                None => Some((v, v)),
                Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn rejects_mismatched_length() {
        let result = ScoreMap::new("rx", 3, 2, vec![0.0; 5]);
        assert!(matches!(result, Err(FusionError::DataLength { expected: 6, found: 5, .. })));
    }

    #[test]
    fn rejects_dimensions_whose_area_overflows() {
        let result = ScoreMap::new("rx", usize::MAX, 2, vec![0.0; 4]);
        assert!(matches!(
            result,
            Err(FusionError::GridTooLarge { width: usize::MAX, height: 2, .. })
        ));
    }

    #[test]
    fn percentile_interpolates() {
        let map = ScoreMap::new("rx", 5, 1, vec![4.0, 1.0, 3.0, 2.0, 5.0]).unwrap();
        assert_eq!(map.percentile(0.0), Some(1.0));
        assert_eq!(map.percentile(50.0), Some(3.0));
        assert_eq!(map.percentile(100.0), Some(5.0));
        let p90 = map.percentile(90.0).unwrap();
        assert!((p90 - 4.6).abs() < 1e-9);
    }

    #[test]
    fn constant_map_has_no_pixels_above_its_percentile() {
        let map = ScoreMap::new("mf", 3, 3, vec![0.5; 9]).unwrap();
        let mask = map.binarize(ThresholdPolicy::Percentile(95.0));
        assert!(mask.iter().all(|kept| !kept));
    }

    #[test]
    fn binarize_ignores_nan() {
        let map = ScoreMap::new("ace", 3, 1, vec![0.9, f64::NAN, 0.1]).unwrap();
        assert_eq!(map.binarize(ThresholdPolicy::Fixed(0.5)), vec![true, false, false]);
    }
}
