use crate::config::{ExtractionConfig, Normalization};
use crate::core::error::FusionResult;
use crate::extract::align_maps;
use crate::extract::score_map::ScoreMap;

const RANGE_EPSILON: f64 = 1e-10;

/// Dense per-pixel confidence: each method normalised to [0, 1] and blended
/// with its configured weight.
pub fn confidence_map(maps: &[ScoreMap], config: &ExtractionConfig) -> FusionResult<ScoreMap> {
    let aligned = align_maps(maps, config)?;
    let Some((_, first)) = aligned.first() else {
        return ScoreMap::new("confidence", 0, 0, Vec::new());
    };
    let (width, height) = (first.width, first.height);

    let mut combined = vec![0.0; width * height];
    for (method, map) in &aligned {
        let normalized = normalize(map, method.normalization);
        for (acc, value) in combined.iter_mut().zip(normalized) {
            *acc += value * method.weight;
        }
    }
    ScoreMap::new("confidence", width, height, combined)
}

fn normalize(map: &ScoreMap, normalization: Normalization) -> Vec<f64> {
    let range = map.min_max();
    map.data
        .iter()
        .map(|&v| {
            if !v.is_finite() {
                return 0.0;
            }
            match normalization {
                Normalization::MinMax => match range {
                    Some((lo, hi)) => (v - lo) / (hi - lo + RANGE_EPSILON),
                    None => 0.0,
                },
                Normalization::Clip => v.clamp(0.0, 1.0),
                Normalization::Signed => ((v + 1.0) / 2.0).clamp(0.0, 1.0),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MethodConfig, ThresholdPolicy};

    #[test]
    fn blends_normalised_methods() {
        let config = ExtractionConfig {
            quorum: 1,
            min_region_pixels: 1,
            methods: vec![
                MethodConfig::new("rx", ThresholdPolicy::Fixed(0.0), 0.5),
                MethodConfig::new("ndwi", ThresholdPolicy::Fixed(0.0), 0.25)
                    .with_normalization(Normalization::Signed),
                MethodConfig::new("ace", ThresholdPolicy::Fixed(0.0), 0.25)
                    .with_normalization(Normalization::Clip),
            ],
        };
        let maps = vec![
            ScoreMap::new("rx", 2, 1, vec![10.0, 20.0]).unwrap(),
            ScoreMap::new("ndwi", 2, 1, vec![-1.0, 1.0]).unwrap(),
            ScoreMap::new("ace", 2, 1, vec![-0.5, 1.5]).unwrap(),
        ];
        let map = confidence_map(&maps, &config).unwrap();
        assert_eq!((map.width, map.height), (2, 1));
        assert!(map.data[0].abs() < 1e-9);
        assert!((map.data[1] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn no_maps_gives_empty_confidence() {
        let map = confidence_map(&[], &ExtractionConfig::default()).unwrap();
        assert!(map.is_empty());
    }
}
