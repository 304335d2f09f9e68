//! Spectral angle mapping against a library of labelled reference spectra.

use serde::{Deserialize, Serialize};

use crate::core::model::CandidateRegion;

const NORM_EPSILON: f64 = 1e-10;

/// Angle in radians between two spectra over their common prefix.
pub fn spectral_angle(a: &[f64], b: &[f64]) -> f64 {
    let len = a.len().min(b.len());
    let (a, b) = (&a[..len], &b[..len]);
    let dot: f64 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f64>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f64>().sqrt();
    let cos = dot / (norm_a * norm_b + NORM_EPSILON);
    cos.clamp(-1.0, 1.0).acos()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReferenceSpectrum {
    pub label: String,
    pub defect_type: String,
    pub spectrum: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SignatureMatch<'a> {
    pub label: &'a str,
    pub defect_type: &'a str,
    pub angle: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ReferenceLibrary {
    references: Vec<ReferenceSpectrum>,
}

impl ReferenceLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_reference(
        mut self,
        label: impl Into<String>,
        defect_type: impl Into<String>,
        spectrum: Vec<f64>,
    ) -> Self {
        self.references.push(ReferenceSpectrum {
            label: label.into(),
            defect_type: defect_type.into(),
            spectrum,
        });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.references.is_empty()
    }

    /// Closest reference by spectral angle; ties keep the earlier entry.
    pub fn classify(&self, spectrum: &[f64]) -> Option<SignatureMatch<'_>> {
        let mut best: Option<SignatureMatch<'_>> = None;
        for reference in &self.references {
            let angle = spectral_angle(spectrum, &reference.spectrum);
            if !angle.is_finite() {
                continue;
            }
            if best.as_ref().map_or(true, |b| angle < b.angle) {
                best = Some(SignatureMatch {
                    label: &reference.label,
                    defect_type: &reference.defect_type,
                    angle,
                });
            }
        }
        best
    }

    /// Tags a candidate with the defect type of its closest reference.
    pub fn tag(&self, candidate: CandidateRegion, mean_spectrum: &[f64]) -> CandidateRegion {
        match self.classify(mean_spectrum) {
            Some(found) => {
                let defect_type = found.defect_type.to_string();
                candidate.with_defect_type(defect_type)
            }
            None => candidate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::geometry::BBox;
    use std::collections::BTreeMap;

    fn library() -> ReferenceLibrary {
        ReferenceLibrary::new()
            .with_reference("water_leak", "leak", vec![1.0, 1.0, 0.3, 0.1])
            .with_reference("corroded_pipe", "corrosion", vec![0.7, 0.5, 1.0, 1.0])
    }

    #[test]
    fn identical_spectra_have_zero_angle() {
        let s = [0.2, 0.4, 0.6];
        assert!(spectral_angle(&s, &s).abs() < 1e-3);
    }

    #[test]
    fn orthogonal_spectra_are_a_right_angle() {
        let angle = spectral_angle(&[1.0, 0.0], &[0.0, 1.0]);
        assert!((angle - std::f64::consts::FRAC_PI_2).abs() < 1e-9);
    }

    #[test]
    fn classifies_to_nearest_reference() {
        let lib = library();
        let found = lib.classify(&[2.0, 2.0, 0.7, 0.2]).unwrap();
        assert_eq!(found.label, "water_leak");
        assert_eq!(found.defect_type, "leak");
    }

    #[test]
    fn empty_library_leaves_candidate_untagged() {
        let candidate = CandidateRegion {
            id: "candidate_1".to_string(),
            centroid: (1.0, 1.0),
            bbox: BBox::new(0.0, 0.0, 2.0, 2.0),
            area_pixels: 4,
            scores: BTreeMap::new(),
            votes: 2,
            confidence: 0.5,
            defect_type: None,
        };
        let tagged = ReferenceLibrary::new().tag(candidate.clone(), &[1.0]);
        assert_eq!(tagged, candidate);
        let tagged = library().tag(candidate, &[0.7, 0.5, 1.0, 1.0]);
        assert_eq!(tagged.defect_type.as_deref(), Some("corrosion"));
    }
}
