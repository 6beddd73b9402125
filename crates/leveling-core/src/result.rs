//! Adjustment results
//!
//! Read-only value objects handed back to callers. A result owns all of its
//! data; nothing in it borrows from the input observations.

use std::collections::BTreeMap;
use std::fmt;

use crate::{Diagnostic, Observation, PointId};

/// Least-squares model that produced a result
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AdjustmentMethod {
    /// Observation equations, heights as parameters (Ax + L)
    Parametric,
    /// Condition equations over loops, correlates (Bv + w)
    Conditional,
}

impl AdjustmentMethod {
    pub fn name(self) -> &'static str {
        match self {
            AdjustmentMethod::Parametric => "parametric",
            AdjustmentMethod::Conditional => "conditional",
        }
    }
}

impl fmt::Display for AdjustmentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Numerical health of a matrix
#[derive(Clone, Debug, PartialEq)]
pub struct StabilityReport {
    pub rows: usize,
    pub cols: usize,
    /// Only computed for square matrices
    pub determinant: Option<f64>,
    pub rank: usize,
    /// Largest over smallest singular value; infinite when rank deficient
    pub condition_number: f64,
    pub singular: bool,
    pub ill_conditioned: bool,
}

impl StabilityReport {
    pub fn is_square(&self) -> bool {
        self.rows == self.cols
    }
}

/// Residual of one observation
#[derive(Clone, Debug, PartialEq)]
pub struct Residual {
    /// Index of the observation in the input slice
    pub index: usize,
    pub from: PointId,
    pub to: PointId,
    /// Adjusted minus observed height difference, mm
    pub residual_mm: f64,
    /// Observed height difference plus residual, m
    pub adjusted_height_diff: f64,
}

/// Outcome of a network adjustment
#[derive(Clone, Debug, PartialEq)]
pub struct AdjustmentResult {
    pub method: AdjustmentMethod,
    pub iterations: usize,
    /// Standard error of unit weight
    pub sigma0: f64,
    /// Adjusted heights of the unknown points, m
    pub heights: BTreeMap<PointId, f64>,
    /// One entry per included observation, in input order
    pub residuals: Vec<Residual>,
    /// Standard error of each adjusted height, mm
    pub standard_errors_mm: BTreeMap<PointId, f64>,
    /// Classification coefficient K, mm/√km
    pub k_coefficient: f64,
    pub total_distance_km: f64,
    /// Redundancy of the model
    pub degrees_of_freedom: usize,
    pub converged: bool,
    pub stability: Option<StabilityReport>,
    pub diagnostics: Vec<Diagnostic>,
}

impl AdjustmentResult {
    pub fn height(&self, id: &str) -> Option<f64> {
        self.heights.get(id).copied()
    }

    pub fn standard_error_mm(&self, id: &str) -> Option<f64> {
        self.standard_errors_mm.get(id).copied()
    }

    /// Residual of the observation at `index` of the input slice
    pub fn residual_of(&self, index: usize) -> Option<&Residual> {
        self.residuals.iter().find(|r| r.index == index)
    }

    /// Largest absolute residual, mm
    pub fn max_abs_residual_mm(&self) -> f64 {
        self.residuals
            .iter()
            .map(|r| r.residual_mm.abs())
            .fold(0.0, f64::max)
    }

    /// Σ|v| in mm
    pub fn total_abs_residual_mm(&self) -> f64 {
        self.residuals.iter().map(|r| r.residual_mm.abs()).sum()
    }

    /// Copies of `observations` carrying the adjusted height differences.
    ///
    /// Observations without a residual (excluded ones) are copied unchanged.
    pub fn adjusted_observations(&self, observations: &[Observation]) -> Vec<Observation> {
        observations
            .iter()
            .enumerate()
            .map(|(i, obs)| {
                let mut adjusted = obs.clone();
                if let Some(r) = self.residual_of(i) {
                    adjusted.height_diff = r.adjusted_height_diff;
                }
                adjusted
            })
            .collect()
    }

    pub fn is_ill_conditioned(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| matches!(d, Diagnostic::IllConditioned { .. }))
    }
}

/// Σ|v_mm| / √(total distance km); zero for a network without length
pub fn k_coefficient(residuals_mm: impl IntoIterator<Item = f64>, total_distance_km: f64) -> f64 {
    if total_distance_km <= 0.0 {
        return 0.0;
    }
    let sum: f64 = residuals_mm.into_iter().map(f64::abs).sum();
    sum / total_distance_km.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_k_coefficient() {
        let k = k_coefficient([3.0, -1.0], 4.0);
        assert!((k - 2.0).abs() < 1e-12);
        assert_eq!(k_coefficient([3.0], 0.0), 0.0);
    }

    #[test]
    fn test_result_accessors() {
        let result = AdjustmentResult {
            method: AdjustmentMethod::Parametric,
            iterations: 2,
            sigma0: 0.0,
            heights: [(PointId::from("B"), 110.5)].into_iter().collect(),
            residuals: vec![Residual {
                index: 3,
                from: "A".into(),
                to: "B".into(),
                residual_mm: -1.5,
                adjusted_height_diff: 10.4985,
            }],
            standard_errors_mm: BTreeMap::new(),
            k_coefficient: 0.0,
            total_distance_km: 1.0,
            degrees_of_freedom: 0,
            converged: true,
            stability: None,
            diagnostics: vec![],
        };

        assert_eq!(result.height("B"), Some(110.5));
        assert_eq!(result.residual_of(3).map(|r| r.residual_mm), Some(-1.5));
        assert!((result.max_abs_residual_mm() - 1.5).abs() < 1e-12);
        assert!(!result.is_ill_conditioned());
        assert_eq!(result.method.to_string(), "parametric");

        let input: Vec<Observation> = (0..4)
            .map(|i| Observation::new("A", "B", 10.5, 100.0 * (i + 1) as f64))
            .collect();
        let adjusted = result.adjusted_observations(&input);
        assert_eq!(adjusted.len(), 4);
        assert_eq!(adjusted[3].height_diff, 10.4985);
        assert_eq!(adjusted[3].distance, 400.0);
        assert_eq!(adjusted[0], input[0]);
    }
}
