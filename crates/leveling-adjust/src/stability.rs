//! Matrix stability analysis
//!
//! Determinant, SVD rank and condition number of a matrix, flagged against
//! configurable thresholds. Used on the normal matrices of both adjustment
//! models before they are solved.

use leveling_core::StabilityReport;
use nalgebra::DMatrix;

/// Thresholds for flagging a matrix
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StabilityThresholds {
    /// |det| below this is singular.
    ///
    /// The determinant of a normal matrix shrinks with every long, lightly
    /// weighted line, so a large network of long runs can fall below the
    /// default while still having full rank. Lower this (or set it to zero
    /// and rely on the rank) for such networks.
    pub singular_determinant: f64,
    /// Condition number above this is ill-conditioned
    pub ill_condition: f64,
}

impl Default for StabilityThresholds {
    fn default() -> Self {
        StabilityThresholds {
            singular_determinant: 1e-15,
            ill_condition: 1e10,
        }
    }
}

/// Numerical health checks on dense matrices
#[derive(Clone, Copy, Debug, Default)]
pub struct StabilityAnalyzer {
    thresholds: StabilityThresholds,
}

impl StabilityAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_thresholds(thresholds: StabilityThresholds) -> Self {
        StabilityAnalyzer { thresholds }
    }

    pub fn thresholds(&self) -> &StabilityThresholds {
        &self.thresholds
    }

    /// Analyze a matrix.
    ///
    /// The determinant is only computed for square input. Rank uses the SVD
    /// with tolerance `σ_max · max(m, n) · ε`. A full-rank matrix whose
    /// determinant is below [`StabilityThresholds::singular_determinant`] is
    /// still reported singular.
    pub fn analyze(&self, matrix: &DMatrix<f64>) -> StabilityReport {
        let (rows, cols) = matrix.shape();
        let size = rows.min(cols);

        if size == 0 {
            return StabilityReport {
                rows,
                cols,
                determinant: (rows == cols).then_some(1.0),
                rank: 0,
                condition_number: 1.0,
                singular: false,
                ill_conditioned: false,
            };
        }

        let determinant = (rows == cols).then(|| matrix.determinant());

        let singular_values = matrix.clone().svd(false, false).singular_values;
        let sigma_max = singular_values.iter().copied().fold(0.0, f64::max);
        let sigma_min = singular_values.iter().copied().fold(f64::INFINITY, f64::min);

        let tolerance = sigma_max * rows.max(cols) as f64 * f64::EPSILON;
        let rank = singular_values.iter().filter(|&&s| s > tolerance).count();

        let condition_number = if sigma_min > 0.0 {
            sigma_max / sigma_min
        } else {
            f64::INFINITY
        };

        let singular = rank < size
            || determinant.map_or(false, |d| d.abs() < self.thresholds.singular_determinant);
        let ill_conditioned = condition_number > self.thresholds.ill_condition;

        tracing::debug!(
            rows,
            cols,
            rank,
            condition_number,
            singular,
            "matrix stability analyzed"
        );

        StabilityReport {
            rows,
            cols,
            determinant,
            rank,
            condition_number,
            singular,
            ill_conditioned,
        }
    }
}
