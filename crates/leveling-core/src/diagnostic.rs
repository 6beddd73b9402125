//! Diagnostics
//!
//! Non-fatal findings of an adjustment. They travel in-band on the result so
//! a batch caller can keep processing other networks; presentation is left to
//! the caller.

use std::fmt;

use crate::PointId;

/// Advisory produced while analyzing or adjusting a network
#[derive(Clone, Debug, PartialEq)]
pub enum Diagnostic {
    /// Normal matrix condition number above threshold
    IllConditioned { condition_number: f64, threshold: f64 },
    /// Iteration budget exhausted before corrections dropped below tolerance
    NotConverged {
        iterations: usize,
        max_correction_m: f64,
        tolerance_m: f64,
    },
    /// Observation graph splits into several components
    DisconnectedComponents { partition: Vec<Vec<PointId>> },
    /// Misclosure larger than the active class allows
    ToleranceExceeded {
        class: String,
        misclosure_mm: f64,
        tolerance_mm: f64,
    },
}

impl Diagnostic {
    /// Short machine-friendly tag
    pub fn kind(&self) -> &'static str {
        match self {
            Diagnostic::IllConditioned { .. } => "ill_conditioned",
            Diagnostic::NotConverged { .. } => "not_converged",
            Diagnostic::DisconnectedComponents { .. } => "disconnected_components",
            Diagnostic::ToleranceExceeded { .. } => "tolerance_exceeded",
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::IllConditioned {
                condition_number,
                threshold,
            } => write!(
                f,
                "normal matrix ill-conditioned: condition {:.3e} > {:.1e}",
                condition_number, threshold
            ),
            Diagnostic::NotConverged {
                iterations,
                max_correction_m,
                tolerance_m,
            } => write!(
                f,
                "no convergence after {} iterations: max correction {:.3e} m > {:.1e} m",
                iterations, max_correction_m, tolerance_m
            ),
            Diagnostic::DisconnectedComponents { partition } => {
                write!(f, "network has {} disconnected components", partition.len())
            }
            Diagnostic::ToleranceExceeded {
                class,
                misclosure_mm,
                tolerance_mm,
            } => write!(
                f,
                "misclosure {:.2} mm exceeds {} tolerance {:.2} mm",
                misclosure_mm, class, tolerance_mm
            ),
        }
    }
}
