//! Error types for leveling adjustment

use std::fmt;

use thiserror::Error;

use crate::PointId;

/// Structural defect of an observation network
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NetworkDefect {
    /// No included observation
    Empty,
    /// More than one connected component
    Disconnected,
    /// No fixed point inside the network
    MissingDatum,
    /// Every point is fixed
    NoUnknownPoints,
}

impl fmt::Display for NetworkDefect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            NetworkDefect::Empty => "no included observations",
            NetworkDefect::Disconnected => "disconnected components",
            NetworkDefect::MissingDatum => "no fixed point (datum defect)",
            NetworkDefect::NoUnknownPoints => "all points are fixed",
        };
        f.write_str(text)
    }
}

/// Adjustment errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AdjustError {
    // Network errors
    #[error("Invalid network: {defect} ({} component(s))", .partition.len())]
    InvalidNetwork {
        defect: NetworkDefect,
        partition: Vec<Vec<PointId>>,
    },

    #[error("Insufficient observations: {observations} observations for {unknowns} unknowns")]
    InsufficientObservations { observations: usize, unknowns: usize },

    #[error("Invalid weight: observation {index} ({from} -> {to}) has distance {distance} m")]
    WeightMatrix {
        index: usize,
        from: PointId,
        to: PointId,
        distance: f64,
    },

    // Numerical errors
    #[error("Singular matrix: size {size}, rank {rank}, determinant {determinant:.3e}")]
    SingularMatrix {
        determinant: f64,
        rank: usize,
        size: usize,
    },

    // Line errors
    #[error("Line has no included setups")]
    EmptyLine,

    #[error("No fixed height for benchmark {0}")]
    MissingBenchmark(PointId),

    #[error("No run connects the two benchmarks")]
    NoMatchingRuns,

    #[error("Segments do not connect at {at}")]
    DisconnectedChain { at: PointId },

    // Configuration errors
    #[error("Unknown tolerance class: {0}")]
    UnknownToleranceClass(String),
}

impl AdjustError {
    /// Components carried by an `InvalidNetwork` error
    pub fn partition(&self) -> Option<&[Vec<PointId>]> {
        match self {
            AdjustError::InvalidNetwork { partition, .. } => Some(partition),
            _ => None,
        }
    }
}

/// Result type for adjustment operations
pub type AdjustResult<T> = Result<T, AdjustError>;
