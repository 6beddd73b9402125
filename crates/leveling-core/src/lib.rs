//! Leveling Core - Fundamental types for height network adjustment
//!
//! This crate defines the value types shared by the graph and adjustment crates:
//! - Point identifiers and roles (fixed benchmarks, unknown points)
//! - Observations (height differences between two points)
//! - Leveling lines built from instrument setups
//! - Tolerance classes (k·√L in mm)
//! - Adjustment results, stability reports and diagnostics
//! - The error taxonomy

pub mod id;
pub mod observation;
pub mod line;
pub mod class;
pub mod diagnostic;
pub mod result;
pub mod error;

pub use id::*;
pub use observation::*;
pub use line::*;
pub use class::*;
pub use diagnostic::*;
pub use result::*;
pub use error::*;

/// Millimeters per meter
pub const MM_PER_M: f64 = 1000.0;

/// Meters per kilometer
pub const M_PER_KM: f64 = 1000.0;
