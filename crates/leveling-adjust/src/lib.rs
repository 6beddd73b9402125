//! Leveling Adjust - Least-squares adjustment of height networks
//!
//! This crate implements:
//! - Parametric adjustment: heights as parameters, iterated to convergence
//! - Conditional adjustment: residuals from loop and benchmark conditions
//! - Single-line and multi-run misclosure distribution
//! - Matrix stability analysis of the normal equations
//!
//! Both network models implement [`NetworkAdjuster`] and return the same
//! [`AdjustmentResult`](leveling_core::AdjustmentResult).

pub mod stability;
pub mod adjuster;
pub mod parametric;
pub mod conditional;
pub mod line;

pub use stability::*;
pub use adjuster::*;
pub use parametric::*;
pub use conditional::*;
pub use line::*;
