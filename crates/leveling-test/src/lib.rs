//! Leveling Test Harness - synthetic networks and end-to-end validation
//!
//! This crate provides:
//! - Seeded network simulation (line, ring and grid layouts)
//! - Measurement noise scaled with √distance
//! - Integration harness running both adjustment models

pub mod simulator;
pub mod integration;

pub use simulator::*;
pub use integration::*;
