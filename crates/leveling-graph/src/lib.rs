//! Leveling observation graph
//!
//! Points are nodes, accepted observations are directed, weighted edges.
//!
//! Key concepts:
//! - Connectivity: every component of the network needs a datum
//! - Spanning forest: depth-first tree used for loops and tree paths
//! - Fundamental loops: one loop per non-tree edge, |E| - |V| + |C| in total
//! - Analysis: loop misclosures, double runs and achieved tolerance class

pub mod graph;
pub mod analysis;

pub use graph::*;
pub use analysis::*;
