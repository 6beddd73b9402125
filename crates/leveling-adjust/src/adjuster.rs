//! Adjustment model seam
//!
//! Both least-squares models take the same inputs and hand back the same
//! result type, so callers choose a model at run time through
//! [`NetworkAdjuster`].

use leveling_core::{
    AdjustError, AdjustResult, AdjustmentMethod, AdjustmentResult, FixedPoints, NetworkDefect,
    Observation, PointId, Residual, StabilityReport, MM_PER_M,
};
use leveling_graph::ObservationGraph;

use crate::{ConditionalAdjuster, ParametricAdjuster};

/// A least-squares adjustment model for height networks
pub trait NetworkAdjuster {
    /// Model implemented by this adjuster
    fn method(&self) -> AdjustmentMethod;

    /// Adjust the included observations against the fixed heights
    fn adjust(
        &self,
        observations: &[Observation],
        fixed: &FixedPoints,
    ) -> AdjustResult<AdjustmentResult>;
}

/// Adjuster for `method` with default configuration
pub fn adjuster_for(method: AdjustmentMethod) -> Box<dyn NetworkAdjuster> {
    match method {
        AdjustmentMethod::Parametric => Box::new(ParametricAdjuster::default()),
        AdjustmentMethod::Conditional => Box::new(ConditionalAdjuster::default()),
    }
}

/// Adjust a network with the default configuration of `method`
pub fn adjust_heights(
    observations: &[Observation],
    fixed: &FixedPoints,
    method: AdjustmentMethod,
) -> AdjustResult<AdjustmentResult> {
    adjuster_for(method).adjust(observations, fixed)
}

/// Points of the graph without a fixed height, in id order
pub(crate) fn unknown_points(
    graph: &ObservationGraph,
    fixed: &FixedPoints,
) -> AdjustResult<Vec<PointId>> {
    let unknowns: Vec<PointId> = graph
        .points()
        .iter()
        .filter(|p| !fixed.contains(p.as_str()))
        .cloned()
        .collect();

    if unknowns.is_empty() {
        return Err(AdjustError::InvalidNetwork {
            defect: NetworkDefect::NoUnknownPoints,
            partition: graph.components(),
        });
    }
    Ok(unknowns)
}

/// Residual records in graph edge order, which is input order
pub(crate) fn residual_records(
    graph: &ObservationGraph,
    observations: &[Observation],
    residuals_m: &[f64],
) -> Vec<Residual> {
    graph
        .edges()
        .iter()
        .zip(residuals_m)
        .map(|(edge, &v)| {
            let obs = &observations[edge.observation];
            Residual {
                index: edge.observation,
                from: obs.from.clone(),
                to: obs.to.clone(),
                residual_mm: v * MM_PER_M,
                adjusted_height_diff: obs.height_diff + v,
            }
        })
        .collect()
}

/// √(vᵗPv / dof), zero without redundancy
pub(crate) fn unit_weight_error(graph: &ObservationGraph, residuals_m: &[f64], dof: usize) -> f64 {
    if dof == 0 {
        return 0.0;
    }
    let vtpv: f64 = graph
        .edges()
        .iter()
        .zip(residuals_m)
        .map(|(edge, &v)| edge.weight() * v * v)
        .sum();
    (vtpv / dof as f64).sqrt()
}

pub(crate) fn singular_error(report: &StabilityReport) -> AdjustError {
    AdjustError::SingularMatrix {
        determinant: report.determinant.unwrap_or(0.0),
        rank: report.rank,
        size: report.rows.min(report.cols),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_dispatch_by_method() {
        for method in [AdjustmentMethod::Parametric, AdjustmentMethod::Conditional] {
            assert_eq!(adjuster_for(method).method(), method);
        }
    }

    #[test]
    fn test_all_fixed_rejected() {
        let obs = vec![Observation::new("A", "B", 1.0, 100.0)];
        let fixed = FixedPoints::new().with("A", 10.0).with("B", 11.0);

        for method in [AdjustmentMethod::Parametric, AdjustmentMethod::Conditional] {
            match adjust_heights(&obs, &fixed, method) {
                Err(AdjustError::InvalidNetwork { defect, .. }) => {
                    assert_eq!(defect, NetworkDefect::NoUnknownPoints)
                }
                other => panic!("unexpected: {:?}", other),
            }
        }
    }

    #[test]
    fn test_unit_weight_error() {
        let obs = vec![
            Observation::new("A", "B", 1.0, 1000.0),
            Observation::new("B", "A", -1.0, 4000.0),
        ];
        let graph = ObservationGraph::build(&obs).unwrap();
        // vᵗPv = 1·0.002² + 0.25·0.004² = 8e-6
        let s0 = unit_weight_error(&graph, &[0.002, 0.004], 2);
        assert!((s0 - 2e-3).abs() < 1e-12);
        assert_eq!(unit_weight_error(&graph, &[0.002, 0.004], 0), 0.0);
    }

    fn noisy_network() -> impl Strategy<Value = Vec<Observation>> {
        (3usize..8).prop_flat_map(|n| {
            let truth = prop::collection::vec(-20.0f64..20.0, n);
            let chain = prop::collection::vec((0usize..n, 100.0f64..1000.0, -0.005f64..0.005), n - 1);
            let extra = prop::collection::vec((0..n, 0..n, 100.0f64..1000.0, -0.005f64..0.005), 1..8);
            (truth, chain, extra).prop_map(|(truth, chain, extra)| {
                let name = |i: usize| format!("P{}", i);
                let mut obs = Vec::new();
                // Point i hangs off an earlier point, so the network is connected
                for (i, &(parent, d, noise)) in chain.iter().enumerate() {
                    let to = i + 1;
                    let from = parent % to;
                    obs.push(Observation::new(name(from), name(to), truth[to] - truth[from] + noise, d));
                }
                for &(a, b, d, noise) in &extra {
                    obs.push(Observation::new(name(a), name(b), truth[b] - truth[a] + noise, d));
                }
                obs
            })
        })
    }

    proptest! {
        #[test]
        fn prop_models_agree(obs in noisy_network()) {
            let fixed = FixedPoints::new().with("P0", 50.0);
            let p = adjust_heights(&obs, &fixed, AdjustmentMethod::Parametric).unwrap();
            let c = adjust_heights(&obs, &fixed, AdjustmentMethod::Conditional).unwrap();

            prop_assert!(p.converged);
            prop_assert_eq!(p.degrees_of_freedom, c.degrees_of_freedom);
            for (id, h) in &p.heights {
                prop_assert!((c.heights[id] - h).abs() < 1e-7);
            }
            prop_assert!((p.sigma0 - c.sigma0).abs() < 1e-7);
        }

        #[test]
        fn prop_adjusted_loops_close(obs in noisy_network()) {
            let fixed = FixedPoints::new().with("P0", 50.0);
            let result = adjust_heights(&obs, &fixed, AdjustmentMethod::Parametric).unwrap();
            let graph = ObservationGraph::build(&obs).unwrap();

            for cycle in graph.find_loops() {
                let closure: f64 = cycle
                    .steps
                    .iter()
                    .map(|s| s.sign() * result.residual_of(s.observation).unwrap().adjusted_height_diff)
                    .sum();
                prop_assert!(closure.abs() < 1e-9);
            }
        }
    }
}
