//! Conditional (condition equation) adjustment
//!
//! Residuals are found directly from the conditions the observations must
//! satisfy: every loop closes to zero, and every tree path between two
//! benchmarks reproduces their known height difference. Heights follow from
//! the adjusted height differences.

use std::collections::{BTreeMap, HashMap};

use leveling_core::{
    k_coefficient, AdjustResult, AdjustmentMethod, AdjustmentResult, Diagnostic, FixedPoints,
    Observation, PointId,
};
use leveling_graph::{Loop, LoopStep, ObservationGraph};
use nalgebra::{DMatrix, DVector};

use crate::adjuster::{residual_records, singular_error, unit_weight_error, unknown_points};
use crate::{NetworkAdjuster, StabilityAnalyzer, StabilityThresholds};

/// Conditional adjustment configuration
#[derive(Clone, Debug)]
pub struct ConditionalConfig {
    /// Attach a stability report and flag ill-conditioning
    pub check_stability: bool,
    pub thresholds: StabilityThresholds,
}

impl Default for ConditionalConfig {
    fn default() -> Self {
        ConditionalConfig {
            check_stability: true,
            thresholds: StabilityThresholds::default(),
        }
    }
}

/// One row of the condition matrix
#[derive(Debug, Clone)]
struct Condition {
    /// (edge position, sign)
    terms: Vec<(usize, f64)>,
    /// Σ sign·dH minus the expected value, m
    misclosure: f64,
}

/// Least-squares adjuster using condition equations (Bv + w = 0)
#[derive(Clone, Debug, Default)]
pub struct ConditionalAdjuster {
    config: ConditionalConfig,
}

impl ConditionalAdjuster {
    pub fn new(config: ConditionalConfig) -> Self {
        ConditionalAdjuster { config }
    }

    pub fn config(&self) -> &ConditionalConfig {
        &self.config
    }

    /// Adjust using caller-supplied loops.
    ///
    /// Loop steps are matched to observations by input index; steps naming
    /// an observation that is not included are dropped.
    pub fn adjust_with_loops(
        &self,
        observations: &[Observation],
        loops: &[Loop],
        fixed: &FixedPoints,
    ) -> AdjustResult<AdjustmentResult> {
        let graph = ObservationGraph::build(observations)?;
        self.run(&graph, observations, loops, fixed)
    }

    fn run(
        &self,
        graph: &ObservationGraph,
        observations: &[Observation],
        loops: &[Loop],
        fixed: &FixedPoints,
    ) -> AdjustResult<AdjustmentResult> {
        graph.check_datum(fixed)?;
        let unknowns = unknown_points(graph, fixed)?;

        let mut conditions = self.loop_conditions(graph, loops);
        conditions.extend(benchmark_conditions(graph, fixed));

        let n = graph.edge_count();
        let r = conditions.len();
        let distances: Vec<f64> = graph.edges().iter().map(|e| e.distance_km).collect();

        let mut diagnostics = Vec::new();
        let mut stability = None;
        let residuals_m = if r == 0 {
            vec![0.0; n]
        } else {
            let mut b = DMatrix::<f64>::zeros(r, n);
            for (row, condition) in conditions.iter().enumerate() {
                for &(edge, sign) in &condition.terms {
                    b[(row, edge)] += sign;
                }
            }
            let w = DVector::from_iterator(r, conditions.iter().map(|c| c.misclosure));

            // N = B·P⁻¹·Bᵗ with P⁻¹ = diag(distance km)
            let bq = DMatrix::from_fn(r, n, |i, j| b[(i, j)] * distances[j]);
            let normal = &bq * b.transpose();

            let analyzer = StabilityAnalyzer::with_thresholds(self.config.thresholds);
            let report = analyzer.analyze(&normal);
            if report.singular {
                tracing::warn!(rank = report.rank, size = r, "condition matrix is singular");
                return Err(singular_error(&report));
            }
            let cholesky = normal.cholesky().ok_or_else(|| singular_error(&report))?;

            if self.config.check_stability {
                if report.ill_conditioned {
                    tracing::warn!(
                        condition_number = report.condition_number,
                        "condition normal matrix is ill-conditioned"
                    );
                    diagnostics.push(Diagnostic::IllConditioned {
                        condition_number: report.condition_number,
                        threshold: self.config.thresholds.ill_condition,
                    });
                }
                stability = Some(report);
            }

            // N·k = w, v = -P⁻¹·Bᵗ·k
            let k = cholesky.solve(&w);
            let v = -(bq.transpose() * k);
            v.iter().copied().collect()
        };

        let adjusted: Vec<f64> = graph
            .edges()
            .iter()
            .zip(&residuals_m)
            .map(|(e, v)| e.height_diff + v)
            .collect();
        let propagated = graph.propagate_heights(fixed, |e| adjusted[e]);
        let heights: BTreeMap<PointId, f64> = unknowns
            .iter()
            .filter_map(|p| propagated.get(p.as_str()).map(|&h| (p.clone(), h)))
            .collect();

        let sigma0 = unit_weight_error(graph, &residuals_m, r);
        let residuals = residual_records(graph, observations, &residuals_m);
        let total_distance_km: f64 = distances.iter().sum();
        let k = k_coefficient(residuals.iter().map(|res| res.residual_mm), total_distance_km);

        tracing::info!(
            observations = n,
            conditions = r,
            sigma0,
            "conditional adjustment completed"
        );

        Ok(AdjustmentResult {
            method: AdjustmentMethod::Conditional,
            iterations: 1,
            sigma0,
            heights,
            residuals,
            standard_errors_mm: BTreeMap::new(),
            k_coefficient: k,
            total_distance_km,
            degrees_of_freedom: r,
            converged: true,
            stability,
            diagnostics,
        })
    }

    fn loop_conditions(&self, graph: &ObservationGraph, loops: &[Loop]) -> Vec<Condition> {
        let edge_of: HashMap<usize, usize> = graph
            .edges()
            .iter()
            .enumerate()
            .map(|(pos, e)| (e.observation, pos))
            .collect();

        loops
            .iter()
            .filter_map(|cycle| {
                let steps: Vec<LoopStep> = cycle
                    .steps
                    .iter()
                    .filter_map(|s| {
                        let edge = edge_of.get(&s.observation).copied();
                        if edge.is_none() {
                            tracing::warn!(observation = s.observation, "loop step not in network");
                        }
                        edge.map(|edge| LoopStep { edge, ..*s })
                    })
                    .collect();
                (!steps.is_empty()).then(|| Condition {
                    terms: steps.iter().map(|s| (s.edge, s.sign())).collect(),
                    misclosure: graph.signed_height_diff(&steps),
                })
            })
            .collect()
    }
}

/// Tree path from the first benchmark to each other one must reproduce the
/// known height difference
fn benchmark_conditions(graph: &ObservationGraph, fixed: &FixedPoints) -> Vec<Condition> {
    let benchmarks = graph.fixed_in_graph(fixed);
    let Some(&(origin, origin_height)) = benchmarks.first() else {
        return Vec::new();
    };

    benchmarks[1..]
        .iter()
        .filter_map(|&(id, height)| {
            let path = graph.tree_path(origin.as_str(), id.as_str())?;
            Some(Condition {
                terms: path.iter().map(|s| (s.edge, s.sign())).collect(),
                misclosure: graph.signed_height_diff(&path) - (height - origin_height),
            })
        })
        .collect()
}

impl NetworkAdjuster for ConditionalAdjuster {
    fn method(&self) -> AdjustmentMethod {
        AdjustmentMethod::Conditional
    }

    fn adjust(
        &self,
        observations: &[Observation],
        fixed: &FixedPoints,
    ) -> AdjustResult<AdjustmentResult> {
        let graph = ObservationGraph::build(observations)?;
        let loops = graph.find_loops();
        self.run(&graph, observations, &loops, fixed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ParametricAdjuster;
    use leveling_core::{AdjustError, NetworkDefect};

    fn triangle(c_to_a: f64) -> Vec<Observation> {
        vec![
            Observation::new("A", "B", 10.500, 1500.0),
            Observation::new("B", "C", -5.200, 2000.0),
            Observation::new("C", "A", c_to_a, 1000.0),
        ]
    }

    fn datum() -> FixedPoints {
        FixedPoints::new().with("A", 100.0)
    }

    fn assert_agree(a: &AdjustmentResult, b: &AdjustmentResult) {
        assert_eq!(a.heights.len(), b.heights.len());
        for (id, h) in &a.heights {
            assert!((b.heights[id] - h).abs() < 1e-8, "{}: {} vs {}", id, h, b.heights[id]);
        }
        for (ra, rb) in a.residuals.iter().zip(&b.residuals) {
            assert_eq!(ra.index, rb.index);
            assert!((ra.residual_mm - rb.residual_mm).abs() < 1e-6);
        }
        assert!((a.sigma0 - b.sigma0).abs() < 1e-9);
        assert_eq!(a.degrees_of_freedom, b.degrees_of_freedom);
    }

    #[test]
    fn test_closed_loop() {
        let result = ConditionalAdjuster::default()
            .adjust(&triangle(-5.300), &datum())
            .unwrap();
        assert_eq!(result.iterations, 1);
        assert!(result.converged);
        assert!(result.max_abs_residual_mm() < 1e-9);
        assert!((result.height("C").unwrap() - 105.3).abs() < 1e-9);
        assert!(result.standard_errors_mm.is_empty());
    }

    #[test]
    fn test_misclosure_distributed_by_length() {
        let result = ConditionalAdjuster::default()
            .adjust(&triangle(-5.250), &datum())
            .unwrap();

        let expected = [-50.0 / 3.0, -50.0 * 2.0 / 4.5, -50.0 / 4.5];
        for (i, want) in expected.iter().enumerate() {
            assert!((result.residual_of(i).unwrap().residual_mm - want).abs() < 1e-6);
        }
        let closure: f64 = result.residuals.iter().map(|r| r.adjusted_height_diff).sum();
        assert!(closure.abs() < 1e-9);
        assert_eq!(result.stability.as_ref().map(|s| s.rows), Some(1));
    }

    #[test]
    fn test_agrees_with_parametric() {
        let obs = triangle(-5.250);
        let p = ParametricAdjuster::default().adjust(&obs, &datum()).unwrap();
        let c = ConditionalAdjuster::default().adjust(&obs, &datum()).unwrap();
        assert_agree(&p, &c);
    }

    #[test]
    fn test_agrees_with_parametric_between_benchmarks() {
        let obs = vec![
            Observation::new("A", "B", 1.000, 1000.0),
            Observation::new("B", "C", 1.001, 1000.0),
            Observation::new("C", "D", 1.000, 1000.0),
            Observation::new("B", "D", 2.004, 2000.0),
            Observation::new("A", "C", 2.003, 1500.0),
        ];
        let fixed = FixedPoints::new().with("A", 100.0).with("D", 103.004);

        let p = ParametricAdjuster::default().adjust(&obs, &fixed).unwrap();
        let c = ConditionalAdjuster::default().adjust(&obs, &fixed).unwrap();
        assert_eq!(c.degrees_of_freedom, 3);
        assert_agree(&p, &c);
    }

    #[test]
    fn test_traverse_between_benchmarks() {
        // No loops: the only condition ties the two benchmarks
        let obs = vec![
            Observation::new("A", "B", 1.000, 1000.0),
            Observation::new("B", "C", 1.000, 1000.0),
        ];
        let fixed = FixedPoints::new().with("A", 100.0).with("C", 102.010);
        let result = ConditionalAdjuster::default().adjust(&obs, &fixed).unwrap();

        assert_eq!(result.degrees_of_freedom, 1);
        assert!((result.height("B").unwrap() - 101.005).abs() < 1e-9);
    }

    #[test]
    fn test_no_conditions() {
        let obs = vec![Observation::new("A", "B", 1.0, 500.0)];
        let result = ConditionalAdjuster::default().adjust(&obs, &datum()).unwrap();

        assert_eq!(result.sigma0, 0.0);
        assert_eq!(result.degrees_of_freedom, 0);
        assert!(result.stability.is_none());
        assert_eq!(result.height("B"), Some(101.0));
    }

    #[test]
    fn test_dependent_loops_are_singular() {
        let obs = triangle(-5.250);
        let graph = ObservationGraph::build(&obs).unwrap();
        let mut loops = graph.find_loops();
        loops.push(loops[0].clone());

        assert!(matches!(
            ConditionalAdjuster::default().adjust_with_loops(&obs, &loops, &datum()),
            Err(AdjustError::SingularMatrix { rank: 1, size: 2, .. })
        ));
    }

    #[test]
    fn test_supplied_loops() {
        let obs = triangle(-5.250);
        let graph = ObservationGraph::build(&obs).unwrap();
        let loops = graph.find_loops();

        let supplied = ConditionalAdjuster::default()
            .adjust_with_loops(&obs, &loops, &datum())
            .unwrap();
        let computed = ConditionalAdjuster::default().adjust(&obs, &datum()).unwrap();
        assert_eq!(supplied, computed);
    }

    #[test]
    fn test_idempotent() {
        let obs = vec![
            Observation::new("A", "B", 1.002, 800.0),
            Observation::new("B", "C", 1.001, 600.0),
            Observation::new("C", "D", 1.000, 700.0),
            Observation::new("D", "A", -3.004, 900.0),
            Observation::new("A", "C", 2.000, 1000.0),
        ];
        let adjuster = ConditionalAdjuster::default();
        let first = adjuster.adjust(&obs, &datum()).unwrap();
        assert_eq!(first.degrees_of_freedom, 2);

        let second = adjuster
            .adjust(&first.adjusted_observations(&obs), &datum())
            .unwrap();
        for (id, h) in &first.heights {
            assert!((second.heights[id] - h).abs() < 1e-9, "{}", id);
        }
        assert!(second.max_abs_residual_mm() < 1e-6);
        assert!(second.sigma0 < 1e-9);
    }

    #[test]
    fn test_disconnected_rejected() {
        let obs = vec![
            Observation::new("A", "B", 1.0, 500.0),
            Observation::new("C", "D", 1.0, 500.0),
        ];
        let fixed = FixedPoints::new().with("A", 1.0).with("C", 2.0);
        assert!(matches!(
            ConditionalAdjuster::default().adjust(&obs, &fixed),
            Err(AdjustError::InvalidNetwork {
                defect: NetworkDefect::Disconnected,
                ..
            })
        ));
    }
}
