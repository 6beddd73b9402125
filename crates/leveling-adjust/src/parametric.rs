//! Parametric (observation equation) adjustment
//!
//! Heights of the unknown points are the parameters. Each observation gives
//! one equation `H_to - H_from = dH + v`; the weighted normal equations are
//! solved by Cholesky and the approximate heights are refined until the
//! corrections fall below tolerance.

use std::collections::BTreeMap;

use leveling_core::{
    k_coefficient, AdjustError, AdjustResult, AdjustmentMethod, AdjustmentResult, Diagnostic,
    FixedPoints, Observation, PointId, MM_PER_M,
};
use leveling_graph::ObservationGraph;
use nalgebra::{DMatrix, DVector};

use crate::adjuster::{residual_records, singular_error, unit_weight_error, unknown_points};
use crate::{NetworkAdjuster, StabilityAnalyzer, StabilityThresholds};

/// Parametric adjustment configuration
#[derive(Clone, Debug)]
pub struct ParametricConfig {
    /// Iteration budget
    pub max_iterations: usize,
    /// Stop when every height correction is below this, m
    pub tolerance_m: f64,
    /// Attach a stability report and flag ill-conditioning
    pub check_stability: bool,
    /// Reject disconnected networks before assembling matrices
    pub validate_connectivity: bool,
    pub thresholds: StabilityThresholds,
}

impl Default for ParametricConfig {
    fn default() -> Self {
        ParametricConfig {
            max_iterations: 10,
            tolerance_m: 1e-6,
            check_stability: true,
            validate_connectivity: true,
            thresholds: StabilityThresholds::default(),
        }
    }
}

impl ParametricConfig {
    /// Tighter convergence for precise networks
    pub fn strict() -> Self {
        ParametricConfig {
            max_iterations: 25,
            tolerance_m: 1e-9,
            check_stability: true,
            validate_connectivity: true,
            thresholds: StabilityThresholds {
                singular_determinant: 1e-15,
                ill_condition: 1e8,
            },
        }
    }
}

/// Least-squares adjuster using observation equations (Ax + L)
#[derive(Clone, Debug, Default)]
pub struct ParametricAdjuster {
    config: ParametricConfig,
}

impl ParametricAdjuster {
    pub fn new(config: ParametricConfig) -> Self {
        ParametricAdjuster { config }
    }

    pub fn config(&self) -> &ParametricConfig {
        &self.config
    }

    /// Adjust starting from caller-supplied approximate heights.
    ///
    /// Entries for unknown points override the heights propagated from the
    /// fixed points; entries for other points are ignored.
    pub fn adjust_from(
        &self,
        observations: &[Observation],
        fixed: &FixedPoints,
        approximate: &BTreeMap<PointId, f64>,
    ) -> AdjustResult<AdjustmentResult> {
        self.run(observations, fixed, Some(approximate))
    }

    fn run(
        &self,
        observations: &[Observation],
        fixed: &FixedPoints,
        approximate: Option<&BTreeMap<PointId, f64>>,
    ) -> AdjustResult<AdjustmentResult> {
        let graph = ObservationGraph::build(observations)?;
        if self.config.validate_connectivity {
            graph.check_datum(fixed)?;
        } else {
            graph.require_datum(fixed)?;
        }

        let unknowns = unknown_points(&graph, fixed)?;
        let n = graph.edge_count();
        let u = unknowns.len();
        if n < u {
            return Err(AdjustError::InsufficientObservations {
                observations: n,
                unknowns: u,
            });
        }

        // Node -> parameter column, fixed nodes have none
        let column: Vec<Option<usize>> = graph
            .points()
            .iter()
            .map(|p| unknowns.binary_search(p).ok())
            .collect();
        let known: Vec<f64> = graph
            .points()
            .iter()
            .map(|p| fixed.get(p.as_str()).unwrap_or(0.0))
            .collect();
        let height_at =
            |x: &DVector<f64>, node: usize| -> f64 { column[node].map_or(known[node], |c| x[c]) };

        let propagated = graph.propagate_heights(fixed, |e| graph.edges()[e].height_diff);
        let mut x = DVector::from_iterator(
            u,
            unknowns.iter().map(|p| {
                approximate
                    .and_then(|a| a.get(p.as_str()).copied())
                    .or_else(|| propagated.get(p.as_str()).copied())
                    .unwrap_or(0.0)
            }),
        );

        let mut a = DMatrix::<f64>::zeros(n, u);
        for (i, edge) in graph.edges().iter().enumerate() {
            if let Some(c) = column[edge.to] {
                a[(i, c)] += 1.0;
            }
            if let Some(c) = column[edge.from] {
                a[(i, c)] -= 1.0;
            }
        }
        let weights = DVector::from_iterator(n, graph.edges().iter().map(|e| e.weight()));
        let pa = DMatrix::from_fn(n, u, |i, j| weights[i] * a[(i, j)]);
        let normal = a.transpose() * &pa;

        let analyzer = StabilityAnalyzer::with_thresholds(self.config.thresholds);
        let report = analyzer.analyze(&normal);
        if report.singular {
            tracing::warn!(rank = report.rank, size = u, "normal matrix is singular");
            return Err(singular_error(&report));
        }
        let cholesky = normal.cholesky().ok_or_else(|| singular_error(&report))?;

        let mut diagnostics = Vec::new();
        if self.config.check_stability && report.ill_conditioned {
            tracing::warn!(
                condition_number = report.condition_number,
                "normal matrix is ill-conditioned"
            );
            diagnostics.push(Diagnostic::IllConditioned {
                condition_number: report.condition_number,
                threshold: self.config.thresholds.ill_condition,
            });
        }

        let mut iterations = 0;
        let mut converged = false;
        let mut max_correction = f64::INFINITY;
        while iterations < self.config.max_iterations {
            iterations += 1;

            let l = DVector::from_iterator(
                n,
                graph
                    .edges()
                    .iter()
                    .map(|e| e.height_diff - (height_at(&x, e.to) - height_at(&x, e.from))),
            );
            let dx = cholesky.solve(&(pa.transpose() * &l));
            x += &dx;
            max_correction = dx.amax();

            tracing::debug!(iteration = iterations, max_correction_m = max_correction, "parametric iteration");

            if max_correction < self.config.tolerance_m {
                converged = true;
                break;
            }
        }

        if !converged {
            tracing::warn!(
                iterations,
                max_correction_m = max_correction,
                "parametric adjustment did not converge"
            );
            diagnostics.push(Diagnostic::NotConverged {
                iterations,
                max_correction_m: max_correction,
                tolerance_m: self.config.tolerance_m,
            });
        }

        let residuals_m: Vec<f64> = graph
            .edges()
            .iter()
            .map(|e| height_at(&x, e.to) - height_at(&x, e.from) - e.height_diff)
            .collect();

        let degrees_of_freedom = n - u;
        let sigma0 = unit_weight_error(&graph, &residuals_m, degrees_of_freedom);
        let cofactor = cholesky.inverse();

        let heights: BTreeMap<PointId, f64> =
            unknowns.iter().cloned().zip(x.iter().copied()).collect();
        let standard_errors_mm: BTreeMap<PointId, f64> = unknowns
            .iter()
            .enumerate()
            .map(|(c, p)| (p.clone(), sigma0 * cofactor[(c, c)].sqrt() * MM_PER_M))
            .collect();

        let residuals = residual_records(&graph, observations, &residuals_m);
        let total_distance_km: f64 = graph.edges().iter().map(|e| e.distance_km).sum();
        let k = k_coefficient(residuals.iter().map(|r| r.residual_mm), total_distance_km);

        tracing::info!(
            observations = n,
            unknowns = u,
            iterations,
            sigma0,
            converged,
            "parametric adjustment completed"
        );

        Ok(AdjustmentResult {
            method: AdjustmentMethod::Parametric,
            iterations,
            sigma0,
            heights,
            residuals,
            standard_errors_mm,
            k_coefficient: k,
            total_distance_km,
            degrees_of_freedom,
            converged,
            stability: self.config.check_stability.then_some(report),
            diagnostics,
        })
    }
}

impl NetworkAdjuster for ParametricAdjuster {
    fn method(&self) -> AdjustmentMethod {
        AdjustmentMethod::Parametric
    }

    fn adjust(
        &self,
        observations: &[Observation],
        fixed: &FixedPoints,
    ) -> AdjustResult<AdjustmentResult> {
        self.run(observations, fixed, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use leveling_core::NetworkDefect;

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

    /// Square A-B-C-D with the diagonal A-C: two independent loops
    fn braced_square() -> Vec<Observation> {
        vec![
            Observation::new("A", "B", 1.002, 800.0),
            Observation::new("B", "C", 1.001, 600.0),
            Observation::new("C", "D", 1.000, 700.0),
            Observation::new("D", "A", -3.004, 900.0),
            Observation::new("A", "C", 2.000, 1000.0),
        ]
    }

    #[test]
    fn test_closed_loop_has_zero_residuals() {
        let result = ParametricAdjuster::default()
            .adjust(&triangle(-5.300), &datum())
            .unwrap();

        assert!(result.converged);
        assert!((result.height("B").unwrap() - 110.5).abs() < 1e-9);
        assert!((result.height("C").unwrap() - 105.3).abs() < 1e-9);
        assert!(result.max_abs_residual_mm() < 1e-6);
        assert!(result.sigma0 < 1e-9);
        assert_eq!(result.degrees_of_freedom, 1);
        assert!(result.stability.is_some());
    }

    #[test]
    fn test_misclosure_distributed_by_length() {
        let obs = triangle(-5.250);
        let result = ParametricAdjuster::default().adjust(&obs, &datum()).unwrap();

        let expected = [-50.0 * 1.5 / 4.5, -50.0 * 2.0 / 4.5, -50.0 * 1.0 / 4.5];
        for (i, want) in expected.iter().enumerate() {
            let got = result.residual_of(i).unwrap().residual_mm;
            assert!((got - want).abs() < 1e-6, "residual {}: {} vs {}", i, got, want);
        }

        let closure: f64 = result.residuals.iter().map(|r| r.adjusted_height_diff).sum();
        assert!(closure.abs() < 1e-9);

        assert!((result.height("B").unwrap() - (110.5 - 0.05 / 3.0)).abs() < 1e-9);
        assert!((result.sigma0 - 0.05 / 4.5f64.sqrt()).abs() < 1e-9);
        assert!((result.k_coefficient - 50.0 / 4.5f64.sqrt()).abs() < 1e-6);
        assert!((result.total_distance_km - 4.5).abs() < 1e-12);
        assert!(result.standard_error_mm("B").unwrap() > 0.0);
    }

    #[test]
    fn test_fully_determined_is_exact() {
        let obs = vec![
            Observation::new("A", "B", 1.0, 500.0),
            Observation::new("B", "C", 2.0, 500.0),
        ];
        let result = ParametricAdjuster::default().adjust(&obs, &datum()).unwrap();

        assert_eq!(result.degrees_of_freedom, 0);
        assert_eq!(result.sigma0, 0.0);
        assert!((result.height("B").unwrap() - 101.0).abs() < 1e-12);
        assert!((result.height("C").unwrap() - 103.0).abs() < 1e-12);
        assert_eq!(result.standard_error_mm("C"), Some(0.0));
    }

    #[test]
    fn test_single_observation_is_exact() {
        let obs = vec![Observation::new("A", "B", 1.234, 500.0)];
        let result = ParametricAdjuster::default().adjust(&obs, &datum()).unwrap();

        assert_eq!(result.degrees_of_freedom, 0);
        assert_eq!(result.sigma0, 0.0);
        assert_eq!(result.heights.len(), 1);
        assert!((result.height("B").unwrap() - 101.234).abs() < 1e-12);
        assert!(result.max_abs_residual_mm() < 1e-9);
    }

    #[test]
    fn test_missing_datum() {
        let err = ParametricAdjuster::default()
            .adjust(&triangle(-5.3), &FixedPoints::new())
            .unwrap_err();
        assert!(matches!(
            err,
            AdjustError::InvalidNetwork {
                defect: NetworkDefect::MissingDatum,
                ..
            }
        ));

        // A benchmark that is not part of the network does not count
        let err = ParametricAdjuster::default()
            .adjust(&triangle(-5.3), &FixedPoints::new().with("Z", 1.0))
            .unwrap_err();
        assert!(matches!(err, AdjustError::InvalidNetwork { .. }));
    }

    #[test]
    fn test_free_cluster_without_validation_is_singular() {
        let obs = vec![
            Observation::new("A", "B", 1.0, 500.0),
            Observation::new("C", "D", 1.0, 500.0),
            Observation::new("D", "C", -1.0, 500.0),
        ];
        let lenient = ParametricAdjuster::new(ParametricConfig {
            validate_connectivity: false,
            ..ParametricConfig::default()
        });
        assert!(matches!(
            lenient.adjust(&obs, &datum()),
            Err(AdjustError::SingularMatrix { .. })
        ));

        assert!(matches!(
            ParametricAdjuster::default().adjust(&obs, &datum()),
            Err(AdjustError::InvalidNetwork {
                defect: NetworkDefect::MissingDatum,
                ..
            })
        ));
    }

    #[test]
    fn test_two_clusters_with_benchmarks() {
        let obs = vec![
            Observation::new("A", "B", 1.0, 500.0),
            Observation::new("C", "D", 1.0, 500.0),
        ];
        let fixed = FixedPoints::new().with("A", 10.0).with("C", 20.0);
        let err = ParametricAdjuster::default().adjust(&obs, &fixed).unwrap_err();

        let partition = err.partition().unwrap();
        assert_eq!(partition.len(), 2);
        assert!(partition[0].contains(&PointId::from("B")));
        assert!(partition[1].contains(&PointId::from("D")));
    }

    #[test]
    fn test_insufficient_observations() {
        let obs = vec![
            Observation::new("A", "B", 1.0, 500.0),
            Observation::new("C", "D", 1.0, 500.0),
        ];
        let lenient = ParametricAdjuster::new(ParametricConfig {
            validate_connectivity: false,
            ..ParametricConfig::default()
        });
        assert_eq!(
            lenient.adjust(&obs, &datum()).unwrap_err(),
            AdjustError::InsufficientObservations {
                observations: 2,
                unknowns: 3
            }
        );
    }

    #[test]
    fn test_iteration_budget_exhausted() {
        let adjuster = ParametricAdjuster::new(ParametricConfig {
            max_iterations: 1,
            ..ParametricConfig::default()
        });
        let result = adjuster.adjust(&triangle(-5.250), &datum()).unwrap();

        assert!(!result.converged);
        assert_eq!(result.iterations, 1);
        assert!(result
            .diagnostics
            .iter()
            .any(|d| matches!(d, Diagnostic::NotConverged { .. })));
        // The single linear step already reaches the solution
        assert!((result.height("B").unwrap() - (110.5 - 0.05 / 3.0)).abs() < 1e-9);
    }

    #[test]
    fn test_caller_approximations() {
        let mut approx = BTreeMap::new();
        approx.insert(PointId::from("B"), 0.0);
        approx.insert(PointId::from("C"), 500.0);

        let adjuster = ParametricAdjuster::default();
        let seeded = adjuster.adjust_from(&triangle(-5.250), &datum(), &approx).unwrap();
        let plain = adjuster.adjust(&triangle(-5.250), &datum()).unwrap();

        assert!(seeded.converged);
        assert_eq!(seeded.iterations, 2);
        for (id, h) in &plain.heights {
            assert!((seeded.heights[id] - h).abs() < 1e-9);
        }
    }

    #[test]
    fn test_ill_conditioned_flagged() {
        let obs = vec![
            Observation::new("A", "B", 1.0, 1e-6),
            Observation::new("B", "C", 1.0, 1e6),
        ];
        let result = ParametricAdjuster::default().adjust(&obs, &datum()).unwrap();
        assert!(result.is_ill_conditioned());
        assert!(result.stability.unwrap().ill_conditioned);

        let quiet = ParametricAdjuster::new(ParametricConfig {
            check_stability: false,
            ..ParametricConfig::default()
        });
        let result = quiet.adjust(&obs, &datum()).unwrap();
        assert!(result.stability.is_none());
        assert!(result.diagnostics.is_empty());
    }

    #[test]
    fn test_excluded_and_self_loop_observations() {
        let mut obs = triangle(-5.300);
        obs.push(Observation::new("B", "C", 99.0, 10.0).excluded());
        obs.push(Observation::new("C", "C", 0.002, 100.0));

        let result = ParametricAdjuster::default().adjust(&obs, &datum()).unwrap();
        assert_eq!(result.residuals.len(), 4);
        assert!(result.residual_of(3).is_none());
        assert!((result.residual_of(4).unwrap().residual_mm + 2.0).abs() < 1e-6);
        assert!((result.height("C").unwrap() - 105.3).abs() < 1e-9);
    }

    #[test]
    fn test_repeatable() {
        let adjuster = ParametricAdjuster::new(ParametricConfig::strict());
        let first = adjuster.adjust(&triangle(-5.250), &datum()).unwrap();
        let second = adjuster.adjust(&triangle(-5.250), &datum()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_idempotent() {
        let adjuster = ParametricAdjuster::default();
        let obs = braced_square();
        let first = adjuster.adjust(&obs, &datum()).unwrap();
        assert!(first.max_abs_residual_mm() > 0.1);

        let second = adjuster
            .adjust(&first.adjusted_observations(&obs), &datum())
            .unwrap();
        assert_eq!(second.heights.len(), 3);
        for (id, h) in &first.heights {
            assert!((second.heights[id] - h).abs() < 1e-9, "{}", id);
        }
        assert!(second.max_abs_residual_mm() < 1e-6);
        assert!(second.sigma0 < 1e-9);
    }

    #[test]
    fn test_long_lines_need_relaxed_determinant() {
        // Twelve 40 km lines: |det N| = 12 / 40^11, well posed but tiny
        let n = 12;
        let obs: Vec<Observation> = (0..n)
            .map(|i| {
                let dh = if i + 1 == n { -1.1 + 0.004 } else { 0.1 };
                Observation::new(format!("R{}", i), format!("R{}", (i + 1) % n), dh, 40_000.0)
            })
            .collect();
        let fixed = FixedPoints::new().with("R0", 50.0);

        match ParametricAdjuster::default().adjust(&obs, &fixed) {
            Err(AdjustError::SingularMatrix { rank, size, .. }) => {
                assert_eq!(rank, 11);
                assert_eq!(size, 11);
            }
            other => panic!("expected a singular matrix, got {:?}", other),
        }

        let relaxed = ParametricAdjuster::new(ParametricConfig {
            thresholds: StabilityThresholds {
                singular_determinant: 0.0,
                ..StabilityThresholds::default()
            },
            ..ParametricConfig::default()
        });
        let result = relaxed.adjust(&obs, &fixed).unwrap();
        let conditional = crate::ConditionalAdjuster::default()
            .adjust(&obs, &fixed)
            .unwrap();
        for (id, h) in &conditional.heights {
            assert!((result.heights[id] - h).abs() < 1e-8, "{}", id);
        }
        assert!(!result.stability.unwrap().singular);
    }
}
