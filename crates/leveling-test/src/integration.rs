//! End-to-end Integration Test Suite
//!
//! Runs simulated networks through the whole pipeline and checks:
//! - Both adjustment models reach the same heights
//! - Adjusted observations close every loop
//! - Repeated runs give identical results
//! - Re-adjusting the adjusted observations changes nothing
//! - Noise-free networks reproduce the true heights

use leveling_adjust::{
    ConditionalAdjuster, LineAdjuster, NetworkAdjuster, ParametricAdjuster, ParametricConfig,
};
use leveling_core::{AdjustmentResult, ToleranceTable};
use leveling_graph::{LoopAnalyzer, NetworkReport, ObservationGraph};

use crate::simulator::{Layout, NetworkSimulator, SimConfig, SimulatedNetwork};

/// Configuration for integration tests
#[derive(Debug, Clone)]
pub struct IntegrationTestConfig {
    pub sim: SimConfig,
    /// Allowed height difference between the two models, m
    pub agreement_tolerance_m: f64,
    /// Allowed closure of an adjusted loop, m
    pub closure_tolerance_m: f64,
    /// Allowed deviation from the true heights, m; `None` skips the check
    pub truth_tolerance_m: Option<f64>,
}

impl Default for IntegrationTestConfig {
    fn default() -> Self {
        Self {
            sim: SimConfig::light().with_layout(Layout::Grid { rows: 3, cols: 3 }),
            agreement_tolerance_m: 1e-7,
            closure_tolerance_m: 1e-9,
            truth_tolerance_m: None,
        }
    }
}

impl IntegrationTestConfig {
    /// Small noise-free ring
    pub fn minimal() -> Self {
        Self {
            sim: SimConfig::exact().with_layout(Layout::Ring { points: 4 }),
            truth_tolerance_m: Some(1e-9),
            ..Self::default()
        }
    }

    /// Standard test configuration
    pub fn standard() -> Self {
        Self::default()
    }

    /// Larger grid with noisy double runs and two benchmarks
    pub fn stress() -> Self {
        Self {
            sim: SimConfig::noisy().with_layout(Layout::Grid { rows: 5, cols: 5 }),
            ..Self::default()
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.sim = self.sim.with_seed(seed);
        self
    }
}

/// Result of an integration test
#[derive(Debug, Clone)]
pub struct IntegrationTestResult {
    pub network: SimulatedNetwork,
    pub report: Option<NetworkReport>,
    pub parametric: Option<AdjustmentResult>,
    pub conditional: Option<AdjustmentResult>,
    /// Largest height difference between the models, m
    pub max_model_difference_m: f64,
    /// Largest closure of an adjusted loop, m
    pub max_loop_closure_m: f64,
    /// Largest deviation from the true heights, m
    pub max_truth_error_m: f64,
    /// Same input, same result
    pub repeatable: bool,
    /// Adjusted observations re-adjust to the same heights with zero residuals
    pub idempotent: bool,
    /// Specific invariant violations
    pub invariant_violations: Vec<String>,
}

impl IntegrationTestResult {
    /// Check if the test passed
    pub fn passed(&self) -> bool {
        self.invariant_violations.is_empty()
    }
}

/// Integration test harness
pub struct IntegrationTestHarness {
    config: IntegrationTestConfig,
    table: ToleranceTable,
}

impl IntegrationTestHarness {
    pub fn new(config: IntegrationTestConfig) -> Self {
        Self {
            config,
            table: ToleranceTable::default(),
        }
    }

    /// Generate a network and run it through analysis and both models
    pub fn run(&self) -> IntegrationTestResult {
        let network = NetworkSimulator::new(self.config.sim.clone()).generate();
        let mut violations = Vec::new();

        let graph = match ObservationGraph::build(&network.observations) {
            Ok(graph) => Some(graph),
            Err(e) => {
                violations.push(format!("graph: {}", e));
                None
            }
        };
        let report = graph
            .as_ref()
            .map(|g| LoopAnalyzer::new(&self.table).analyze_loops(g));

        let parametric_adjuster = ParametricAdjuster::new(ParametricConfig::strict());
        let parametric = self.adjust(&parametric_adjuster, &network, &mut violations);
        let conditional = self.adjust(&ConditionalAdjuster::default(), &network, &mut violations);

        let mut max_model_difference_m = 0.0f64;
        if let (Some(p), Some(c)) = (&parametric, &conditional) {
            for (id, h) in &p.heights {
                match c.heights.get(id) {
                    Some(other) => {
                        max_model_difference_m = max_model_difference_m.max((h - other).abs())
                    }
                    None => violations.push(format!("{} missing from conditional result", id)),
                }
            }
            if max_model_difference_m > self.config.agreement_tolerance_m {
                violations.push(format!(
                    "models disagree by {:.3e} m",
                    max_model_difference_m
                ));
            }
        }

        let mut max_loop_closure_m = 0.0f64;
        if let (Some(g), Some(p)) = (&graph, &parametric) {
            for cycle in g.find_loops() {
                let closure: f64 = cycle
                    .steps
                    .iter()
                    .filter_map(|s| {
                        p.residual_of(s.observation)
                            .map(|r| s.sign() * r.adjusted_height_diff)
                    })
                    .sum();
                max_loop_closure_m = max_loop_closure_m.max(closure.abs());
            }
            if max_loop_closure_m > self.config.closure_tolerance_m {
                violations.push(format!("adjusted loop closes to {:.3e} m", max_loop_closure_m));
            }
        }

        let repeated = parametric_adjuster.adjust(&network.observations, &network.fixed);
        let repeatable = match (&parametric, repeated) {
            (Some(first), Ok(second)) => *first == second,
            _ => false,
        };
        if parametric.is_some() && !repeatable {
            violations.push("repeated adjustment differs".to_string());
        }

        let idempotent = parametric.is_some()
            && conditional.is_some()
            && self.readjusts(&parametric_adjuster, &network, parametric.as_ref())
            && self.readjusts(&ConditionalAdjuster::default(), &network, conditional.as_ref());
        if parametric.is_some() && conditional.is_some() && !idempotent {
            violations.push("re-adjusting the adjusted observations moved heights".to_string());
        }

        let max_truth_error_m = parametric
            .as_ref()
            .map(|p| network.max_height_error(p))
            .unwrap_or(0.0);
        if let Some(tolerance) = self.config.truth_tolerance_m {
            if max_truth_error_m > tolerance {
                violations.push(format!("heights off truth by {:.3e} m", max_truth_error_m));
            }
        }

        IntegrationTestResult {
            network,
            report,
            parametric,
            conditional,
            max_model_difference_m,
            max_loop_closure_m,
            max_truth_error_m,
            repeatable,
            idempotent,
            invariant_violations: violations,
        }
    }

    /// Re-adjust from the adjusted height differences of `first`
    fn readjusts(
        &self,
        adjuster: &dyn NetworkAdjuster,
        network: &SimulatedNetwork,
        first: Option<&AdjustmentResult>,
    ) -> bool {
        let Some(first) = first else {
            return false;
        };
        let observations = first.adjusted_observations(&network.observations);
        match adjuster.adjust(&observations, &network.fixed) {
            Ok(second) => {
                second.max_abs_residual_mm() < 1e-6
                    && first.heights.iter().all(|(id, h)| {
                        second
                            .height(id.as_str())
                            .map_or(false, |other| (other - h).abs() < 1e-9)
                    })
            }
            Err(_) => false,
        }
    }

    fn adjust(
        &self,
        adjuster: &dyn NetworkAdjuster,
        network: &SimulatedNetwork,
        violations: &mut Vec<String>,
    ) -> Option<AdjustmentResult> {
        match adjuster.adjust(&network.observations, &network.fixed) {
            Ok(result) => {
                if !result.converged {
                    violations.push(format!("{} did not converge", adjuster.method()));
                }
                Some(result)
            }
            Err(e) => {
                violations.push(format!("{}: {}", adjuster.method(), e));
                None
            }
        }
    }
}

// ============================================================================
// TEST FUNCTIONS
// ============================================================================

/// Noise-free ring reproduces the truth
pub fn test_exact_ring() -> IntegrationTestResult {
    IntegrationTestHarness::new(IntegrationTestConfig::minimal()).run()
}

/// Lightly noisy grid
pub fn test_light_grid() -> IntegrationTestResult {
    IntegrationTestHarness::new(IntegrationTestConfig::standard()).run()
}

/// Noisy grid with double runs and two benchmarks
pub fn test_noisy_stress() -> IntegrationTestResult {
    IntegrationTestHarness::new(IntegrationTestConfig::stress()).run()
}

/// A simulated line closes on its second benchmark after adjustment
pub fn test_line_closure(seed: u64) -> bool {
    let mut sim = NetworkSimulator::new(SimConfig::light().with_seed(seed));
    let (line, fixed) = sim.generate_line(12);

    match LineAdjuster::default().adjust_line(&line, &fixed) {
        Ok(adjusted) => match (adjusted.height("BM2"), fixed.get("BM2")) {
            (Some(h), Some(known)) => (h - known).abs() < 1e-9,
            _ => false,
        },
        Err(_) => false,
    }
}
