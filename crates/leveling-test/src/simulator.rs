//! Network Simulator - synthetic leveling networks with known truth
//!
//! Simulates:
//! - Point layouts: open traverse, closed ring, rectangular grid
//! - Measurement noise of k mm/√km per run
//! - Runs measured in either direction, optionally repeated
//! - Single lines of setups between two benchmarks

use std::collections::BTreeMap;

use leveling_core::{AdjustmentResult, FixedPoints, LevelingLine, Observation, PointId, Setup};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Shape of a simulated network
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Layout {
    /// Open traverse P0 - P1 - ... - Pn-1
    Line { points: usize },
    /// Closed ring of `points`
    Ring { points: usize },
    /// Rectangular grid, every point tied to its right and lower neighbour
    Grid { rows: usize, cols: usize },
}

impl Layout {
    pub fn point_count(&self) -> usize {
        match *self {
            Layout::Line { points } | Layout::Ring { points } => points,
            Layout::Grid { rows, cols } => rows * cols,
        }
    }

    /// Point index pairs measured once each
    pub fn links(&self) -> Vec<(usize, usize)> {
        match *self {
            Layout::Line { points } => (1..points).map(|i| (i - 1, i)).collect(),
            Layout::Ring { points } => {
                if points < 2 {
                    return Vec::new();
                }
                (0..points).map(|i| (i, (i + 1) % points)).collect()
            }
            Layout::Grid { rows, cols } => {
                let mut links = Vec::new();
                for r in 0..rows {
                    for c in 0..cols {
                        let i = r * cols + c;
                        if c + 1 < cols {
                            links.push((i, i + 1));
                        }
                        if r + 1 < rows {
                            links.push((i, i + cols));
                        }
                    }
                }
                links
            }
        }
    }
}

/// Simulation parameters
#[derive(Clone, Debug)]
pub struct SimConfig {
    pub layout: Layout,
    /// Standard deviation of a 1 km run, mm
    pub noise_mm_per_sqrt_km: f64,
    /// Run length range, m
    pub min_distance_m: f64,
    pub max_distance_m: f64,
    /// True heights are drawn from ±height_range_m around `base_height_m`
    pub base_height_m: f64,
    pub height_range_m: f64,
    /// Share of links measured a second time, backwards
    pub double_run_ratio: f64,
    /// Benchmarks, spread evenly over the points
    pub fixed_points: usize,
    pub seed: u64,
}

impl Default for SimConfig {
    fn default() -> Self {
        SimConfig {
            layout: Layout::Ring { points: 6 },
            noise_mm_per_sqrt_km: 1.0,
            min_distance_m: 200.0,
            max_distance_m: 1000.0,
            base_height_m: 100.0,
            height_range_m: 25.0,
            double_run_ratio: 0.0,
            fixed_points: 1,
            seed: 42,
        }
    }
}

impl SimConfig {
    /// Noise-free observations
    pub fn exact() -> Self {
        SimConfig {
            noise_mm_per_sqrt_km: 0.0,
            ..Self::default()
        }
    }

    /// First order leveling precision
    pub fn light() -> Self {
        Self::default()
    }

    /// Rough field work with repeated runs
    pub fn noisy() -> Self {
        SimConfig {
            noise_mm_per_sqrt_km: 10.0,
            double_run_ratio: 0.3,
            fixed_points: 2,
            ..Self::default()
        }
    }

    pub fn with_layout(mut self, layout: Layout) -> Self {
        self.layout = layout;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_fixed_points(mut self, count: usize) -> Self {
        self.fixed_points = count;
        self
    }
}

/// A generated network together with its true heights
#[derive(Clone, Debug)]
pub struct SimulatedNetwork {
    pub observations: Vec<Observation>,
    pub fixed: FixedPoints,
    pub truth: BTreeMap<PointId, f64>,
}

impl SimulatedNetwork {
    pub fn true_height(&self, id: &str) -> Option<f64> {
        self.truth.get(id).copied()
    }

    /// Largest |adjusted - true| over the adjusted points, m
    pub fn max_height_error(&self, result: &AdjustmentResult) -> f64 {
        result
            .heights
            .iter()
            .filter_map(|(id, h)| self.truth.get(id).map(|t| (h - t).abs()))
            .fold(0.0, f64::max)
    }

    pub fn total_distance_km(&self) -> f64 {
        self.observations.iter().map(|o| o.distance_km()).sum()
    }
}

/// Seeded generator of synthetic leveling data
pub struct NetworkSimulator {
    config: SimConfig,
    rng: StdRng,
}

impl NetworkSimulator {
    pub fn new(config: SimConfig) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        NetworkSimulator { config, rng }
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn point_name(index: usize) -> PointId {
        PointId::new(format!("P{:03}", index))
    }

    /// Zero-mean Gaussian sample (Box-Muller)
    fn gaussian(&mut self, sigma: f64) -> f64 {
        if sigma == 0.0 {
            return 0.0;
        }
        let u1: f64 = self.rng.gen_range(f64::EPSILON..1.0);
        let u2: f64 = self.rng.gen();
        sigma * (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
    }

    /// Noise of one run of `distance_m`, m
    fn run_noise(&mut self, distance_m: f64) -> f64 {
        let sigma_mm = self.config.noise_mm_per_sqrt_km * (distance_m / 1000.0).sqrt();
        self.gaussian(sigma_mm) / 1000.0
    }

    fn distance(&mut self) -> f64 {
        if self.config.max_distance_m > self.config.min_distance_m {
            self.rng
                .gen_range(self.config.min_distance_m..self.config.max_distance_m)
        } else {
            self.config.min_distance_m
        }
    }

    /// Generate a network
    pub fn generate(&mut self) -> SimulatedNetwork {
        let n = self.config.layout.point_count();
        let heights: Vec<f64> = (0..n)
            .map(|_| {
                self.config.base_height_m
                    + self
                        .rng
                        .gen_range(-self.config.height_range_m..=self.config.height_range_m)
            })
            .collect();

        let mut observations = Vec::new();
        for (a, b) in self.config.layout.links() {
            let distance = self.distance();
            let (from, to) = if self.rng.gen_bool(0.5) { (a, b) } else { (b, a) };
            let dh = heights[to] - heights[from] + self.run_noise(distance);
            observations.push(
                Observation::new(Self::point_name(from), Self::point_name(to), dh, distance)
                    .with_source("SIM"),
            );

            let repeat = self.config.double_run_ratio.clamp(0.0, 1.0);
            if repeat > 0.0 && self.rng.gen_bool(repeat) {
                let back = heights[from] - heights[to] + self.run_noise(distance);
                observations.push(
                    Observation::new(Self::point_name(to), Self::point_name(from), back, distance)
                        .with_source("SIM-BACK"),
                );
            }
        }

        let count = self.config.fixed_points.clamp(1, n.max(1));
        let fixed: FixedPoints = (0..count)
            .map(|k| k * n / count)
            .map(|i| (Self::point_name(i), heights[i]))
            .collect();

        let truth = heights
            .iter()
            .enumerate()
            .map(|(i, &h)| (Self::point_name(i), h))
            .collect();

        tracing::debug!(
            points = n,
            observations = observations.len(),
            fixed = fixed.len(),
            "simulated network generated"
        );

        SimulatedNetwork {
            observations,
            fixed,
            truth,
        }
    }

    /// Generate a single line of `setups` between benchmarks `BM1` and `BM2`.
    ///
    /// Sight lengths are a tenth of the configured run range.
    pub fn generate_line(&mut self, setups: usize) -> (LevelingLine, FixedPoints) {
        let setups = setups.max(1);
        let mut names: Vec<PointId> = vec![PointId::from("BM1")];
        names.extend((1..setups).map(|i| PointId::new(format!("TP{}", i))));
        names.push(PointId::from("BM2"));

        let mut height = self.config.base_height_m;
        let mut truth = vec![height];
        for _ in 0..setups {
            height += self.rng.gen_range(-1.5..1.5);
            truth.push(height);
        }

        let mut line_setups = Vec::with_capacity(setups);
        for i in 0..setups {
            let distance = self.distance() / 10.0;
            let dh = truth[i + 1] - truth[i] + self.run_noise(distance);
            line_setups.push(Setup::new(names[i].clone(), names[i + 1].clone(), dh, distance));
        }

        let fixed = FixedPoints::new()
            .with("BM1", truth[0])
            .with("BM2", truth[setups]);
        let line = LevelingLine::new("BM1", "BM2", line_setups).with_source("SIM-LINE");
        (line, fixed)
    }
}
