//! Single-line adjustment
//!
//! A line run between two benchmarks misses the known height difference by
//! its misclosure. The misclosure is spread back over the setups, either in
//! proportion to setup length or evenly, and the heights of the points along
//! the line are recomputed from the corrected height differences.

use std::collections::{BTreeMap, BTreeSet};

use leveling_core::{
    AdjustError, AdjustResult, Classification, Diagnostic, FixedPoints, LevelingLine, Point,
    PointId, Setup, ToleranceTable, MM_PER_M, M_PER_KM,
};

/// How a line misclosure is spread over the setups
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DistributionPolicy {
    /// Correction proportional to setup length
    #[default]
    Proportional,
    /// Same correction for every included setup
    Equal,
}

/// Line adjustment configuration
#[derive(Clone, Debug, PartialEq)]
pub struct LineConfig {
    pub distribution: DistributionPolicy,
    /// Tolerance class the line is checked against
    pub class: String,
}

impl Default for LineConfig {
    fn default() -> Self {
        LineConfig {
            distribution: DistributionPolicy::Proportional,
            class: "H3".to_string(),
        }
    }
}

impl LineConfig {
    /// Even distribution, for lines with uniform sight lengths
    pub fn equal() -> Self {
        LineConfig {
            distribution: DistributionPolicy::Equal,
            ..Self::default()
        }
    }

    pub fn with_class(mut self, class: impl Into<String>) -> Self {
        self.class = class.into();
        self
    }
}

/// Correction applied to one setup
#[derive(Clone, Debug, PartialEq)]
pub struct SetupCorrection {
    /// Position of the setup in the line
    pub setup: usize,
    pub from: PointId,
    pub to: PointId,
    pub observed_height_diff: f64,
    /// Zero for excluded setups, m
    pub correction_m: f64,
    /// Running total of corrections up to and including this setup, m
    pub cumulative_correction_m: f64,
    /// Adjusted height of `to`, m
    pub height: f64,
    pub included: bool,
}

impl SetupCorrection {
    pub fn adjusted_height_diff(&self) -> f64 {
        self.observed_height_diff + self.correction_m
    }
}

/// Outcome of adjusting one line between two benchmarks
#[derive(Clone, Debug, PartialEq)]
pub struct LineAdjustment {
    pub start: PointId,
    pub end: PointId,
    pub start_height: f64,
    pub end_height: f64,
    /// Σ included dH, m
    pub measured_height_diff: f64,
    /// end - start, m
    pub expected_height_diff: f64,
    /// measured - expected, m
    pub misclosure_m: f64,
    pub distance_km: f64,
    pub class: String,
    /// Allowed misclosure for `class`, mm
    pub tolerance_mm: f64,
    pub within_tolerance: bool,
    pub achieved: Classification,
    pub corrections: Vec<SetupCorrection>,
    pub diagnostics: Vec<Diagnostic>,
}

impl LineAdjustment {
    pub fn misclosure_mm(&self) -> f64 {
        self.misclosure_m * MM_PER_M
    }

    /// Adjusted heights in run order, starting with the start point
    pub fn heights(&self) -> Vec<(PointId, f64)> {
        std::iter::once((self.start.clone(), self.start_height))
            .chain(self.corrections.iter().map(|c| (c.to.clone(), c.height)))
            .collect()
    }

    /// Adjusted height of a point on the line
    pub fn height(&self, id: &str) -> Option<f64> {
        if self.start.as_str() == id {
            return Some(self.start_height);
        }
        self.corrections
            .iter()
            .rev()
            .find(|c| c.to.as_str() == id)
            .map(|c| c.height)
    }

    /// Adjusted heights of the points strictly between start and end
    pub fn intermediate_heights(&self) -> BTreeMap<PointId, f64> {
        self.corrections
            .iter()
            .filter(|c| c.to != self.start && c.to != self.end)
            .map(|c| (c.to.clone(), c.height))
            .collect()
    }
}

/// One run of a multi-run adjustment
#[derive(Clone, Debug, PartialEq)]
pub struct RunAdjustment {
    /// Position of the run in the input slice
    pub index: usize,
    /// Measured end to start and reversed before adjustment
    pub reversed: bool,
    /// 1 / run length, 1/km
    pub weight: f64,
    pub adjustment: LineAdjustment,
}

/// Several runs between the same two benchmarks combined
#[derive(Clone, Debug, PartialEq)]
pub struct MultiRunAdjustment {
    pub start: PointId,
    pub end: PointId,
    pub runs: Vec<RunAdjustment>,
    /// Input positions of runs with other endpoints
    pub mismatched: Vec<usize>,
    /// Input positions of matching runs without included setups
    pub empty: Vec<usize>,
    /// Weighted mean of the measured height differences, m
    pub mean_height_diff: f64,
    pub expected_height_diff: f64,
    /// Weighted mean minus expected, mm
    pub misclosure_mm: f64,
    /// Largest minus smallest measured height difference, mm
    pub spread_mm: f64,
    /// Weighted mean heights of intermediate points common to every run
    pub heights: BTreeMap<PointId, f64>,
    /// Intermediate points missing from at least one run
    pub unshared: Vec<PointId>,
}

/// Distributes line misclosures against a tolerance table
#[derive(Clone, Debug, Default)]
pub struct LineAdjuster {
    config: LineConfig,
    table: ToleranceTable,
}

impl LineAdjuster {
    pub fn new(config: LineConfig, table: ToleranceTable) -> Self {
        LineAdjuster { config, table }
    }

    pub fn config(&self) -> &LineConfig {
        &self.config
    }

    pub fn table(&self) -> &ToleranceTable {
        &self.table
    }

    /// Adjust a run of setups between two known heights.
    ///
    /// The start point is the backsight of the first setup and the end point
    /// the foresight of the last one.
    pub fn adjust(
        &self,
        setups: &[Setup],
        start_height: f64,
        end_height: f64,
    ) -> AdjustResult<LineAdjustment> {
        let (first, last) = match (setups.first(), setups.last()) {
            (Some(first), Some(last)) => (first, last),
            _ => return Err(AdjustError::EmptyLine),
        };
        self.distribute(&first.from, &last.to, setups, start_height, end_height)
    }

    /// Adjust a line whose end heights are looked up among the benchmarks
    pub fn adjust_line(
        &self,
        line: &LevelingLine,
        fixed: &FixedPoints,
    ) -> AdjustResult<LineAdjustment> {
        let start_height = fixed
            .get(line.start.as_str())
            .ok_or_else(|| AdjustError::MissingBenchmark(line.start.clone()))?;
        let end_height = fixed
            .get(line.end.as_str())
            .ok_or_else(|| AdjustError::MissingBenchmark(line.end.clone()))?;
        self.distribute(&line.start, &line.end, &line.setups, start_height, end_height)
    }

    fn distribute(
        &self,
        start: &PointId,
        end: &PointId,
        setups: &[Setup],
        start_height: f64,
        end_height: f64,
    ) -> AdjustResult<LineAdjustment> {
        let included = setups.iter().filter(|s| s.included).count();
        if included == 0 {
            return Err(AdjustError::EmptyLine);
        }

        let total_distance: f64 = setups.iter().filter(|s| s.included).map(|s| s.distance).sum();
        if self.config.distribution == DistributionPolicy::Proportional && total_distance <= 0.0 {
            return Err(AdjustError::WeightMatrix {
                index: 0,
                from: start.clone(),
                to: end.clone(),
                distance: total_distance,
            });
        }

        let measured: f64 = setups.iter().filter(|s| s.included).map(|s| s.height_diff).sum();
        let expected = end_height - start_height;
        let misclosure = measured - expected;
        let distance_km = total_distance / M_PER_KM;

        let mut corrections = Vec::with_capacity(setups.len());
        let mut height = start_height;
        let mut cumulative = 0.0;
        let mut run_distance = 0.0;
        let mut done = 0usize;

        for (i, setup) in setups.iter().enumerate() {
            let correction = if setup.included {
                done += 1;
                run_distance += setup.distance;
                let target = match self.config.distribution {
                    DistributionPolicy::Proportional => -misclosure * run_distance / total_distance,
                    DistributionPolicy::Equal => -misclosure * done as f64 / included as f64,
                };
                let correction = target - cumulative;
                cumulative = target;
                height += setup.height_diff + correction;
                correction
            } else {
                0.0
            };

            corrections.push(SetupCorrection {
                setup: i,
                from: setup.from.clone(),
                to: setup.to.clone(),
                observed_height_diff: setup.height_diff,
                correction_m: correction,
                cumulative_correction_m: cumulative,
                height,
                included: setup.included,
            });
        }

        let misclosure_mm = misclosure * MM_PER_M;
        let tolerance_mm = self.table.tolerance_mm(&self.config.class, distance_km)?;
        let within_tolerance = misclosure_mm.abs() <= tolerance_mm;
        let achieved = self.table.classify(misclosure_mm, distance_km);

        let mut diagnostics = Vec::new();
        if !within_tolerance {
            tracing::warn!(
                start = %start,
                end = %end,
                misclosure_mm,
                tolerance_mm,
                class = %self.config.class,
                "line misclosure exceeds tolerance"
            );
            diagnostics.push(Diagnostic::ToleranceExceeded {
                class: self.config.class.clone(),
                misclosure_mm,
                tolerance_mm,
            });
        }

        tracing::debug!(
            start = %start,
            end = %end,
            setups = included,
            misclosure_mm,
            "line adjusted"
        );

        Ok(LineAdjustment {
            start: start.clone(),
            end: end.clone(),
            start_height,
            end_height,
            measured_height_diff: measured,
            expected_height_diff: expected,
            misclosure_m: misclosure,
            distance_km,
            class: self.config.class.clone(),
            tolerance_mm,
            within_tolerance,
            achieved,
            corrections,
            diagnostics,
        })
    }

    /// Adjust and combine several runs between the same two benchmarks.
    ///
    /// Runs measured from `end` to `start` are reversed first. Runs with any
    /// other endpoints are listed as mismatched and skipped, runs without an
    /// included setup as empty.
    pub fn adjust_multiple_runs(
        &self,
        runs: &[LevelingLine],
        start: &Point,
        end: &Point,
    ) -> AdjustResult<MultiRunAdjustment> {
        let start_height = start
            .height()
            .ok_or_else(|| AdjustError::MissingBenchmark(start.id.clone()))?;
        let end_height = end
            .height()
            .ok_or_else(|| AdjustError::MissingBenchmark(end.id.clone()))?;

        let mut adjusted = Vec::new();
        let mut mismatched = Vec::new();
        let mut empty = Vec::new();
        for (index, run) in runs.iter().enumerate() {
            let (oriented, reversed) = if run.start == start.id && run.end == end.id {
                (run.clone(), false)
            } else if run.start == end.id && run.end == start.id {
                (run.reversed(), true)
            } else {
                tracing::warn!(
                    run = index,
                    start = %run.start,
                    end = %run.end,
                    "run does not connect the benchmarks"
                );
                mismatched.push(index);
                continue;
            };

            let outcome =
                self.distribute(&start.id, &end.id, &oriented.setups, start_height, end_height);
            let adjustment = match outcome {
                Ok(adjustment) => adjustment,
                Err(AdjustError::EmptyLine) => {
                    tracing::warn!(run = index, "run has no included setups");
                    empty.push(index);
                    continue;
                }
                Err(e) => return Err(e),
            };
            if adjustment.distance_km <= 0.0 {
                return Err(AdjustError::WeightMatrix {
                    index,
                    from: run.start.clone(),
                    to: run.end.clone(),
                    distance: adjustment.distance_km * M_PER_KM,
                });
            }
            adjusted.push(RunAdjustment {
                index,
                reversed,
                weight: 1.0 / adjustment.distance_km,
                adjustment,
            });
        }

        if adjusted.is_empty() {
            return Err(AdjustError::NoMatchingRuns);
        }

        let total_weight: f64 = adjusted.iter().map(|r| r.weight).sum();
        let mean_height_diff = adjusted
            .iter()
            .map(|r| r.weight * r.adjustment.measured_height_diff)
            .sum::<f64>()
            / total_weight;
        let expected_height_diff = end_height - start_height;

        let max = adjusted
            .iter()
            .map(|r| r.adjustment.measured_height_diff)
            .fold(f64::NEG_INFINITY, f64::max);
        let min = adjusted
            .iter()
            .map(|r| r.adjustment.measured_height_diff)
            .fold(f64::INFINITY, f64::min);

        let per_run: Vec<BTreeMap<PointId, f64>> = adjusted
            .iter()
            .map(|r| r.adjustment.intermediate_heights())
            .collect();
        let all_points: BTreeSet<&PointId> = per_run.iter().flat_map(|h| h.keys()).collect();

        let mut heights = BTreeMap::new();
        let mut unshared = Vec::new();
        for point in all_points {
            if per_run.iter().all(|h| h.contains_key(point)) {
                let weighted: f64 = adjusted
                    .iter()
                    .zip(&per_run)
                    .map(|(r, h)| r.weight * h[point])
                    .sum();
                heights.insert(point.clone(), weighted / total_weight);
            } else {
                unshared.push(point.clone());
            }
        }

        tracing::info!(
            runs = adjusted.len(),
            mismatched = mismatched.len(),
            empty = empty.len(),
            shared = heights.len(),
            "multi-run adjustment completed"
        );

        Ok(MultiRunAdjustment {
            start: start.id.clone(),
            end: end.id.clone(),
            runs: adjusted,
            mismatched,
            empty,
            mean_height_diff,
            expected_height_diff,
            misclosure_mm: (mean_height_diff - expected_height_diff) * MM_PER_M,
            spread_mm: (max - min) * MM_PER_M,
            heights,
            unshared,
        })
    }
}
