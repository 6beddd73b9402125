//! Loop and double-run analysis
//!
//! Advisory checks run before an adjustment: how badly does each loop
//! misclose, and how well do repeated runs over the same section agree.

use std::collections::BTreeMap;

use leveling_core::{
    Classification, Diagnostic, Observation, PointId, ToleranceTable, MM_PER_M,
};

use crate::{Loop, ObservationGraph};

/// Misclosure report of one loop
#[derive(Debug, Clone, PartialEq)]
pub struct LoopReport {
    pub cycle: Loop,
    /// Signed misclosure, mm
    pub misclosure_mm: f64,
    pub perimeter_km: f64,
    pub achieved: Classification,
}

impl LoopReport {
    pub fn is_exceeded(&self) -> bool {
        self.achieved.is_exceeded()
    }
}

/// Loop analysis of a whole network
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkReport {
    pub loops: Vec<LoopReport>,
    /// Connected components, each sorted by point id
    pub components: Vec<Vec<PointId>>,
    pub cyclomatic_number: usize,
    pub diagnostics: Vec<Diagnostic>,
}

impl NetworkReport {
    pub fn is_connected(&self) -> bool {
        self.components.len() <= 1
    }

    /// Largest absolute loop misclosure, mm
    pub fn worst_misclosure_mm(&self) -> f64 {
        self.loops
            .iter()
            .map(|l| l.misclosure_mm.abs())
            .fold(0.0, f64::max)
    }

    /// Loosest class achieved by any loop
    pub fn overall_class(&self, table: &ToleranceTable) -> Option<Classification> {
        let mut worst: Option<(usize, Classification)> = None;
        for report in &self.loops {
            let rank = match &report.achieved {
                Classification::Exceeded => usize::MAX,
                Classification::Class(name) => table
                    .classes()
                    .iter()
                    .position(|c| &c.name == name)
                    .unwrap_or(usize::MAX),
            };
            if worst.as_ref().map_or(true, |(r, _)| rank > *r) {
                worst = Some((rank, report.achieved.clone()));
            }
        }
        worst.map(|(_, class)| class)
    }
}

/// Agreement of repeated runs between the same two points
#[derive(Debug, Clone, PartialEq)]
pub struct DoubleRun {
    /// Reference direction is that of the first run
    pub from: PointId,
    pub to: PointId,
    /// Indices of the runs in the input slice, input order
    pub observations: Vec<usize>,
    /// Height differences normalized to `from -> to`, m
    pub height_diffs: Vec<f64>,
    /// Reference run minus run j, one entry per run after the first, mm
    pub discrepancies_mm: Vec<f64>,
    /// Discrepancy with the largest magnitude, mm
    pub max_discrepancy_mm: f64,
    /// Max minus min of the normalized height differences, mm
    pub spread_mm: f64,
    pub mean_height_diff: f64,
    /// Σ run distances, km
    pub total_distance_km: f64,
    pub achieved: Classification,
}

impl DoubleRun {
    pub fn run_count(&self) -> usize {
        self.observations.len()
    }
}

/// Classifies loop misclosures and double runs against a tolerance table
#[derive(Debug, Clone, Copy)]
pub struct LoopAnalyzer<'a> {
    table: &'a ToleranceTable,
}

impl<'a> LoopAnalyzer<'a> {
    pub fn new(table: &'a ToleranceTable) -> Self {
        LoopAnalyzer { table }
    }

    pub fn table(&self) -> &ToleranceTable {
        self.table
    }

    /// Misclosure and achieved class of every fundamental loop
    pub fn analyze_loops(&self, graph: &ObservationGraph) -> NetworkReport {
        let loops: Vec<LoopReport> = graph
            .find_loops()
            .into_iter()
            .map(|cycle| self.report_loop(cycle))
            .collect();

        let components = graph.components();
        let mut diagnostics = Vec::new();
        if components.len() > 1 {
            tracing::warn!(components = components.len(), "network is disconnected");
            diagnostics.push(Diagnostic::DisconnectedComponents {
                partition: components.clone(),
            });
        }

        let exceeded = loops.iter().filter(|l| l.is_exceeded()).count();
        if exceeded > 0 {
            tracing::warn!(exceeded, loops = loops.len(), "loops exceed every tolerance class");
        }

        NetworkReport {
            cyclomatic_number: graph.cyclomatic_number(),
            loops,
            components,
            diagnostics,
        }
    }

    fn report_loop(&self, cycle: Loop) -> LoopReport {
        let misclosure_mm = cycle.misclosure_mm();
        let perimeter_km = cycle.perimeter_km;
        LoopReport {
            achieved: self.table.classify(misclosure_mm, perimeter_km),
            misclosure_mm,
            perimeter_km,
            cycle,
        }
    }

    /// Detect double runs among the included observations.
    ///
    /// Observations are grouped by unordered point pair; every pair measured
    /// at least twice yields one report. Self-loops are ignored.
    pub fn double_runs(&self, observations: &[Observation]) -> Vec<DoubleRun> {
        let mut groups: BTreeMap<(PointId, PointId), Vec<usize>> = BTreeMap::new();
        for (i, obs) in observations.iter().enumerate() {
            if !obs.included || obs.from == obs.to {
                continue;
            }
            let key = if obs.from <= obs.to {
                (obs.from.clone(), obs.to.clone())
            } else {
                (obs.to.clone(), obs.from.clone())
            };
            groups.entry(key).or_default().push(i);
        }

        groups
            .into_values()
            .filter(|runs| runs.len() >= 2)
            .map(|runs| self.report_double_run(observations, runs))
            .collect()
    }

    fn report_double_run(&self, observations: &[Observation], runs: Vec<usize>) -> DoubleRun {
        let reference = &observations[runs[0]];
        let height_diffs: Vec<f64> = runs
            .iter()
            .map(|&i| observations[i].height_diff_towards(&reference.to))
            .collect();

        let discrepancies_mm: Vec<f64> = height_diffs[1..]
            .iter()
            .map(|dh| (height_diffs[0] - dh) * MM_PER_M)
            .collect();
        let max_discrepancy_mm = discrepancies_mm
            .iter()
            .copied()
            .fold(0.0, |acc: f64, d| if d.abs() > acc.abs() { d } else { acc });

        let max = height_diffs.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let min = height_diffs.iter().copied().fold(f64::INFINITY, f64::min);
        let mean_height_diff = height_diffs.iter().sum::<f64>() / height_diffs.len() as f64;
        let total_distance_km: f64 = runs.iter().map(|&i| observations[i].distance_km()).sum();

        let achieved = self.table.classify(max_discrepancy_mm, total_distance_km);
        if achieved.is_exceeded() {
            tracing::warn!(
                from = %reference.from,
                to = %reference.to,
                discrepancy_mm = max_discrepancy_mm,
                "double run exceeds every tolerance class"
            );
        }

        DoubleRun {
            from: reference.from.clone(),
            to: reference.to.clone(),
            observations: runs,
            spread_mm: (max - min) * MM_PER_M,
            height_diffs,
            discrepancies_mm,
            max_discrepancy_mm,
            mean_height_diff,
            total_distance_km,
            achieved,
        }
    }
}
