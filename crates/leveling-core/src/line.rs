//! Leveling lines
//!
//! A line is the ordered run of instrument setups between two points. The
//! line adjuster distributes its misclosure over the setups; the network
//! adjusters see a line only through its summary [`Observation`].

use crate::{AdjustError, AdjustResult, Observation, PointId, M_PER_KM};

/// One instrument setup: backsight on `from`, foresight on `to`
#[derive(Clone, Debug, PartialEq)]
pub struct Setup {
    pub from: PointId,
    pub to: PointId,
    /// height(to) - height(from), meters
    pub height_diff: f64,
    /// Horizontal length attributed to this setup, meters
    pub distance: f64,
    pub included: bool,
}

impl Setup {
    pub fn new(
        from: impl Into<PointId>,
        to: impl Into<PointId>,
        height_diff: f64,
        distance: f64,
    ) -> Self {
        Setup {
            from: from.into(),
            to: to.into(),
            height_diff,
            distance,
            included: true,
        }
    }

    /// Build from rod readings and sight distances.
    ///
    /// dH = backsight - foresight; the setup length is the mean of the two
    /// sight distances, as the instruments report it.
    pub fn from_readings(
        from: impl Into<PointId>,
        to: impl Into<PointId>,
        backsight: f64,
        foresight: f64,
        distance_back: f64,
        distance_fore: f64,
    ) -> Self {
        Self::new(
            from,
            to,
            backsight - foresight,
            (distance_back + distance_fore) / 2.0,
        )
    }

    pub fn excluded(mut self) -> Self {
        self.included = false;
        self
    }

    fn reversed(&self) -> Self {
        Setup {
            from: self.to.clone(),
            to: self.from.clone(),
            height_diff: -self.height_diff,
            distance: self.distance,
            included: self.included,
        }
    }
}

/// A leveling line from `start` to `end`
#[derive(Clone, Debug, PartialEq)]
pub struct LevelingLine {
    pub start: PointId,
    pub end: PointId,
    pub setups: Vec<Setup>,
    pub source: String,
}

impl LevelingLine {
    pub fn new(start: impl Into<PointId>, end: impl Into<PointId>, setups: Vec<Setup>) -> Self {
        LevelingLine {
            start: start.into(),
            end: end.into(),
            setups,
            source: String::new(),
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    /// Setups accepted for computation
    pub fn included_setups(&self) -> impl Iterator<Item = &Setup> {
        self.setups.iter().filter(|s| s.included)
    }

    /// Sum of included height differences, meters
    pub fn total_height_diff(&self) -> f64 {
        self.included_setups().map(|s| s.height_diff).sum()
    }

    /// Sum of included setup lengths, meters
    pub fn total_distance(&self) -> f64 {
        self.included_setups().map(|s| s.distance).sum()
    }

    pub fn distance_km(&self) -> f64 {
        self.total_distance() / M_PER_KM
    }

    /// Points between the start and the end, in run order
    pub fn intermediate_points(&self) -> Vec<PointId> {
        let mut points: Vec<PointId> = self.setups.iter().map(|s| s.to.clone()).collect();
        if points.last() == Some(&self.end) {
            points.pop();
        }
        points
    }

    /// The same run measured the other way: endpoints swapped, setups in
    /// reverse order with negated height differences.
    pub fn reversed(&self) -> Self {
        LevelingLine {
            start: self.end.clone(),
            end: self.start.clone(),
            setups: self.setups.iter().rev().map(Setup::reversed).collect(),
            source: self.source.clone(),
        }
    }

    /// Line summary as a network observation
    pub fn to_observation(&self) -> Observation {
        Observation::new(
            self.start.clone(),
            self.end.clone(),
            self.total_height_diff(),
            self.total_distance(),
        )
        .with_setups(self.included_setups().count() as u32)
        .with_source(self.source.clone())
    }

    /// Merge consecutive segments into one line.
    ///
    /// Segments are taken in the given order; any segment whose direction
    /// opposes the chain is reversed before its setups are appended.
    pub fn chain(segments: &[LevelingLine]) -> AdjustResult<LevelingLine> {
        let (first, rest) = segments.split_first().ok_or(AdjustError::EmptyLine)?;

        let mut merged = match rest.first() {
            Some(next) if first.start == next.start || first.start == next.end => first.reversed(),
            _ => first.clone(),
        };

        for segment in rest {
            let oriented = if segment.start == merged.end {
                segment.clone()
            } else if segment.end == merged.end {
                segment.reversed()
            } else {
                return Err(AdjustError::DisconnectedChain {
                    at: merged.end.clone(),
                });
            };

            merged.end = oriented.end;
            merged.setups.extend(oriented.setups);
        }

        merged.source = format!("MERGED_{}-{}", merged.start, merged.end);
        Ok(merged)
    }
}
