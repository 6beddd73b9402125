//! Observations, points and the fixed-height datum

use std::collections::BTreeMap;

use crate::{PointId, M_PER_KM};

/// Role of a point in a network adjustment
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum PointRole {
    /// Benchmark with a trusted height (meters)
    Fixed { height: f64 },
    /// Height to be determined
    Unknown,
}

/// A leveling point
#[derive(Clone, Debug, PartialEq)]
pub struct Point {
    pub id: PointId,
    pub role: PointRole,
}

impl Point {
    pub fn fixed(id: impl Into<PointId>, height: f64) -> Self {
        Point {
            id: id.into(),
            role: PointRole::Fixed { height },
        }
    }

    pub fn unknown(id: impl Into<PointId>) -> Self {
        Point {
            id: id.into(),
            role: PointRole::Unknown,
        }
    }

    /// Known height, if this is a benchmark
    pub fn height(&self) -> Option<f64> {
        match self.role {
            PointRole::Fixed { height } => Some(height),
            PointRole::Unknown => None,
        }
    }

    pub fn is_fixed(&self) -> bool {
        matches!(self.role, PointRole::Fixed { .. })
    }
}

/// A measured height difference between two points.
///
/// `height_diff` is `height(to) - height(from)` as measured, in meters.
/// `distance` is the horizontal length of the run in meters and drives the
/// weight `1 / distance_km`.
#[derive(Clone, Debug, PartialEq)]
pub struct Observation {
    pub from: PointId,
    pub to: PointId,
    pub height_diff: f64,
    pub distance: f64,
    /// Number of instrument setups that produced this observation
    pub setups: u32,
    /// Where the observation came from (field file name, line name)
    pub source: String,
    /// Accepted for adjustment
    pub included: bool,
}

impl Observation {
    pub fn new(
        from: impl Into<PointId>,
        to: impl Into<PointId>,
        height_diff: f64,
        distance: f64,
    ) -> Self {
        Observation {
            from: from.into(),
            to: to.into(),
            height_diff,
            distance,
            setups: 1,
            source: String::new(),
            included: true,
        }
    }

    pub fn with_setups(mut self, setups: u32) -> Self {
        self.setups = setups;
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    /// Mark as rejected; excluded observations never reach the graph
    pub fn excluded(mut self) -> Self {
        self.included = false;
        self
    }

    #[inline]
    pub fn distance_km(&self) -> f64 {
        self.distance / M_PER_KM
    }

    /// Least-squares weight (1 / km)
    #[inline]
    pub fn weight(&self) -> f64 {
        1.0 / self.distance_km()
    }

    /// Does this observation connect the two points (in either direction)?
    pub fn connects(&self, a: &PointId, b: &PointId) -> bool {
        (&self.from == a && &self.to == b) || (&self.from == b && &self.to == a)
    }

    /// Height difference expressed in the direction `from -> to` given
    pub fn height_diff_towards(&self, to: &PointId) -> f64 {
        if &self.to == to {
            self.height_diff
        } else {
            -self.height_diff
        }
    }
}

/// Benchmarks with known heights, keyed by point id
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FixedPoints {
    heights: BTreeMap<PointId, f64>,
}

impl FixedPoints {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, id: impl Into<PointId>, height: f64) -> Self {
        self.insert(id, height);
        self
    }

    pub fn insert(&mut self, id: impl Into<PointId>, height: f64) {
        self.heights.insert(id.into(), height);
    }

    pub fn get(&self, id: &str) -> Option<f64> {
        self.heights.get(id).copied()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.heights.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.heights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heights.is_empty()
    }

    /// Iterate in point-id order
    pub fn iter(&self) -> impl Iterator<Item = (&PointId, f64)> {
        self.heights.iter().map(|(id, h)| (id, *h))
    }

    pub fn points(&self) -> Vec<Point> {
        self.iter().map(|(id, h)| Point::fixed(id.clone(), h)).collect()
    }
}

impl<P: Into<PointId>> FromIterator<(P, f64)> for FixedPoints {
    fn from_iter<I: IntoIterator<Item = (P, f64)>>(iter: I) -> Self {
        let mut fixed = FixedPoints::new();
        for (id, h) in iter {
            fixed.insert(id, h);
        }
        fixed
    }
}
