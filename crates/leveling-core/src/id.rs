//! Point identity
//!
//! Field instruments label points with free-form text: benchmarks usually
//! carry letters ("BM12", "KMA58"), turning points are plain numbers.

use std::borrow::Borrow;
use std::fmt;

/// Identifier of a leveling point (benchmark or turning point)
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct PointId(String);

impl PointId {
    #[inline]
    pub fn new(id: impl Into<String>) -> Self {
        PointId(id.into())
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Turning points are purely numeric; anything else is treated as a benchmark name
    pub fn is_turning_point(&self) -> bool {
        let id = self.0.trim();
        !id.is_empty() && id.chars().all(|c| c.is_ascii_digit())
    }
}

impl fmt::Debug for PointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Point({})", self.0)
    }
}

impl fmt::Display for PointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PointId {
    fn from(id: &str) -> Self {
        PointId(id.to_string())
    }
}

impl From<String> for PointId {
    fn from(id: String) -> Self {
        PointId(id)
    }
}

impl Borrow<str> for PointId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for PointId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
