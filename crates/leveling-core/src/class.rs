//! Tolerance class definitions
//!
//! Leveling accuracy is classified against a table of classes, each with a
//! coefficient `k` in mm/√km. The allowed misclosure of a line or loop of
//! length `L` km is `k·√L` mm. Classes are ordered tightest first:
//! - Survey of Israel directive (2021): H1..H6
//! - Legacy first..fourth order leveling

use std::fmt;

use crate::{AdjustError, AdjustResult};

/// A named tolerance class
#[derive(Clone, Debug, PartialEq)]
pub struct ToleranceClass {
    pub name: String,
    /// Coefficient k, mm/√km
    pub coefficient: f64,
}

impl ToleranceClass {
    pub fn new(name: impl Into<String>, coefficient: f64) -> Self {
        ToleranceClass {
            name: name.into(),
            coefficient,
        }
    }

    /// Allowed misclosure in mm for a run of `distance_km`
    #[inline]
    pub fn tolerance_mm(&self, distance_km: f64) -> f64 {
        self.coefficient * distance_km.sqrt()
    }
}

/// Achieved precision of a misclosure
#[derive(Clone, Debug, PartialEq)]
pub enum Classification {
    /// Tightest class whose tolerance covers the misclosure
    Class(String),
    /// No class in the table covers it
    Exceeded,
}

impl Classification {
    pub fn is_exceeded(&self) -> bool {
        matches!(self, Classification::Exceeded)
    }

    pub fn name(&self) -> &str {
        match self {
            Classification::Class(name) => name,
            Classification::Exceeded => "Exceeded",
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Ordered table of tolerance classes, tightest first.
///
/// Passed explicitly to every component that classifies misclosures.
#[derive(Clone, Debug, PartialEq)]
pub struct ToleranceTable {
    classes: Vec<ToleranceClass>,
}

impl Default for ToleranceTable {
    fn default() -> Self {
        Self::survey_of_israel()
    }
}

impl ToleranceTable {
    /// Build a table; classes are sorted by coefficient so the tightest comes first
    pub fn new(mut classes: Vec<ToleranceClass>) -> Self {
        classes.sort_by(|a, b| a.coefficient.total_cmp(&b.coefficient));
        ToleranceTable { classes }
    }

    /// Survey of Israel directive G2 (2021), classes H1-H6
    pub fn survey_of_israel() -> Self {
        Self::new(vec![
            ToleranceClass::new("H1", 3.0),
            ToleranceClass::new("H2", 5.0),
            ToleranceClass::new("H3", 10.0),
            ToleranceClass::new("H4", 20.0),
            ToleranceClass::new("H5", 30.0),
            ToleranceClass::new("H6", 60.0),
        ])
    }

    /// First to fourth order leveling
    pub fn legacy_orders() -> Self {
        Self::new(vec![
            ToleranceClass::new("1", 1.0),
            ToleranceClass::new("2", 2.0),
            ToleranceClass::new("3", 3.0),
            ToleranceClass::new("4", 6.0),
        ])
    }

    /// Replace (or add) one class coefficient
    pub fn with_class(mut self, name: impl Into<String>, coefficient: f64) -> Self {
        let name = name.into();
        self.classes.retain(|c| c.name != name);
        self.classes.push(ToleranceClass::new(name, coefficient));
        Self::new(self.classes)
    }

    pub fn classes(&self) -> &[ToleranceClass] {
        &self.classes
    }

    pub fn get(&self, name: &str) -> Option<&ToleranceClass> {
        self.classes.iter().find(|c| c.name == name)
    }

    /// Coefficient of a named class
    pub fn coefficient(&self, name: &str) -> AdjustResult<f64> {
        self.get(name)
            .map(|c| c.coefficient)
            .ok_or_else(|| AdjustError::UnknownToleranceClass(name.to_string()))
    }

    /// Allowed misclosure (mm) for a named class over `distance_km`
    pub fn tolerance_mm(&self, name: &str, distance_km: f64) -> AdjustResult<f64> {
        Ok(self.coefficient(name)? * distance_km.sqrt())
    }

    /// Tightest class with `k·√distance_km >= |misclosure_mm|`
    pub fn classify(&self, misclosure_mm: f64, distance_km: f64) -> Classification {
        let misclosure_mm = misclosure_mm.abs();
        self.classes
            .iter()
            .find(|c| c.tolerance_mm(distance_km) >= misclosure_mm)
            .map(|c| Classification::Class(c.name.clone()))
            .unwrap_or(Classification::Exceeded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_tolerance_formula() {
        let h1 = ToleranceClass::new("H1", 3.0);
        assert!((h1.tolerance_mm(4.0) - 6.0).abs() < 1e-12);
    }

    #[test]
    fn test_classify_tightest_first() {
        let table = ToleranceTable::survey_of_israel();

        // 4 km: H1 allows 6 mm, H2 10 mm, H3 20 mm
        assert_eq!(table.classify(5.0, 4.0), Classification::Class("H1".into()));
        assert_eq!(table.classify(-8.0, 4.0), Classification::Class("H2".into()));
        assert_eq!(table.classify(15.0, 4.0), Classification::Class("H3".into()));
        assert_eq!(table.classify(500.0, 4.0), Classification::Exceeded);
    }

    #[test]
    fn test_boundary_is_inclusive() {
        let table = ToleranceTable::survey_of_israel();
        assert_eq!(table.classify(6.0, 4.0), Classification::Class("H1".into()));
    }

    #[test]
    fn test_unknown_class() {
        let table = ToleranceTable::legacy_orders();
        assert!((table.tolerance_mm("3", 1.0).unwrap() - 3.0).abs() < 1e-12);
        assert!(matches!(
            table.coefficient("H9"),
            Err(AdjustError::UnknownToleranceClass(_))
        ));
    }

    #[test]
    fn test_with_class_keeps_order() {
        let table = ToleranceTable::survey_of_israel().with_class("H0", 1.0);
        assert_eq!(table.classes()[0].name, "H0");
        assert_eq!(table.classes().len(), 7);
    }

    proptest! {
        #[test]
        fn prop_classification_is_tightest(misclosure in -200.0f64..200.0, km in 0.01f64..50.0) {
            let table = ToleranceTable::survey_of_israel();
            match table.classify(misclosure, km) {
                Classification::Class(name) => {
                    let idx = table.classes().iter().position(|c| c.name == name).unwrap();
                    prop_assert!(table.classes()[idx].tolerance_mm(km) >= misclosure.abs());
                    for tighter in &table.classes()[..idx] {
                        prop_assert!(tighter.tolerance_mm(km) < misclosure.abs());
                    }
                }
                Classification::Exceeded => {
                    for class in table.classes() {
                        prop_assert!(class.tolerance_mm(km) < misclosure.abs());
                    }
                }
            }
        }
    }
}
