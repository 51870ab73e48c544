//! EPA-style piecewise-linear Air Quality Index.
//!
//! Breakpoints are expressed in each pollutant's standard unit
//! (see [`crate::core::units::standard_unit`]). PM2.5 follows the 2024 EPA
//! revision.

use crate::types::Pollutant;
use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// Highest reportable index
pub const AQI_MAX: f64 = 500.0;

/// (BPlo, BPhi, Ilo, Ihi)
type Breakpoint = (f64, f64, f64, f64);

const PM25_BREAKPOINTS: &[Breakpoint] = &[
    (0.0, 9.0, 0.0, 50.0),
    (9.1, 35.4, 51.0, 100.0),
    (35.5, 55.4, 101.0, 150.0),
    (55.5, 125.4, 151.0, 200.0),
    (125.5, 225.4, 201.0, 300.0),
    (225.5, 325.4, 301.0, 500.0),
];

const PM10_BREAKPOINTS: &[Breakpoint] = &[
    (0.0, 54.0, 0.0, 50.0),
    (55.0, 154.0, 51.0, 100.0),
    (155.0, 254.0, 101.0, 150.0),
    (255.0, 354.0, 151.0, 200.0),
    (355.0, 424.0, 201.0, 300.0),
    (425.0, 604.0, 301.0, 500.0),
];

const NO2_BREAKPOINTS: &[Breakpoint] = &[
    (0.0, 53.0, 0.0, 50.0),
    (54.0, 100.0, 51.0, 100.0),
    (101.0, 360.0, 101.0, 150.0),
    (361.0, 649.0, 151.0, 200.0),
    (650.0, 1249.0, 201.0, 300.0),
    (1250.0, 2049.0, 301.0, 500.0),
];

const SO2_BREAKPOINTS: &[Breakpoint] = &[
    (0.0, 35.0, 0.0, 50.0),
    (36.0, 75.0, 51.0, 100.0),
    (76.0, 185.0, 101.0, 150.0),
    (186.0, 304.0, 151.0, 200.0),
    (305.0, 604.0, 201.0, 300.0),
    (605.0, 1004.0, 301.0, 500.0),
];

const CO_BREAKPOINTS: &[Breakpoint] = &[
    (0.0, 4.4, 0.0, 50.0),
    (4.5, 9.4, 51.0, 100.0),
    (9.5, 12.4, 101.0, 150.0),
    (12.5, 15.4, 151.0, 200.0),
    (15.5, 30.4, 201.0, 300.0),
    (30.5, 50.4, 301.0, 500.0),
];

// 8-hour ozone up to 200 ppb, 1-hour ozone bracket above
const O3_BREAKPOINTS: &[Breakpoint] = &[
    (0.0, 54.0, 0.0, 50.0),
    (55.0, 70.0, 51.0, 100.0),
    (71.0, 85.0, 101.0, 150.0),
    (86.0, 105.0, 151.0, 200.0),
    (106.0, 200.0, 201.0, 300.0),
    (201.0, 604.0, 301.0, 500.0),
];

pub fn breakpoints(pollutant: Pollutant) -> &'static [Breakpoint] {
    match pollutant {
        Pollutant::PM25 => PM25_BREAKPOINTS,
        Pollutant::PM10 => PM10_BREAKPOINTS,
        Pollutant::NO2 => NO2_BREAKPOINTS,
        Pollutant::SO2 => SO2_BREAKPOINTS,
        Pollutant::CO => CO_BREAKPOINTS,
        Pollutant::O3 => O3_BREAKPOINTS,
    }
}

/// AQI for a concentration in the pollutant's standard unit
///
/// NaN in, NaN out. Values above the top bracket clamp to 500. Values in
/// the rounding gap between two brackets never drop below the lower
/// bracket's index, which keeps the mapping monotonic.
pub fn calculate_aqi(pollutant: Pollutant, concentration: f64) -> f64 {
    if concentration.is_nan() {
        return f64::NAN;
    }
    if concentration <= 0.0 {
        return 0.0;
    }

    let table = breakpoints(pollutant);
    let mut floor = 0.0;
    for &(bp_lo, bp_hi, i_lo, i_hi) in table {
        if concentration <= bp_hi {
            let aqi = (i_hi - i_lo) / (bp_hi - bp_lo) * (concentration - bp_lo) + i_lo;
            return aqi.max(floor).min(AQI_MAX);
        }
        floor = i_hi;
    }
    AQI_MAX
}

/// Per-pixel AQI; NaN stays NaN
pub fn aqi_grid(pollutant: Pollutant, concentration: &Array2<f64>) -> Array2<f64> {
    concentration.mapv(|c| calculate_aqi(pollutant, c))
}

/// The six reporting bands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AqiCategory {
    Good,
    Moderate,
    UnhealthySensitive,
    Unhealthy,
    VeryUnhealthy,
    Hazardous,
}

impl AqiCategory {
    pub const ALL: [AqiCategory; 6] = [
        AqiCategory::Good,
        AqiCategory::Moderate,
        AqiCategory::UnhealthySensitive,
        AqiCategory::Unhealthy,
        AqiCategory::VeryUnhealthy,
        AqiCategory::Hazardous,
    ];

    /// Band containing `aqi`; every finite value maps to exactly one band
    pub fn from_aqi(aqi: f64) -> AqiCategory {
        if aqi <= 50.0 {
            AqiCategory::Good
        } else if aqi <= 100.0 {
            AqiCategory::Moderate
        } else if aqi <= 150.0 {
            AqiCategory::UnhealthySensitive
        } else if aqi <= 200.0 {
            AqiCategory::Unhealthy
        } else if aqi <= 300.0 {
            AqiCategory::VeryUnhealthy
        } else {
            AqiCategory::Hazardous
        }
    }

    pub fn index(&self) -> usize {
        *self as usize
    }

    pub fn label(&self) -> &'static str {
        match self {
            AqiCategory::Good => "Good",
            AqiCategory::Moderate => "Moderate",
            AqiCategory::UnhealthySensitive => "Unhealthy for Sensitive Groups",
            AqiCategory::Unhealthy => "Unhealthy",
            AqiCategory::VeryUnhealthy => "Very Unhealthy",
            AqiCategory::Hazardous => "Hazardous",
        }
    }
}

/// Population in each AQI band
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CategoryPopulation {
    pub good: f64,
    pub moderate: f64,
    pub unhealthy_sensitive: f64,
    pub unhealthy: f64,
    pub very_unhealthy: f64,
    pub hazardous: f64,
}

impl CategoryPopulation {
    pub fn add(&mut self, category: AqiCategory, population: f64) {
        match category {
            AqiCategory::Good => self.good += population,
            AqiCategory::Moderate => self.moderate += population,
            AqiCategory::UnhealthySensitive => self.unhealthy_sensitive += population,
            AqiCategory::Unhealthy => self.unhealthy += population,
            AqiCategory::VeryUnhealthy => self.very_unhealthy += population,
            AqiCategory::Hazardous => self.hazardous += population,
        }
    }

    pub fn merge(&mut self, other: &CategoryPopulation) {
        self.good += other.good;
        self.moderate += other.moderate;
        self.unhealthy_sensitive += other.unhealthy_sensitive;
        self.unhealthy += other.unhealthy;
        self.very_unhealthy += other.very_unhealthy;
        self.hazardous += other.hazardous;
    }

    pub fn total(&self) -> f64 {
        self.good
            + self.moderate
            + self.unhealthy_sensitive
            + self.unhealthy
            + self.very_unhealthy
            + self.hazardous
    }

    /// Everything in a single band
    pub fn single(category: AqiCategory, population: f64) -> Self {
        let mut counts = Self::default();
        counts.add(category, population);
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pm25_breakpoints() {
        assert_eq!(calculate_aqi(Pollutant::PM25, 0.0), 0.0);
        assert!((calculate_aqi(Pollutant::PM25, 9.0) - 50.0).abs() < 1e-9);
        assert!((calculate_aqi(Pollutant::PM25, 35.4) - 100.0).abs() < 1e-9);
        assert!((calculate_aqi(Pollutant::PM25, 55.5) - 151.0).abs() < 1e-9);
    }

    #[test]
    fn test_clamps_above_top_bracket() {
        assert_eq!(calculate_aqi(Pollutant::PM25, 1000.0), AQI_MAX);
        assert_eq!(calculate_aqi(Pollutant::CO, 80.0), AQI_MAX);
    }

    #[test]
    fn test_gap_values_stay_monotonic() {
        let below = calculate_aqi(Pollutant::PM25, 9.0);
        let gap = calculate_aqi(Pollutant::PM25, 9.05);
        let above = calculate_aqi(Pollutant::PM25, 9.1);
        assert!(below <= gap && gap <= above);
    }

    #[test]
    fn test_nan_propagates() {
        assert!(calculate_aqi(Pollutant::NO2, f64::NAN).is_nan());
    }

    #[test]
    fn test_category_boundaries() {
        assert_eq!(AqiCategory::from_aqi(50.0), AqiCategory::Good);
        assert_eq!(AqiCategory::from_aqi(50.5), AqiCategory::Moderate);
        assert_eq!(AqiCategory::from_aqi(150.0), AqiCategory::UnhealthySensitive);
        assert_eq!(AqiCategory::from_aqi(301.0), AqiCategory::Hazardous);
    }

    #[test]
    fn test_category_population_total() {
        let mut counts = CategoryPopulation::default();
        counts.add(AqiCategory::Good, 10.0);
        counts.add(AqiCategory::Hazardous, 5.0);
        counts.merge(&CategoryPopulation::single(AqiCategory::Unhealthy, 2.5));
        assert_eq!(counts.total(), 17.5);
    }
}
