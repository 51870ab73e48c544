//! Ground/satellite blending for districts with monitoring stations.

use crate::core::aqi::{calculate_aqi, AqiCategory, CategoryPopulation};
use crate::core::exposure::{exposure_index, DataSource, ExposureParams, ExposureStats};
use crate::types::Pollutant;
use serde::{Deserialize, Serialize};

/// Ground weight per number of contributing stations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionParams {
    pub single_station_weight: f64,
    pub few_stations_weight: f64,
    pub many_stations_weight: f64,
    /// Largest station count that still gets `few_stations_weight`
    pub few_stations_max: usize,
}

impl Default for FusionParams {
    fn default() -> Self {
        Self {
            single_station_weight: 0.6,
            few_stations_weight: 0.7,
            many_stations_weight: 0.8,
            few_stations_max: 4,
        }
    }
}

impl FusionParams {
    pub fn ground_weight(&self, n_stations: usize) -> f64 {
        match n_stations {
            0 => 0.0,
            1 => self.single_station_weight,
            n if n <= self.few_stations_max => self.few_stations_weight,
            _ => self.many_stations_weight,
        }
    }
}

/// Daily ground concentration for one district
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GroundSummary {
    pub mean: f64,
    pub n_stations: usize,
}

impl GroundSummary {
    /// Mean of per-station daily values; `None` when no station has a finite value
    pub fn from_station_values(values: &[f64]) -> Option<Self> {
        let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
        if finite.is_empty() {
            return None;
        }
        Some(Self {
            mean: finite.iter().sum::<f64>() / finite.len() as f64,
            n_stations: finite.len(),
        })
    }
}

/// Blend ground and satellite estimates for one district
///
/// The AQI and category breakdown are recomputed from the fused value; the
/// whole district population falls in the fused value's band. With only one
/// source available that source is returned unchanged (ground-only stats
/// carry no population).
pub fn fuse(
    pollutant: Pollutant,
    ground: Option<&GroundSummary>,
    satellite: Option<&ExposureStats>,
    fusion: &FusionParams,
    params: &ExposureParams,
) -> Option<ExposureStats> {
    match (ground, satellite) {
        (None, None) => None,
        (None, Some(sat)) => Some(sat.clone()),
        (Some(g), None) => Some(ExposureStats::from_value(
            pollutant,
            g.mean,
            0.0,
            0.0,
            DataSource::Ground,
            params,
        )),
        (Some(g), Some(sat)) => {
            let w = fusion.ground_weight(g.n_stations);
            let fused = w * g.mean + (1.0 - w) * sat.mean_concentration;
            let aqi = calculate_aqi(pollutant, fused);
            let min_c = sat.min_concentration.min(fused);
            let max_c = sat.max_concentration.max(fused);

            log::debug!(
                "Fused {}: ground={:.2} ({} stations, w={:.1}), satellite={:.2} -> {:.2}",
                pollutant,
                g.mean,
                g.n_stations,
                w,
                sat.mean_concentration,
                fused
            );

            Some(ExposureStats {
                pollutant,
                total_population: sat.total_population,
                mean_concentration: fused,
                min_concentration: min_c,
                max_concentration: max_c,
                mean_aqi: aqi,
                max_aqi: calculate_aqi(pollutant, max_c).max(aqi),
                exposure_index: exposure_index(aqi, sat.population_density(), params),
                categories: CategoryPopulation::single(AqiCategory::from_aqi(aqi), sat.total_population),
                valid_pixels: sat.valid_pixels,
                area_km2: sat.area_km2,
                data_source: DataSource::Fused,
            })
        }
    }
}
