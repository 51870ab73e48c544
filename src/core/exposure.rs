//! Population-weighted exposure over a region.

use crate::core::aqi::{calculate_aqi, AqiCategory, CategoryPopulation};
use crate::core::resample::resample_population;
use crate::io::population::PopulationGrid;
use crate::io::raster;
use crate::io::regions::{clip_to_geometry, Region};
use crate::records::{DistrictExposure, ExposureScope};
use crate::types::{AqResult, Grid, Pollutant, RasterRef};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Where a concentration estimate came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSource {
    Satellite,
    Ground,
    Fused,
    Raster,
}

/// Exposure-index parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExposureParams {
    /// Population density (people/km²) at which the index equals the AQI
    pub reference_density: f64,
    pub aqi_weight: f64,
    pub density_weight: f64,
    pub population_band: usize,
}

impl Default for ExposureParams {
    fn default() -> Self {
        Self {
            reference_density: 1000.0,
            aqi_weight: 0.5,
            density_weight: 0.5,
            population_band: 1,
        }
    }
}

/// Scalar combining AQI severity with population density, in [0, 500]
pub fn exposure_index(mean_aqi: f64, population_density: f64, params: &ExposureParams) -> f64 {
    if !mean_aqi.is_finite() {
        return 0.0;
    }
    let density_ratio = if params.reference_density > 0.0 {
        population_density.max(0.0) / params.reference_density
    } else {
        0.0
    };
    (mean_aqi * (params.aqi_weight + params.density_weight * density_ratio)).clamp(0.0, 500.0)
}

/// Exposure summary of one region for one concentration field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExposureStats {
    /// Pollutant the values refer to; for combined records the dominant one
    pub pollutant: Pollutant,
    pub total_population: f64,
    pub mean_concentration: f64,
    pub min_concentration: f64,
    pub max_concentration: f64,
    pub mean_aqi: f64,
    pub max_aqi: f64,
    pub exposure_index: f64,
    pub categories: CategoryPopulation,
    pub valid_pixels: usize,
    pub area_km2: f64,
    pub data_source: DataSource,
}

impl ExposureStats {
    pub fn population_density(&self) -> f64 {
        if self.area_km2 > 0.0 {
            self.total_population / self.area_km2
        } else {
            0.0
        }
    }

    pub fn category(&self) -> AqiCategory {
        AqiCategory::from_aqi(self.mean_aqi)
    }

    /// Stats for a region described by a single concentration value
    pub fn from_value(
        pollutant: Pollutant,
        concentration: f64,
        population: f64,
        area_km2: f64,
        data_source: DataSource,
        params: &ExposureParams,
    ) -> Self {
        let aqi = calculate_aqi(pollutant, concentration);
        let population = population.max(0.0);
        let density = if area_km2 > 0.0 { population / area_km2 } else { 0.0 };
        Self {
            pollutant,
            total_population: population,
            mean_concentration: concentration,
            min_concentration: concentration,
            max_concentration: concentration,
            mean_aqi: aqi,
            max_aqi: aqi,
            exposure_index: exposure_index(aqi, density, params),
            categories: CategoryPopulation::single(AqiCategory::from_aqi(aqi), population),
            valid_pixels: 0,
            area_km2,
            data_source,
        }
    }
}

/// Combine co-registered concentration and population grids
///
/// Only pixels valid in both inputs contribute. `None` when there are none.
pub fn exposure_from_grids(
    concentration: &Grid,
    population: &Grid,
    pollutant: Pollutant,
    data_source: DataSource,
    params: &ExposureParams,
) -> Option<ExposureStats> {
    if concentration.shape() != population.shape() {
        log::warn!(
            "Concentration {:?} and population {:?} grids are not co-registered",
            concentration.shape(),
            population.shape()
        );
        return None;
    }

    let mut categories = CategoryPopulation::default();
    let mut count = 0usize;
    let mut area_km2 = 0.0;
    let (mut sum_c, mut sum_aqi) = (0.0, 0.0);
    let (mut wsum_c, mut wsum_aqi) = (0.0, 0.0);
    let (mut min_c, mut max_c, mut max_aqi) = (f64::INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY);

    for ((row, col), &c) in concentration.data.indexed_iter() {
        let pop = population.data[[row, col]];
        if !concentration.is_valid(c) || !population.is_valid(pop) || !pop.is_finite() {
            continue;
        }
        let pop = pop.max(0.0);
        let aqi = calculate_aqi(pollutant, c);

        count += 1;
        area_km2 += concentration.pixel_area_km2(row);
        sum_c += c;
        sum_aqi += aqi;
        wsum_c += pop * c;
        wsum_aqi += pop * aqi;
        min_c = min_c.min(c);
        max_c = max_c.max(c);
        max_aqi = max_aqi.max(aqi);
        categories.add(AqiCategory::from_aqi(aqi), pop);
    }

    if count == 0 {
        return None;
    }

    // Every valid pixel lands in exactly one band
    let total_population = categories.total();
    let (mean_concentration, mean_aqi) = if total_population > 0.0 {
        (wsum_c / total_population, wsum_aqi / total_population)
    } else {
        (sum_c / count as f64, sum_aqi / count as f64)
    };
    let density = if area_km2 > 0.0 { total_population / area_km2 } else { 0.0 };

    Some(ExposureStats {
        pollutant,
        total_population,
        mean_concentration,
        min_concentration: min_c,
        max_concentration: max_c,
        mean_aqi,
        max_aqi,
        exposure_index: exposure_index(mean_aqi, density, params),
        categories,
        valid_pixels: count,
        area_km2,
        data_source,
    })
}

/// Exposure calculation against a shared population grid
pub struct ExposureCalculator {
    params: ExposureParams,
    population: Arc<PopulationGrid>,
}

impl ExposureCalculator {
    pub fn new(population: Arc<PopulationGrid>, params: ExposureParams) -> Self {
        Self { params, population }
    }

    pub fn params(&self) -> &ExposureParams {
        &self.params
    }

    pub fn population(&self) -> &PopulationGrid {
        &self.population
    }

    /// Population resampled onto `target`'s grid
    pub fn aligned_population(&self, target: &Grid) -> AqResult<Grid> {
        let population = self.population.read_region(&target.bounds())?;
        if population.shape() == target.shape() && population.transform == target.transform {
            return Ok(population);
        }
        resample_population(&population, target)
    }

    /// Exposure of `region` to the concentration field in `source`
    ///
    /// `Ok(None)` when the region has no pixel valid in both the
    /// concentration and population grids.
    pub fn calculate_district_exposure(
        &self,
        region: &Region,
        pollutant: Pollutant,
        date: NaiveDate,
        source: &RasterRef,
    ) -> AqResult<Option<DistrictExposure>> {
        let Some(bounds) = region.bounding_box() else {
            return Ok(None);
        };

        let concentration = raster::load_window(source, &bounds, 1)?;
        if concentration.is_empty() {
            log::debug!("{}: no {} coverage on {}", region.id, pollutant, date);
            return Ok(None);
        }
        let concentration = clip_to_geometry(&concentration, &region.geometry);

        let population = self.population.read_region(&bounds)?;
        let population = clip_to_geometry(&population, &region.geometry);
        let population = if population.shape() != concentration.shape()
            || population.transform != concentration.transform
        {
            if population.is_empty() {
                log::debug!("{}: population grid does not cover region", region.id);
                return Ok(None);
            }
            resample_population(&population, &concentration)?
        } else {
            population
        };

        let stats = exposure_from_grids(
            &concentration,
            &population,
            pollutant,
            DataSource::Raster,
            &self.params,
        );

        Ok(stats.map(|stats| {
            log::debug!(
                "{} {} {}: pop={:.0}, mean AQI={:.1}, index={:.1}",
                region.id,
                pollutant,
                date,
                stats.total_population,
                stats.mean_aqi,
                stats.exposure_index
            );
            DistrictExposure {
                district_id: region.id.clone(),
                province_id: region.parent_id.clone(),
                scope: ExposureScope::Pollutant(pollutant),
                date,
                stats,
                rank: None,
            }
        }))
    }
}
