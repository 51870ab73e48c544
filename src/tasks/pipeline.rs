//! Daily batch: correction, district exposure, roll-ups and hotspots.
//!
//! Pollutants are processed independently (in parallel with the `parallel`
//! feature). Within one pollutant the steps run in order and each persists
//! its output before the next starts, so a failing hotspot step leaves the
//! exposure records in place. A pollutant with no raster for the day still
//! gets ground-only district records where stations reported; hotspots need
//! a raster and are skipped.

use super::correction::{correct_raster_record, CorrectionService};
use super::remote::{EstimateRequest, RemoteFetcher, SatelliteEstimateSource};
use super::{TaskOutcome, TaskReport};
use crate::config::EngineConfig;
use crate::core::aggregation::{combine_pollutants, rank_districts, rollup_national, rollup_provinces};
use crate::core::aqi::aqi_grid;
use crate::core::exposure::{DataSource, ExposureCalculator, ExposureStats};
use crate::core::fusion::{fuse, GroundSummary};
use crate::core::hotspot::HotspotDetector;
use crate::core::units::standard_unit;
use crate::io::population::PopulationGrid;
use crate::io::raster;
use crate::io::regions::Region;
use crate::records::{DistrictExposure, ExposureScope, PollutantRaster, RasterStatus};
use crate::store::Store;
use crate::types::{AqResult, BoundingBox, Grid, Pollutant, RasterRef};
use chrono::NaiveDate;
use std::collections::HashMap;
use std::sync::Arc;

pub const STEP_FETCH: &str = "fetch";
pub const STEP_CORRECTION: &str = "correction";
pub const STEP_DISTRICTS: &str = "district_exposure";
pub const STEP_PROVINCES: &str = "province_exposure";
pub const STEP_NATIONAL: &str = "national_exposure";
pub const STEP_HOTSPOTS: &str = "hotspots";

/// Report unit of the worst-pollutant roll-up
pub const COMBINED_UNIT: &str = "COMBINED";

pub struct DailyPipeline {
    store: Arc<dyn Store>,
    config: EngineConfig,
    districts: Vec<Region>,
    exposure: ExposureCalculator,
    corrections: CorrectionService,
    hotspots: HotspotDetector,
    remote: Option<(RemoteFetcher, Arc<dyn SatelliteEstimateSource>)>,
}

impl DailyPipeline {
    pub fn new(
        store: Arc<dyn Store>,
        config: EngineConfig,
        districts: Vec<Region>,
        population: Arc<PopulationGrid>,
    ) -> Self {
        let exposure = ExposureCalculator::new(population, config.exposure.clone());
        let hotspots = HotspotDetector::with_params(config.hotspot.clone());
        Self {
            store,
            config,
            districts,
            exposure,
            corrections: CorrectionService::new(),
            hotspots,
            remote: None,
        }
    }

    /// Pipeline reading population from `population` at the configured band
    pub fn from_config(
        store: Arc<dyn Store>,
        config: EngineConfig,
        districts: Vec<Region>,
        population: RasterRef,
    ) -> Self {
        let grid = PopulationGrid::new(population).with_band(config.exposure.population_band);
        Self::new(store, config, districts, Arc::new(grid))
    }

    /// Fetch estimates for pollutants that have no stored raster
    pub fn with_remote_source(mut self, source: Arc<dyn SatelliteEstimateSource>) -> AqResult<Self> {
        let fetcher = RemoteFetcher::new(&self.config.remote)?;
        self.remote = Some((fetcher, source));
        Ok(self)
    }

    pub fn store(&self) -> &dyn Store {
        self.store.as_ref()
    }

    pub fn corrections(&self) -> &CorrectionService {
        &self.corrections
    }

    /// Run every configured pollutant, then the combined scope
    pub fn run(&self, date: NaiveDate) -> TaskReport {
        log::info!(
            "Daily pipeline for {}: {} pollutants, {} districts",
            date,
            self.config.pipeline.pollutants.len(),
            self.districts.len()
        );
        let mut report = TaskReport::new();
        self.fetch_missing(date, &mut report);

        let mut all_districts = Vec::new();
        for (pollutant_report, districts) in self.run_pollutants(date) {
            report.merge(pollutant_report);
            all_districts.extend(districts);
        }

        if self.config.pipeline.combined {
            report.merge(self.run_combined(date, &all_districts));
        }
        report
    }

    #[cfg(feature = "parallel")]
    fn run_pollutants(&self, date: NaiveDate) -> Vec<(TaskReport, Vec<DistrictExposure>)> {
        use rayon::prelude::*;

        let pollutants = &self.config.pipeline.pollutants;
        if self.config.pipeline.parallel {
            pollutants.par_iter().map(|&p| self.run_pollutant(p, date)).collect()
        } else {
            pollutants.iter().map(|&p| self.run_pollutant(p, date)).collect()
        }
    }

    #[cfg(not(feature = "parallel"))]
    fn run_pollutants(&self, date: NaiveDate) -> Vec<(TaskReport, Vec<DistrictExposure>)> {
        self.config
            .pipeline
            .pollutants
            .iter()
            .map(|&p| self.run_pollutant(p, date))
            .collect()
    }

    /// All steps for one pollutant; returns its report and district records
    pub fn run_pollutant(&self, pollutant: Pollutant, date: NaiveDate) -> (TaskReport, Vec<DistrictExposure>) {
        let unit = pollutant.code();
        let mut report = TaskReport::new();

        let raster = match self.store.raster_for(pollutant, date) {
            Ok(Some(raster)) => Some(self.correct(&raster, &mut report)),
            Ok(None) => {
                report.record(unit, STEP_CORRECTION, TaskOutcome::no_data(format!("No {} raster for {}", pollutant, date)));
                None
            }
            Err(e) => {
                report.record(unit, STEP_CORRECTION, TaskOutcome::from_error(&e));
                return (report, Vec::new());
            }
        };
        let source = raster.as_ref().map(|raster| match raster.corrected() {
            Some(corrected) => (corrected.clone(), DataSource::Raster),
            None => (raster.raw.clone(), DataSource::Satellite),
        });

        let satellite = source.as_ref().map(|(source, data_source)| (source, *data_source));
        let districts = match self.district_step(pollutant, date, satellite) {
            Ok(records) if records.is_empty() => {
                report.record(unit, STEP_DISTRICTS, TaskOutcome::no_data("No district has valid pixels or ground readings"));
                Vec::new()
            }
            Ok(records) => {
                report.record(unit, STEP_DISTRICTS, TaskOutcome::success(records.len()));
                if let Some(raster) = raster {
                    self.mark_complete(raster);
                }
                records
            }
            Err(e) => {
                report.record(unit, STEP_DISTRICTS, TaskOutcome::from_error(&e));
                Vec::new()
            }
        };

        if !districts.is_empty() {
            self.rollup_steps(unit, &districts, &mut report);
        }

        let outcome = match &source {
            Some((source, _)) => match self.hotspot_step(pollutant, date, source) {
                Ok(n) => TaskOutcome::success(n),
                Err(e) => TaskOutcome::from_error(&e),
            },
            None => TaskOutcome::no_data(format!("No {} raster for hotspot detection", pollutant)),
        };
        report.record(unit, STEP_HOTSPOTS, outcome);

        (report, districts)
    }

    fn fetch_missing(&self, date: NaiveDate, report: &mut TaskReport) {
        let Some((fetcher, source)) = &self.remote else {
            return;
        };
        let Some(bounds) = self.coverage() else {
            return;
        };

        let mut requests = Vec::new();
        for &pollutant in &self.config.pipeline.pollutants {
            match self.store.raster_for(pollutant, date) {
                Ok(Some(_)) => {}
                Ok(None) => requests.push(EstimateRequest { pollutant, date, bounds }),
                Err(e) => report.record(pollutant.code(), STEP_FETCH, TaskOutcome::from_error(&e)),
            }
        }
        if requests.is_empty() {
            return;
        }

        for (pollutant, result) in fetcher.fetch_all(Arc::clone(source), requests) {
            let stored = result.and_then(|grid| {
                self.store
                    .upsert_raster(PollutantRaster::downloaded(pollutant, date, RasterRef::memory(grid)))
            });
            let outcome = match stored {
                Ok(_) => TaskOutcome::success(1),
                Err(e) => TaskOutcome::from_error(&e),
            };
            report.record(pollutant.code(), STEP_FETCH, outcome);
        }
    }

    /// Union of all district bounding boxes
    fn coverage(&self) -> Option<BoundingBox> {
        self.districts
            .iter()
            .filter_map(|d| d.bounding_box())
            .reduce(|a, b| {
                BoundingBox::new(
                    a.min_lon.min(b.min_lon),
                    a.min_lat.min(b.min_lat),
                    a.max_lon.max(b.max_lon),
                    a.max_lat.max(b.max_lat),
                )
            })
    }

    /// Correct the raster unless already done; the returned record reflects
    /// the stored state afterwards
    fn correct(&self, raster: &PollutantRaster, report: &mut TaskReport) -> PollutantRaster {
        let unit = raster.pollutant.code();
        if raster.status().has_corrected_output() {
            report.record(unit, STEP_CORRECTION, TaskOutcome::success(0));
            return raster.clone();
        }

        let outcome = match correct_raster_record(
            self.store.as_ref(),
            &self.corrections,
            raster.id,
            &self.config.pipeline.output_dir,
        ) {
            Ok(_) => TaskOutcome::success(1),
            Err(e) => TaskOutcome::from_error(&e),
        };
        report.record(unit, STEP_CORRECTION, outcome);

        match self.store.raster(raster.id) {
            Ok(Some(updated)) => updated,
            _ => raster.clone(),
        }
    }

    fn mark_complete(&self, mut raster: PollutantRaster) {
        if raster.status() != RasterStatus::Corrected {
            return;
        }
        let result = raster
            .transition(RasterStatus::Complete)
            .and_then(|()| self.store.upsert_raster(raster));
        if let Err(e) = result {
            log::warn!("Could not mark raster complete: {}", e);
        }
    }

    /// Daily mean ground value per district from active stations
    fn ground_by_district(&self, pollutant: Pollutant, date: NaiveDate) -> AqResult<HashMap<String, GroundSummary>> {
        let unit = standard_unit(pollutant).symbol();
        let mut per_station: HashMap<String, (f64, usize)> = HashMap::new();
        for reading in self.store.readings_between(pollutant, date, date)? {
            if reading.unit == unit && reading.value.is_finite() {
                let entry = per_station.entry(reading.station_id).or_insert((0.0, 0));
                entry.0 += reading.value;
                entry.1 += 1;
            }
        }

        let mut per_district: HashMap<String, Vec<f64>> = HashMap::new();
        for station in self.store.stations(true)? {
            let (Some(district), Some(&(sum, n))) = (&station.district_id, per_station.get(&station.external_id)) else {
                continue;
            };
            per_district.entry(district.clone()).or_default().push(sum / n as f64);
        }

        Ok(per_district
            .into_iter()
            .filter_map(|(district, values)| GroundSummary::from_station_values(&values).map(|g| (district, g)))
            .collect())
    }

    /// District records from the day's raster (if any) fused with ground data
    fn district_step(
        &self,
        pollutant: Pollutant,
        date: NaiveDate,
        raster_source: Option<(&RasterRef, DataSource)>,
    ) -> AqResult<Vec<DistrictExposure>> {
        let ground = self.ground_by_district(pollutant, date)?;
        let mut records = Vec::with_capacity(self.districts.len());

        for region in &self.districts {
            let satellite = match raster_source {
                Some((source, data_source)) => self
                    .exposure
                    .calculate_district_exposure(region, pollutant, date, source)?
                    .map(|mut record| {
                        record.stats.data_source = data_source;
                        record
                    }),
                None => None,
            };
            let satellite_stats: Option<&ExposureStats> = satellite.as_ref().map(|r| &r.stats);
            let Some(stats) = fuse(
                pollutant,
                ground.get(&region.id),
                satellite_stats,
                &self.config.fusion,
                self.exposure.params(),
            ) else {
                continue;
            };

            records.push(DistrictExposure {
                district_id: region.id.clone(),
                province_id: region.parent_id.clone(),
                scope: ExposureScope::Pollutant(pollutant),
                date,
                stats,
                rank: None,
            });
        }

        rank_districts(&mut records);
        self.store.upsert_district_exposures(records.clone())?;
        Ok(records)
    }

    fn rollup_steps(&self, unit: &str, districts: &[DistrictExposure], report: &mut TaskReport) {
        let provinces = rollup_provinces(districts);
        let outcome = match self.store.upsert_province_exposures(provinces.clone()) {
            Ok(()) if provinces.is_empty() => TaskOutcome::no_data("No district belongs to a province"),
            Ok(()) => TaskOutcome::success(provinces.len()),
            Err(e) => {
                report.record(unit, STEP_PROVINCES, TaskOutcome::from_error(&e));
                return;
            }
        };
        report.record(unit, STEP_PROVINCES, outcome);

        let outcome = match rollup_national(&provinces, districts) {
            Some(national) => match self.store.upsert_national_exposure(national) {
                Ok(()) => TaskOutcome::success(1),
                Err(e) => TaskOutcome::from_error(&e),
            },
            None => TaskOutcome::no_data("No province records"),
        };
        report.record(unit, STEP_NATIONAL, outcome);
    }

    /// Detect, link to yesterday and replace the day's hotspots
    fn hotspot_step(&self, pollutant: Pollutant, date: NaiveDate, source: &RasterRef) -> AqResult<usize> {
        let concentration = raster::load(source, 1)?;
        let masked = concentration
            .data
            .mapv(|v| if concentration.is_valid(v) { v } else { f64::NAN });
        let aqi = Grid::new(aqi_grid(pollutant, &masked), concentration.transform, None);

        let population = match self.exposure.aligned_population(&concentration) {
            Ok(grid) => Some(grid),
            Err(e) => {
                log::warn!("{} hotspots on {} without population: {}", pollutant, date, e);
                None
            }
        };

        let mut hotspots = self.hotspots.detect(
            pollutant,
            date,
            &aqi,
            &concentration,
            population.as_ref(),
            &self.districts,
        )?;
        if let Some(yesterday) = date.pred_opt() {
            let previous = self.store.hotspots(pollutant, yesterday)?;
            self.hotspots.apply_persistence(&mut hotspots, &previous);
        }

        let n = hotspots.len();
        self.store.replace_hotspots(pollutant, date, hotspots)?;
        Ok(n)
    }

    fn run_combined(&self, date: NaiveDate, districts: &[DistrictExposure]) -> TaskReport {
        let mut report = TaskReport::new();
        let mut combined = combine_pollutants(districts);
        if combined.is_empty() {
            report.record(COMBINED_UNIT, STEP_DISTRICTS, TaskOutcome::no_data(format!("No district records for {}", date)));
            return report;
        }

        rank_districts(&mut combined);
        match self.store.upsert_district_exposures(combined.clone()) {
            Ok(()) => report.record(COMBINED_UNIT, STEP_DISTRICTS, TaskOutcome::success(combined.len())),
            Err(e) => {
                report.record(COMBINED_UNIT, STEP_DISTRICTS, TaskOutcome::from_error(&e));
                return report;
            }
        }
        self.rollup_steps(COMBINED_UNIT, &combined, &mut report);
        report
    }
}
