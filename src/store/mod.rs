//! Persistence boundary for pipeline records.
//!
//! Every write is an upsert on the record's natural key, so re-running a task
//! for the same key overwrites rather than duplicates.

pub mod memory;

pub use memory::InMemoryStore;

use crate::records::{
    CalibrationPoint, CorrectionModel, CorrectionRun, DistrictExposure, ExposureScope, GroundReading,
    GroundStation, Hotspot, NationalExposure, PollutantRaster, ProvinceExposure,
};
use crate::types::{AqResult, Pollutant};
use chrono::NaiveDate;

/// Record sink and source shared by the batch tasks
pub trait Store: Send + Sync {
    /// Insert or replace the raster for its (pollutant, date); returns its id
    fn upsert_raster(&self, raster: PollutantRaster) -> AqResult<u64>;
    fn raster(&self, id: u64) -> AqResult<Option<PollutantRaster>>;
    fn raster_for(&self, pollutant: Pollutant, date: NaiveDate) -> AqResult<Option<PollutantRaster>>;
    /// Rasters of a pollutant with `start <= date <= end`, ordered by date
    fn rasters_between(&self, pollutant: Pollutant, start: NaiveDate, end: NaiveDate)
        -> AqResult<Vec<PollutantRaster>>;
    /// Rasters of any pollutant dated strictly before `cutoff`
    fn rasters_before(&self, cutoff: NaiveDate) -> AqResult<Vec<PollutantRaster>>;
    fn delete_raster(&self, id: u64) -> AqResult<bool>;

    /// Insert or update keyed by external id
    fn upsert_station(&self, station: GroundStation) -> AqResult<()>;
    fn station(&self, external_id: &str) -> AqResult<Option<GroundStation>>;
    fn stations(&self, active_only: bool) -> AqResult<Vec<GroundStation>>;
    /// Returns false when the station is unknown
    fn set_station_active(&self, external_id: &str, active: bool) -> AqResult<bool>;

    /// Insert or replace keyed by (station, timestamp, pollutant)
    fn upsert_reading(&self, reading: GroundReading) -> AqResult<()>;
    /// Readings of a pollutant whose calendar date lies in `start..=end`
    fn readings_between(&self, pollutant: Pollutant, start: NaiveDate, end: NaiveDate)
        -> AqResult<Vec<GroundReading>>;

    /// Store a new model; returns its id
    fn insert_model(&self, model: CorrectionModel) -> AqResult<u64>;
    fn update_model(&self, model: &CorrectionModel) -> AqResult<()>;
    fn model(&self, id: u64) -> AqResult<Option<CorrectionModel>>;
    fn models(&self, pollutant: Pollutant) -> AqResult<Vec<CorrectionModel>>;
    /// Make `id` the single active model of its pollutant, archiving siblings
    fn activate_model(&self, id: u64) -> AqResult<()>;
    fn active_model(&self, pollutant: Pollutant) -> AqResult<Option<CorrectionModel>>;

    /// Insert or replace keyed by (model, station, date)
    fn upsert_calibration_points(&self, points: Vec<CalibrationPoint>) -> AqResult<()>;
    fn calibration_points(&self, model_id: u64) -> AqResult<Vec<CalibrationPoint>>;

    /// Insert or replace keyed by (model, raster)
    fn upsert_run(&self, run: CorrectionRun) -> AqResult<()>;
    fn run(&self, model_id: u64, raster_id: u64) -> AqResult<Option<CorrectionRun>>;

    fn upsert_district_exposures(&self, records: Vec<DistrictExposure>) -> AqResult<()>;
    fn district_exposures(&self, scope: ExposureScope, date: NaiveDate) -> AqResult<Vec<DistrictExposure>>;
    fn upsert_province_exposures(&self, records: Vec<ProvinceExposure>) -> AqResult<()>;
    fn province_exposures(&self, scope: ExposureScope, date: NaiveDate) -> AqResult<Vec<ProvinceExposure>>;
    fn upsert_national_exposure(&self, record: NationalExposure) -> AqResult<()>;
    fn national_exposure(&self, scope: ExposureScope, date: NaiveDate) -> AqResult<Option<NationalExposure>>;

    /// Delete every hotspot of (pollutant, date), then insert `hotspots`
    fn replace_hotspots(&self, pollutant: Pollutant, date: NaiveDate, hotspots: Vec<Hotspot>) -> AqResult<()>;
    fn hotspots(&self, pollutant: Pollutant, date: NaiveDate) -> AqResult<Vec<Hotspot>>;
}
