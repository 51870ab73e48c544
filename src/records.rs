//! Persistent records produced and consumed by the processing pipeline.

use crate::core::aqi::AqiCategory;
use crate::core::correction::{CorrectionMetrics, Kernel, ModelType};
use crate::core::exposure::ExposureStats;
use crate::io::raster::ZonalStats;
use crate::types::{AqError, AqResult, Pollutant, RasterRef};
use chrono::{DateTime, NaiveDate, Utc};
use geo::{Point, Polygon};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;

/// Processing state of a satellite raster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RasterStatus {
    Pending,
    Downloading,
    Downloaded,
    Correcting,
    Corrected,
    Complete,
    Failed,
}

impl RasterStatus {
    pub fn can_transition_to(self, next: RasterStatus) -> bool {
        use RasterStatus::*;
        match (self, next) {
            (_, Failed) => self != Failed,
            (Pending, Downloading)
            | (Downloading, Downloaded)
            | (Downloaded, Correcting)
            | (Correcting, Corrected)
            | (Corrected, Complete) => true,
            // Reprocessing with a newer model
            (Corrected, Correcting) | (Complete, Correcting) => true,
            // Retry
            (Failed, Pending) | (Failed, Correcting) => true,
            _ => false,
        }
    }

    pub fn has_corrected_output(self) -> bool {
        matches!(self, RasterStatus::Corrected | RasterStatus::Complete)
    }
}

impl std::fmt::Display for RasterStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RasterStatus::Pending => "PENDING",
            RasterStatus::Downloading => "DOWNLOADING",
            RasterStatus::Downloaded => "DOWNLOADED",
            RasterStatus::Correcting => "CORRECTING",
            RasterStatus::Corrected => "CORRECTED",
            RasterStatus::Complete => "COMPLETE",
            RasterStatus::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// One gridded satellite observation for a (pollutant, date)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollutantRaster {
    /// Assigned by the store; 0 until first persisted
    pub id: u64,
    pub pollutant: Pollutant,
    pub date: NaiveDate,
    pub raw: RasterRef,
    corrected: Option<RasterRef>,
    status: RasterStatus,
    pub stats: Option<ZonalStats>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl PollutantRaster {
    /// A raster whose download has just completed
    pub fn downloaded(pollutant: Pollutant, date: NaiveDate, raw: RasterRef) -> Self {
        Self {
            id: 0,
            pollutant,
            date,
            raw,
            corrected: None,
            status: RasterStatus::Downloaded,
            stats: None,
            error_message: None,
            created_at: Utc::now(),
        }
    }

    pub fn status(&self) -> RasterStatus {
        self.status
    }

    /// Corrected grid, present only in CORRECTED or COMPLETE
    pub fn corrected(&self) -> Option<&RasterRef> {
        self.corrected.as_ref()
    }

    /// Corrected grid when available, raw grid otherwise
    pub fn best_available(&self) -> &RasterRef {
        self.corrected.as_ref().unwrap_or(&self.raw)
    }

    pub fn transition(&mut self, next: RasterStatus) -> AqResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(AqError::InvalidTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        if !next.has_corrected_output() {
            self.corrected = None;
        }
        if next != RasterStatus::Failed {
            self.error_message = None;
        }
        Ok(())
    }

    pub fn mark_corrected(&mut self, output: RasterRef, stats: ZonalStats) -> AqResult<()> {
        self.transition(RasterStatus::Corrected)?;
        self.corrected = Some(output);
        self.stats = Some(stats);
        Ok(())
    }

    pub fn mark_failed(&mut self, message: impl Into<String>) -> AqResult<()> {
        self.transition(RasterStatus::Failed)?;
        self.error_message = Some(message.into());
        Ok(())
    }
}

/// A ground monitoring site
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroundStation {
    pub external_id: String,
    pub name: String,
    pub lon: f64,
    pub lat: f64,
    pub district_id: Option<String>,
    pub parameters: BTreeSet<Pollutant>,
    pub active: bool,
    pub last_synced: Option<DateTime<Utc>>,
}

impl GroundStation {
    pub fn new(external_id: impl Into<String>, name: impl Into<String>, lon: f64, lat: f64) -> Self {
        Self {
            external_id: external_id.into(),
            name: name.into(),
            lon,
            lat,
            district_id: None,
            parameters: BTreeSet::new(),
            active: true,
            last_synced: None,
        }
    }

    pub fn with_parameters(mut self, parameters: impl IntoIterator<Item = Pollutant>) -> Self {
        self.parameters.extend(parameters);
        self
    }

    pub fn reports(&self, pollutant: Pollutant) -> bool {
        self.parameters.contains(&pollutant)
    }
}

/// One station measurement of one pollutant, in the pollutant's standard unit
/// when normalization succeeded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroundReading {
    pub station_id: String,
    pub timestamp: DateTime<Utc>,
    pub pollutant: Pollutant,
    pub value: f64,
    pub unit: String,
    pub raw_payload: Option<serde_json::Value>,
}

impl GroundReading {
    pub fn date(&self) -> NaiveDate {
        self.timestamp.date_naive()
    }

    pub fn key(&self) -> (String, DateTime<Utc>, Pollutant) {
        (self.station_id.clone(), self.timestamp, self.pollutant)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ModelStatus {
    Training,
    Active,
    Archived,
    Failed,
}

/// GWR fit diagnostics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GwrDiagnostics {
    pub bandwidth_km: f64,
    pub kernel: Kernel,
    pub local_r2_min: f64,
    pub local_r2_max: f64,
    pub local_r2_mean: f64,
}

/// A trained bias-correction model for one pollutant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrectionModel {
    pub id: u64,
    pub pollutant: Pollutant,
    pub model_type: ModelType,
    pub status: ModelStatus,
    pub is_active: bool,
    pub training_start: NaiveDate,
    pub training_end: NaiveDate,
    pub n_samples: usize,
    pub n_stations: usize,
    /// Serialized fitted model
    pub model_path: Option<PathBuf>,
    pub metrics: Option<CorrectionMetrics>,
    pub gwr: Option<GwrDiagnostics>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl CorrectionModel {
    pub fn training(
        pollutant: Pollutant,
        model_type: ModelType,
        training_start: NaiveDate,
        training_end: NaiveDate,
    ) -> Self {
        Self {
            id: 0,
            pollutant,
            model_type,
            status: ModelStatus::Training,
            is_active: false,
            training_start,
            training_end,
            n_samples: 0,
            n_stations: 0,
            model_path: None,
            metrics: None,
            gwr: None,
            error_message: None,
            created_at: Utc::now(),
        }
    }

    pub fn is_usable(&self) -> bool {
        self.is_active && self.status == ModelStatus::Active
    }
}

/// One training/diagnostic sample of a model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationPoint {
    pub model_id: u64,
    pub station_id: String,
    pub date: NaiveDate,
    pub ground_value: f64,
    pub satellite_value: f64,
    pub corrected_value: f64,
    pub residual: f64,
    pub local_intercept: Option<f64>,
    pub local_slope: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Pending,
    Running,
    Success,
    Failed,
}

/// Application of one model to one raster
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrectionRun {
    pub model_id: u64,
    pub raster_id: u64,
    pub status: RunStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub output_path: Option<PathBuf>,
    pub stats: Option<ZonalStats>,
    pub error_message: Option<String>,
}

impl CorrectionRun {
    pub fn pending(model_id: u64, raster_id: u64) -> Self {
        Self {
            model_id,
            raster_id,
            status: RunStatus::Pending,
            started_at: None,
            finished_at: None,
            output_path: None,
            stats: None,
            error_message: None,
        }
    }

    pub fn start(&mut self) {
        self.status = RunStatus::Running;
        self.started_at = Some(Utc::now());
        self.finished_at = None;
        self.error_message = None;
    }

    /// `output_path` is `None` when the corrected grid stayed in memory
    pub fn succeed(&mut self, output_path: Option<PathBuf>, stats: ZonalStats) {
        self.status = RunStatus::Success;
        self.finished_at = Some(Utc::now());
        self.output_path = output_path;
        self.stats = Some(stats);
    }

    pub fn fail(&mut self, message: impl Into<String>) {
        self.status = RunStatus::Failed;
        self.finished_at = Some(Utc::now());
        self.error_message = Some(message.into());
    }
}

/// Which concentration an exposure record summarizes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExposureScope {
    Pollutant(Pollutant),
    /// Worst pollutant per district
    Combined,
}

impl std::fmt::Display for ExposureScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExposureScope::Pollutant(p) => write!(f, "{}", p),
            ExposureScope::Combined => write!(f, "COMBINED"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistrictExposure {
    pub district_id: String,
    pub province_id: Option<String>,
    pub scope: ExposureScope,
    pub date: NaiveDate,
    pub stats: ExposureStats,
    /// 1 = highest exposure index among districts for this scope and date
    pub rank: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvinceExposure {
    pub province_id: String,
    pub scope: ExposureScope,
    pub date: NaiveDate,
    pub stats: ExposureStats,
    pub n_districts: usize,
    pub worst_district: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NationalExposure {
    pub scope: ExposureScope,
    pub date: NaiveDate,
    pub stats: ExposureStats,
    pub n_provinces: usize,
    pub worst_province: Option<String>,
    pub worst_district: Option<String>,
}

/// Severity tier of a hotspot, ordered by mean AQI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Moderate,
    High,
    Severe,
    Critical,
}

impl Severity {
    pub fn from_mean_aqi(aqi: f64) -> Severity {
        if aqi >= 300.0 {
            Severity::Critical
        } else if aqi >= 200.0 {
            Severity::Severe
        } else if aqi >= 150.0 {
            Severity::High
        } else {
            Severity::Moderate
        }
    }
}

/// A contiguous high-AQI cluster on one date
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hotspot {
    pub pollutant: Pollutant,
    pub date: NaiveDate,
    pub centroid: Point<f64>,
    pub boundary: Option<Polygon<f64>>,
    pub area_km2: f64,
    pub pixel_count: usize,
    pub severity: Severity,
    pub mean_concentration: f64,
    pub max_concentration: f64,
    pub mean_aqi: f64,
    pub max_aqi: f64,
    pub category: AqiCategory,
    pub affected_population: f64,
    pub districts: Vec<String>,
    pub persistence_days: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raster() -> PollutantRaster {
        PollutantRaster::downloaded(
            Pollutant::NO2,
            NaiveDate::from_ymd_opt(2024, 11, 5).unwrap(),
            RasterRef::path("/data/no2.tif"),
        )
    }

    #[test]
    fn test_raster_lifecycle() {
        let mut r = raster();
        assert!(r.corrected().is_none());
        r.transition(RasterStatus::Correcting).unwrap();
        r.mark_corrected(RasterRef::path("/data/no2_corr.tif"), ZonalStats::default())
            .unwrap();
        assert!(r.corrected().is_some());
        r.transition(RasterStatus::Complete).unwrap();
        assert!(r.corrected().is_some());

        // Reprocessing clears the corrected output until it is rewritten
        r.transition(RasterStatus::Correcting).unwrap();
        assert!(r.corrected().is_none());
    }

    #[test]
    fn test_invalid_transition_rejected() {
        let mut r = raster();
        let err = r.transition(RasterStatus::Complete).unwrap_err();
        assert!(matches!(err, AqError::InvalidTransition { .. }));
        assert_eq!(r.status(), RasterStatus::Downloaded);
    }

    #[test]
    fn test_failure_from_any_stage() {
        let mut r = raster();
        r.mark_failed("GDAL open failed").unwrap();
        assert_eq!(r.status(), RasterStatus::Failed);
        assert!(r.mark_failed("again").is_err());
        r.transition(RasterStatus::Correcting).unwrap();
        assert!(r.error_message.is_none());
    }

    #[test]
    fn test_severity_monotonic() {
        assert_eq!(Severity::from_mean_aqi(120.0), Severity::Moderate);
        assert_eq!(Severity::from_mean_aqi(150.0), Severity::High);
        assert_eq!(Severity::from_mean_aqi(250.0), Severity::Severe);
        assert_eq!(Severity::from_mean_aqi(300.0), Severity::Critical);
        assert!(Severity::Critical > Severity::Moderate);
    }
}
