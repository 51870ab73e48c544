//! smogmap: satellite bias correction and population exposure for air quality
//!
//! Raw satellite concentration rasters are corrected against ground stations
//! with linear, robust, ensemble or geographically weighted models, then
//! summarized per district, province and nation as population-weighted AQI
//! exposure. Contiguous high-AQI areas are tracked day to day as hotspots.

pub mod config;
pub mod core;
pub mod io;
pub mod records;
pub mod store;
pub mod tasks;
pub mod types;

// Re-export main types and functions for easier access
pub use config::EngineConfig;
pub use records::{
    CorrectionModel, CorrectionRun, DistrictExposure, ExposureScope, GroundReading, GroundStation, Hotspot,
    NationalExposure, PollutantRaster, ProvinceExposure, RasterStatus,
};
pub use store::{InMemoryStore, Store};
pub use tasks::{DailyPipeline, TaskOutcome, TaskReport, TaskStatus};
pub use types::{AqError, AqResult, BoundingBox, GeoTransform, Grid, Pollutant, RasterRef};
