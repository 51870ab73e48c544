//! Engine configuration loaded from TOML.
//!
//! Every section is optional; missing keys take the documented defaults.
//!
//! ```toml
//! [training]
//! gwr_station_threshold = 10
//!
//! [exposure]
//! reference_density = 1000.0
//!
//! [hotspot]
//! aqi_threshold = 150.0
//! ```

use crate::core::correction::GwrParams;
use crate::core::exposure::ExposureParams;
use crate::core::fusion::FusionParams;
use crate::core::hotspot::HotspotParams;
use crate::core::training::TrainingParams;
use crate::types::{AqError, AqResult, Pollutant};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Daily pipeline settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineParams {
    pub pollutants: Vec<Pollutant>,
    /// Also produce worst-pollutant (combined) records
    pub combined: bool,
    /// Where corrected rasters are written
    pub output_dir: PathBuf,
    /// Run pollutants concurrently
    pub parallel: bool,
}

impl Default for PipelineParams {
    fn default() -> Self {
        Self {
            pollutants: Pollutant::ALL.to_vec(),
            combined: true,
            output_dir: PathBuf::from("corrected"),
            parallel: true,
        }
    }
}

/// Remote estimate fetch settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteParams {
    pub workers: usize,
    pub timeout_secs: u64,
}

impl Default for RemoteParams {
    fn default() -> Self {
        Self {
            workers: 4,
            timeout_secs: 60,
        }
    }
}

/// Raw raster retention
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionParams {
    /// Raw rasters older than this many days are eligible for cleanup
    pub raw_retention_days: u32,
    /// Also delete the raw file from disk
    pub delete_files: bool,
}

impl Default for RetentionParams {
    fn default() -> Self {
        Self {
            raw_retention_days: 90,
            delete_files: true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub gwr: GwrParams,
    pub training: TrainingParams,
    pub exposure: ExposureParams,
    pub fusion: FusionParams,
    pub hotspot: HotspotParams,
    pub pipeline: PipelineParams,
    pub remote: RemoteParams,
    pub retention: RetentionParams,
}

impl EngineConfig {
    pub fn from_toml_str(content: &str) -> AqResult<Self> {
        let config: EngineConfig = toml::from_str(content).map_err(|e| AqError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> AqResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        log::info!("Loading engine configuration from {}", path.display());
        Self::from_toml_str(&content)
    }

    /// Reject settings no component can work with
    pub fn validate(&self) -> AqResult<()> {
        if self.training.min_stations == 0 {
            return Err(AqError::Config("training.min_stations must be at least 1".to_string()));
        }
        if self.training.cv_folds < 2 {
            return Err(AqError::Config("training.cv_folds must be at least 2".to_string()));
        }
        if self.exposure.reference_density <= 0.0 {
            return Err(AqError::Config("exposure.reference_density must be positive".to_string()));
        }
        for (name, w) in [
            ("single_station_weight", self.fusion.single_station_weight),
            ("few_stations_weight", self.fusion.few_stations_weight),
            ("many_stations_weight", self.fusion.many_stations_weight),
        ] {
            if !(0.0..=1.0).contains(&w) {
                return Err(AqError::Config(format!("fusion.{} must lie in [0, 1], got {}", name, w)));
            }
        }
        if self.hotspot.min_pixels == 0 {
            return Err(AqError::Config("hotspot.min_pixels must be at least 1".to_string()));
        }
        if self.remote.workers == 0 {
            return Err(AqError::Config("remote.workers must be at least 1".to_string()));
        }
        Ok(())
    }
}
