//! Core air-quality processing modules

pub mod aggregation;
pub mod aqi;
pub mod correction;
pub mod exposure;
pub mod fusion;
pub mod hotspot;
pub mod resample;
pub mod training;
pub mod units;

// Re-export main types
pub use aqi::{aqi_grid, calculate_aqi, AqiCategory, CategoryPopulation};
pub use correction::{BiasCorrector, CorrectionMetrics, Corrector, GwrCorrector, GwrParams, LinearCorrector, ModelType};
pub use exposure::{DataSource, ExposureCalculator, ExposureParams, ExposureStats};
pub use fusion::{fuse, FusionParams, GroundSummary};
pub use hotspot::{HotspotDetector, HotspotParams};
pub use training::{TrainingDataAssembler, TrainingParams, TrainingSet};
pub use units::{convert, normalize_to_standard, standard_unit, Unit};
