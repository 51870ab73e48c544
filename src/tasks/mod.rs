//! Batch tasks: ingestion, training, correction, daily aggregation and
//! retention.
//!
//! Tasks report per-unit outcomes in a [`TaskReport`] instead of failing as a
//! whole, so a partial run stays inspectable.

pub mod correction;
pub mod ingestion;
pub mod pipeline;
pub mod remote;
pub mod retention;
pub mod training;

pub use correction::{correct_raster_record, CorrectionService};
pub use ingestion::{ingest_readings, sync_stations, DiscoveredStation, IngestionSummary, RawReading, StationSyncSummary};
pub use pipeline::DailyPipeline;
pub use remote::{EstimateRequest, RemoteFetcher, SatelliteEstimateSource};
pub use retention::{cleanup_raw_rasters, RetentionSummary};
pub use training::ModelTrainer;

use crate::types::AqError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Success,
    /// Nothing to compute; expected for sparsely covered units
    NoData,
    Error,
}

/// Result of one step for one unit of work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskOutcome {
    pub status: TaskStatus,
    /// Records produced or touched
    pub count: usize,
    pub message: Option<String>,
}

impl TaskOutcome {
    pub fn success(count: usize) -> Self {
        Self {
            status: TaskStatus::Success,
            count,
            message: None,
        }
    }

    pub fn no_data(message: impl Into<String>) -> Self {
        Self {
            status: TaskStatus::NoData,
            count: 0,
            message: Some(message.into()),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: TaskStatus::Error,
            count: 0,
            message: Some(message.into()),
        }
    }

    /// Data insufficiency is `NoData`; everything else is `Error`
    pub fn from_error(error: &AqError) -> Self {
        if error.is_data_insufficiency() {
            Self::no_data(error.to_string())
        } else {
            Self::error(error.to_string())
        }
    }
}

/// Outcomes keyed by unit (pollutant or scope) then step
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskReport {
    pub entries: BTreeMap<String, BTreeMap<String, TaskOutcome>>,
}

impl TaskReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, unit: impl Into<String>, step: impl Into<String>, outcome: TaskOutcome) {
        let unit = unit.into();
        let step = step.into();
        match outcome.status {
            TaskStatus::Success => log::info!("{}/{}: success ({})", unit, step, outcome.count),
            TaskStatus::NoData => log::info!(
                "{}/{}: no data ({})",
                unit,
                step,
                outcome.message.as_deref().unwrap_or("")
            ),
            TaskStatus::Error => log::error!(
                "{}/{}: {}",
                unit,
                step,
                outcome.message.as_deref().unwrap_or("failed")
            ),
        }
        self.entries.entry(unit).or_default().insert(step, outcome);
    }

    pub fn get(&self, unit: &str, step: &str) -> Option<&TaskOutcome> {
        self.entries.get(unit).and_then(|steps| steps.get(step))
    }

    pub fn merge(&mut self, other: TaskReport) {
        for (unit, steps) in other.entries {
            self.entries.entry(unit).or_default().extend(steps);
        }
    }

    /// (unit, step, outcome) of every error entry
    pub fn errors(&self) -> impl Iterator<Item = (&str, &str, &TaskOutcome)> {
        self.entries.iter().flat_map(|(unit, steps)| {
            steps
                .iter()
                .filter(|(_, o)| o.status == TaskStatus::Error)
                .map(move |(step, o)| (unit.as_str(), step.as_str(), o))
        })
    }

    pub fn has_errors(&self) -> bool {
        self.errors().next().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Pollutant;

    #[test]
    fn test_outcome_classification() {
        let no_data = TaskOutcome::from_error(&AqError::InsufficientData("2 stations".into()));
        assert_eq!(no_data.status, TaskStatus::NoData);
        let error = TaskOutcome::from_error(&AqError::NoActiveModel(Pollutant::NO2));
        assert_eq!(error.status, TaskStatus::Error);
        assert!(error.message.unwrap().contains("NO2"));
    }

    #[test]
    fn test_report_merge_and_errors() {
        let mut a = TaskReport::new();
        a.record("PM25", "district_exposure", TaskOutcome::success(4));
        let mut b = TaskReport::new();
        b.record("NO2", "hotspots", TaskOutcome::error("boom"));
        a.merge(b);

        assert_eq!(a.get("PM25", "district_exposure").map(|o| o.count), Some(4));
        let errors: Vec<_> = a.errors().map(|(u, s, _)| (u, s)).collect();
        assert_eq!(errors, vec![("NO2", "hotspots")]);
        assert!(a.has_errors());
    }
}
