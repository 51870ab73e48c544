//! Pairing of raw satellite samples with same-day ground readings.

use crate::core::units::standard_unit;
use crate::io::raster;
use crate::store::Store;
use crate::types::{AqError, AqResult, Pollutant};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;

/// Training-data and model-selection parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingParams {
    /// Distinct stations (and samples) required to train at all
    pub min_stations: usize,
    /// Distinct stations at or above which GWR is used instead of linear
    pub gwr_station_threshold: usize,
    /// Days of history ending at the training date
    pub lookback_days: u32,
    pub cv_folds: usize,
    /// Directory for serialized models
    pub model_dir: PathBuf,
    /// Band sampled from raw rasters
    pub band: usize,
}

impl Default for TrainingParams {
    fn default() -> Self {
        Self {
            min_stations: 3,
            gwr_station_threshold: 10,
            lookback_days: 30,
            cv_folds: 5,
            model_dir: PathBuf::from("models"),
            band: 1,
        }
    }
}

/// Paired satellite/ground samples
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrainingSet {
    /// Satellite value at the station pixel
    pub x: Vec<f64>,
    /// Daily mean ground value
    pub y: Vec<f64>,
    /// Station (lon, lat)
    pub coords: Vec<(f64, f64)>,
    pub station_ids: Vec<String>,
    pub dates: Vec<NaiveDate>,
}

impl TrainingSet {
    pub fn len(&self) -> usize {
        self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    pub fn n_stations(&self) -> usize {
        self.station_ids.iter().collect::<BTreeSet<_>>().len()
    }

    fn push(&mut self, x: f64, y: f64, coord: (f64, f64), station_id: &str, date: NaiveDate) {
        self.x.push(x);
        self.y.push(y);
        self.coords.push(coord);
        self.station_ids.push(station_id.to_string());
        self.dates.push(date);
    }
}

/// Builds training sets from stored rasters, stations and readings
pub struct TrainingDataAssembler<'a> {
    store: &'a dyn Store,
    band: usize,
}

impl<'a> TrainingDataAssembler<'a> {
    pub fn new(store: &'a dyn Store) -> Self {
        Self { store, band: 1 }
    }

    pub fn with_band(mut self, band: usize) -> Self {
        self.band = band;
        self
    }

    /// One sample per (raster date, station) where both a raw raster value
    /// and a ground reading on that exact calendar day exist
    ///
    /// Several readings of one station on one day are averaged. Readings that
    /// were not normalized to the pollutant's standard unit are ignored.
    pub fn assemble(
        &self,
        pollutant: Pollutant,
        start: NaiveDate,
        end: NaiveDate,
        min_stations: usize,
    ) -> AqResult<TrainingSet> {
        if start > end {
            return Err(AqError::InvalidInput(format!(
                "Training range starts after it ends: {} > {}",
                start, end
            )));
        }

        let stations: Vec<_> = self
            .store
            .stations(true)?
            .into_iter()
            .filter(|s| s.reports(pollutant))
            .collect();
        let points: Vec<(f64, f64)> = stations.iter().map(|s| (s.lon, s.lat)).collect();

        let unit = standard_unit(pollutant).symbol();
        let mut daily: HashMap<(String, NaiveDate), (f64, usize)> = HashMap::new();
        let mut skipped_units = 0usize;
        for reading in self.store.readings_between(pollutant, start, end)? {
            if reading.unit != unit || !reading.value.is_finite() {
                skipped_units += 1;
                continue;
            }
            let entry = daily.entry((reading.station_id.clone(), reading.date())).or_insert((0.0, 0));
            entry.0 += reading.value;
            entry.1 += 1;
        }
        if skipped_units > 0 {
            log::debug!(
                "{}: ignored {} readings not in {} or non-finite",
                pollutant,
                skipped_units,
                unit
            );
        }

        let rasters = self.store.rasters_between(pollutant, start, end)?;
        let mut set = TrainingSet::default();
        for raster_record in &rasters {
            let sampled = raster::sample(&raster_record.raw, &points, self.band)?;
            for (station, value) in stations.iter().zip(sampled) {
                let Some(x) = value else { continue };
                let Some(&(sum, n)) = daily.get(&(station.external_id.clone(), raster_record.date)) else {
                    continue;
                };
                set.push(x, sum / n as f64, (station.lon, station.lat), &station.external_id, raster_record.date);
            }
        }

        let n_stations = set.n_stations();
        log::info!(
            "{} training data {}..{}: {} samples from {} stations over {} rasters",
            pollutant,
            start,
            end,
            set.len(),
            n_stations,
            rasters.len()
        );

        if n_stations < min_stations || set.len() < min_stations {
            return Err(AqError::InsufficientData(format!(
                "{} training needs {} stations, got {} stations and {} samples",
                pollutant,
                min_stations,
                n_stations,
                set.len()
            )));
        }
        Ok(set)
    }
}
