//! Station discovery sync and reading ingestion.

use crate::core::units::{normalize_to_standard, standard_unit};
use crate::records::{GroundReading, GroundStation};
use crate::store::Store;
use crate::types::{AqResult, Pollutant};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A station as reported by the ground-data provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveredStation {
    pub external_id: String,
    pub name: String,
    pub lon: f64,
    pub lat: f64,
    pub district_id: Option<String>,
    /// Provider parameter codes, e.g. "pm25", "no2"
    pub parameters: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StationSyncSummary {
    pub created: usize,
    pub updated: usize,
    pub deactivated: usize,
}

/// Upsert discovered stations by external id
///
/// With `deactivate_missing`, known active stations absent from `discovered`
/// are deactivated; stations are never deleted.
pub fn sync_stations(
    store: &dyn Store,
    discovered: &[DiscoveredStation],
    deactivate_missing: bool,
) -> AqResult<StationSyncSummary> {
    let mut summary = StationSyncSummary::default();
    let now = Utc::now();
    let mut seen = BTreeSet::new();

    for item in discovered {
        if !item.lon.is_finite() || !item.lat.is_finite() {
            log::warn!("Station {} has no usable location, skipped", item.external_id);
            continue;
        }
        let parameters: BTreeSet<Pollutant> = item
            .parameters
            .iter()
            .filter_map(|code| match code.parse::<Pollutant>() {
                Ok(p) => Some(p),
                Err(_) => {
                    log::debug!("Station {}: ignoring parameter {}", item.external_id, code);
                    None
                }
            })
            .collect();

        let station = match store.station(&item.external_id)? {
            Some(mut existing) => {
                summary.updated += 1;
                existing.name = item.name.clone();
                existing.lon = item.lon;
                existing.lat = item.lat;
                existing.district_id = item.district_id.clone().or(existing.district_id);
                existing.parameters = parameters;
                existing.active = true;
                existing
            }
            None => {
                summary.created += 1;
                let mut station = GroundStation::new(&item.external_id, &item.name, item.lon, item.lat)
                    .with_parameters(parameters);
                station.district_id = item.district_id.clone();
                station
            }
        };
        seen.insert(item.external_id.clone());
        store.upsert_station(GroundStation {
            last_synced: Some(now),
            ..station
        })?;
    }

    if deactivate_missing {
        for station in store.stations(true)? {
            if !seen.contains(&station.external_id) && store.set_station_active(&station.external_id, false)? {
                summary.deactivated += 1;
            }
        }
    }

    log::info!(
        "Station sync: {} created, {} updated, {} deactivated",
        summary.created,
        summary.updated,
        summary.deactivated
    );
    Ok(summary)
}

/// A provider measurement before normalization
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawReading {
    pub station_id: String,
    pub timestamp: DateTime<Utc>,
    pub pollutant: String,
    pub value: f64,
    pub unit: String,
    pub payload: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IngestionSummary {
    pub stored: usize,
    /// Stored with their original unit after a failed conversion
    pub unconverted: usize,
    pub unknown_station: usize,
    pub unknown_pollutant: usize,
    pub invalid_value: usize,
}

/// Normalize units and upsert readings keyed by (station, timestamp, pollutant)
pub fn ingest_readings(store: &dyn Store, readings: Vec<RawReading>) -> AqResult<IngestionSummary> {
    let mut summary = IngestionSummary::default();
    let known: BTreeSet<String> = store.stations(false)?.into_iter().map(|s| s.external_id).collect();

    for raw in readings {
        if !known.contains(&raw.station_id) {
            summary.unknown_station += 1;
            continue;
        }
        let Ok(pollutant) = raw.pollutant.parse::<Pollutant>() else {
            summary.unknown_pollutant += 1;
            continue;
        };
        if !raw.value.is_finite() || raw.value < 0.0 {
            summary.invalid_value += 1;
            continue;
        }

        let (value, unit) = normalize_to_standard(raw.value, &raw.unit, &raw.pollutant);
        if unit != standard_unit(pollutant).symbol() {
            summary.unconverted += 1;
        }
        store.upsert_reading(GroundReading {
            station_id: raw.station_id,
            timestamp: raw.timestamp,
            pollutant,
            value,
            unit,
            raw_payload: raw.payload,
        })?;
        summary.stored += 1;
    }

    log::info!(
        "Ingested {} readings ({} unconverted, {} unknown stations, {} unknown pollutants, {} invalid)",
        summary.stored,
        summary.unconverted,
        summary.unknown_station,
        summary.unknown_pollutant,
        summary.invalid_value
    );
    Ok(summary)
}
