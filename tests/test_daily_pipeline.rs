use chrono::{NaiveDate, TimeZone, Utc};
use geo::{polygon, MultiPolygon};
use ndarray::Array2;
use smogmap::core::exposure::DataSource;
use smogmap::core::training::TrainingParams;
use smogmap::core::correction::{GwrParams, ModelType};
use smogmap::io::regions::{Region, RegionLevel};
use smogmap::tasks::pipeline::{COMBINED_UNIT, STEP_CORRECTION, STEP_HOTSPOTS, STEP_NATIONAL};
use smogmap::tasks::{ingest_readings, sync_stations, DiscoveredStation, ModelTrainer, RawReading};
use smogmap::{
    DailyPipeline, EngineConfig, ExposureScope, GeoTransform, Grid, InMemoryStore, Pollutant, PollutantRaster,
    RasterRef, RasterStatus, Store, TaskStatus,
};
use std::sync::Arc;

fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 11, d).unwrap()
}

fn transform() -> GeoTransform {
    GeoTransform::north_up(70.0, 32.0, 0.1, 0.1)
}

/// Quadrant districts of a 2° x 2° scene; west half is P1, east half P2
fn districts() -> Vec<Region> {
    let quad = |id: &str, province: &str, x0: f64, y0: f64| {
        let poly = polygon![
            (x: x0, y: y0),
            (x: x0 + 1.0, y: y0),
            (x: x0 + 1.0, y: y0 + 1.0),
            (x: x0, y: y0 + 1.0),
            (x: x0, y: y0),
        ];
        Region::new(id, id, RegionLevel::District, Some(province.to_string()), MultiPolygon(vec![poly]))
    };
    vec![
        quad("NW", "P1", 70.0, 31.0),
        quad("SW", "P1", 70.0, 30.0),
        quad("NE", "P2", 71.0, 31.0),
        quad("SE", "P2", 71.0, 30.0),
    ]
}

fn population() -> RasterRef {
    let data = Array2::from_shape_fn((20, 20), |(r, c)| 50.0 + (r * 20 + c) as f64);
    RasterRef::memory(Grid::new(data, transform(), None))
}

/// Background of 20 µg/m³ with a 4x4 block of 200 starting at `col`
fn scene(col: usize) -> Grid {
    let mut data = Array2::from_elem((20, 20), 20.0);
    for r in 2..6 {
        for c in col..col + 4 {
            data[[r, c]] = 200.0;
        }
    }
    Grid::new(data, transform(), None)
}

fn config(dir: &std::path::Path) -> EngineConfig {
    let mut config = EngineConfig::default();
    config.pipeline.pollutants = vec![Pollutant::PM25];
    config.pipeline.output_dir = dir.join("corrected");
    config
}

fn add_raster(store: &InMemoryStore, date: NaiveDate, grid: Grid) {
    store
        .upsert_raster(PollutantRaster::downloaded(Pollutant::PM25, date, RasterRef::memory(grid)))
        .unwrap();
}

#[test]
fn test_rollups_are_consistent() {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(InMemoryStore::new());
    add_raster(&store, day(1), scene(2));

    let pipeline = DailyPipeline::from_config(store.clone(), config(dir.path()), districts(), population());
    let report = pipeline.run(day(1));
    assert_eq!(report.get("PM25", STEP_NATIONAL).unwrap().status, TaskStatus::Success);

    for scope in [ExposureScope::Pollutant(Pollutant::PM25), ExposureScope::Combined] {
        let districts = store.district_exposures(scope, day(1)).unwrap();
        let provinces = store.province_exposures(scope, day(1)).unwrap();
        let national = store.national_exposure(scope, day(1)).unwrap().unwrap();
        assert_eq!(districts.len(), 4);
        assert_eq!(provinces.len(), 2);

        for province in &provinces {
            let sum: f64 = districts
                .iter()
                .filter(|d| d.province_id.as_deref() == Some(province.province_id.as_str()))
                .map(|d| d.stats.total_population)
                .sum();
            approx::assert_relative_eq!(sum, province.stats.total_population, max_relative = 1e-9);
        }
        let provinces_sum: f64 = provinces.iter().map(|p| p.stats.total_population).sum();
        approx::assert_relative_eq!(provinces_sum, national.stats.total_population, max_relative = 1e-9);

        let mut ranks: Vec<usize> = districts.iter().filter_map(|d| d.rank).collect();
        ranks.sort_unstable();
        assert_eq!(ranks, vec![1, 2, 3, 4]);
        assert_eq!(national.worst_district.as_deref(), Some("NW"));
        assert_eq!(national.worst_province.as_deref(), Some("P1"));
    }
}

#[test]
fn test_hotspot_persistence_across_days() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(InMemoryStore::new());
    add_raster(&store, day(1), scene(2));
    add_raster(&store, day(2), scene(2));
    // Ten pixels east is about 96 km at this latitude
    add_raster(&store, day(3), scene(12));

    let pipeline = DailyPipeline::from_config(store.clone(), config(dir.path()), districts(), population());
    for d in 1..=3 {
        let report = pipeline.run(day(d));
        assert_eq!(report.get("PM25", STEP_HOTSPOTS).unwrap().count, 1);
    }

    let persistence = |d: u32| {
        let hotspots = store.hotspots(Pollutant::PM25, day(d)).unwrap();
        assert_eq!(hotspots.len(), 1);
        hotspots[0].persistence_days
    };
    assert_eq!(persistence(1), 1);
    assert_eq!(persistence(2), 2);
    assert_eq!(persistence(3), 1);

    // Re-running a day replaces rather than duplicates
    pipeline.run(day(2));
    assert_eq!(persistence(2), 2);
}

#[test]
fn test_ingest_train_and_correct() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(InMemoryStore::new());

    // Satellite reads 1.3x the ground field
    let ground = |lon: f64, lat: f64| 25.0 + 15.0 * (lon - 70.0) + 8.0 * (lat - 30.0);
    let gt = transform();
    let satellite = Grid::new(
        Array2::from_shape_fn((20, 20), |(r, c)| {
            let (lon, lat) = gt.pixel_center(r, c);
            1.3 * ground(lon, lat)
        }),
        gt,
        None,
    );
    add_raster(&store, day(3), satellite);

    let pixels = [(1, 1), (4, 15), (9, 9), (14, 3), (18, 17), (12, 12)];
    let discovered: Vec<DiscoveredStation> = pixels
        .iter()
        .enumerate()
        .map(|(i, &(r, c))| {
            let (lon, lat) = gt.pixel_center(r, c);
            DiscoveredStation {
                external_id: format!("S{}", i),
                name: format!("Station {}", i),
                lon,
                lat,
                district_id: (i == 0).then(|| "NW".to_string()),
                parameters: vec!["pm25".to_string()],
            }
        })
        .collect();
    let synced = sync_stations(store.as_ref(), &discovered, true).unwrap();
    assert_eq!(synced.created, pixels.len());

    let mut readings: Vec<RawReading> = discovered
        .iter()
        .map(|s| RawReading {
            station_id: s.external_id.clone(),
            timestamp: Utc.with_ymd_and_hms(2024, 11, 3, 9, 0, 0).unwrap(),
            pollutant: "pm25".to_string(),
            value: ground(s.lon, s.lat),
            unit: "ug/m3".to_string(),
            payload: None,
        })
        .collect();
    readings.push(RawReading {
        station_id: "S0".to_string(),
        timestamp: Utc.with_ymd_and_hms(2024, 11, 3, 10, 0, 0).unwrap(),
        pollutant: "pm25".to_string(),
        value: 12.0,
        unit: "furlongs".to_string(),
        payload: None,
    });
    let ingested = ingest_readings(store.as_ref(), readings).unwrap();
    assert_eq!(ingested.stored, pixels.len() + 1);
    assert_eq!(ingested.unconverted, 1);

    let training = TrainingParams {
        model_dir: dir.path().join("models"),
        ..TrainingParams::default()
    };
    let model = ModelTrainer::new(store.as_ref(), training, GwrParams::default())
        .train(Pollutant::PM25, day(3))
        .unwrap();
    assert_eq!(model.model_type, ModelType::Linear);
    assert!(model.is_active);

    let pipeline = DailyPipeline::from_config(store.clone(), config(dir.path()), districts(), population());
    let report = pipeline.run(day(3));
    assert_eq!(report.get("PM25", STEP_CORRECTION).unwrap().status, TaskStatus::Success);
    assert_eq!(report.get(COMBINED_UNIT, STEP_NATIONAL).unwrap().status, TaskStatus::Success);

    let raster = store.raster_for(Pollutant::PM25, day(3)).unwrap().unwrap();
    assert_eq!(raster.status(), RasterStatus::Complete);
    assert!(store.run(model.id, raster.id).unwrap().is_some());

    let records = store
        .district_exposures(ExposureScope::Pollutant(Pollutant::PM25), day(3))
        .unwrap();
    for record in &records {
        let expected = if record.district_id == "NW" {
            DataSource::Fused
        } else {
            DataSource::Raster
        };
        assert_eq!(record.stats.data_source, expected, "{}", record.district_id);
    }

    // Corrected concentrations sit near the ground field, not 1.3x above it
    let se = records.iter().find(|r| r.district_id == "SE").unwrap();
    let (lon, lat) = (71.5, 30.5);
    assert!((se.stats.mean_concentration - ground(lon, lat)).abs() < 0.1 * ground(lon, lat));
}
