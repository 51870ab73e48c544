use super::Store;
use crate::records::{
    CalibrationPoint, CorrectionModel, CorrectionRun, DistrictExposure, ExposureScope, GroundReading,
    GroundStation, Hotspot, ModelStatus, NationalExposure, PollutantRaster, ProvinceExposure,
};
use crate::types::{AqError, AqResult, Pollutant};
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Default)]
struct Tables {
    next_id: u64,
    rasters: BTreeMap<u64, PollutantRaster>,
    raster_keys: BTreeMap<(Pollutant, NaiveDate), u64>,
    stations: BTreeMap<String, GroundStation>,
    readings: BTreeMap<(String, DateTime<Utc>, Pollutant), GroundReading>,
    models: BTreeMap<u64, CorrectionModel>,
    calibration: BTreeMap<(u64, String, NaiveDate), CalibrationPoint>,
    runs: BTreeMap<(u64, u64), CorrectionRun>,
    districts: BTreeMap<(ExposureScope, NaiveDate, String), DistrictExposure>,
    provinces: BTreeMap<(ExposureScope, NaiveDate, String), ProvinceExposure>,
    national: BTreeMap<(ExposureScope, NaiveDate), NationalExposure>,
    hotspots: BTreeMap<(Pollutant, NaiveDate), Vec<Hotspot>>,
}

impl Tables {
    fn allocate_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

/// Process-local store backed by ordered maps
#[derive(Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> AqResult<RwLockReadGuard<'_, Tables>> {
        self.tables
            .read()
            .map_err(|_| AqError::Processing("store lock poisoned".to_string()))
    }

    fn write(&self) -> AqResult<RwLockWriteGuard<'_, Tables>> {
        self.tables
            .write()
            .map_err(|_| AqError::Processing("store lock poisoned".to_string()))
    }
}

impl Store for InMemoryStore {
    fn upsert_raster(&self, mut raster: PollutantRaster) -> AqResult<u64> {
        let mut t = self.write()?;
        let key = (raster.pollutant, raster.date);
        let id = match t.raster_keys.get(&key) {
            Some(&id) => id,
            None if raster.id != 0 && !t.rasters.contains_key(&raster.id) => raster.id,
            None => t.allocate_id(),
        };
        raster.id = id;
        t.raster_keys.insert(key, id);
        t.rasters.insert(id, raster);
        Ok(id)
    }

    fn raster(&self, id: u64) -> AqResult<Option<PollutantRaster>> {
        Ok(self.read()?.rasters.get(&id).cloned())
    }

    fn raster_for(&self, pollutant: Pollutant, date: NaiveDate) -> AqResult<Option<PollutantRaster>> {
        let t = self.read()?;
        Ok(t.raster_keys
            .get(&(pollutant, date))
            .and_then(|id| t.rasters.get(id))
            .cloned())
    }

    fn rasters_between(
        &self,
        pollutant: Pollutant,
        start: NaiveDate,
        end: NaiveDate,
    ) -> AqResult<Vec<PollutantRaster>> {
        let t = self.read()?;
        Ok(t.raster_keys
            .range((pollutant, start)..=(pollutant, end))
            .filter_map(|(_, id)| t.rasters.get(id))
            .cloned()
            .collect())
    }

    fn rasters_before(&self, cutoff: NaiveDate) -> AqResult<Vec<PollutantRaster>> {
        let t = self.read()?;
        Ok(t.rasters.values().filter(|r| r.date < cutoff).cloned().collect())
    }

    fn delete_raster(&self, id: u64) -> AqResult<bool> {
        let mut t = self.write()?;
        match t.rasters.remove(&id) {
            Some(raster) => {
                t.raster_keys.remove(&(raster.pollutant, raster.date));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn upsert_station(&self, station: GroundStation) -> AqResult<()> {
        self.write()?.stations.insert(station.external_id.clone(), station);
        Ok(())
    }

    fn station(&self, external_id: &str) -> AqResult<Option<GroundStation>> {
        Ok(self.read()?.stations.get(external_id).cloned())
    }

    fn stations(&self, active_only: bool) -> AqResult<Vec<GroundStation>> {
        Ok(self
            .read()?
            .stations
            .values()
            .filter(|s| s.active || !active_only)
            .cloned()
            .collect())
    }

    fn set_station_active(&self, external_id: &str, active: bool) -> AqResult<bool> {
        let mut t = self.write()?;
        match t.stations.get_mut(external_id) {
            Some(station) => {
                station.active = active;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn upsert_reading(&self, reading: GroundReading) -> AqResult<()> {
        self.write()?.readings.insert(reading.key(), reading);
        Ok(())
    }

    fn readings_between(
        &self,
        pollutant: Pollutant,
        start: NaiveDate,
        end: NaiveDate,
    ) -> AqResult<Vec<GroundReading>> {
        Ok(self
            .read()?
            .readings
            .values()
            .filter(|r| r.pollutant == pollutant && (start..=end).contains(&r.date()))
            .cloned()
            .collect())
    }

    fn insert_model(&self, mut model: CorrectionModel) -> AqResult<u64> {
        let mut t = self.write()?;
        let id = t.allocate_id();
        model.id = id;
        if model.is_active {
            // Activation goes through activate_model
            model.is_active = false;
        }
        t.models.insert(id, model);
        Ok(id)
    }

    fn update_model(&self, model: &CorrectionModel) -> AqResult<()> {
        let mut t = self.write()?;
        let entry = t
            .models
            .get_mut(&model.id)
            .ok_or_else(|| AqError::InvalidInput(format!("Unknown correction model {}", model.id)))?;
        let is_active = entry.is_active;
        *entry = model.clone();
        entry.is_active = is_active;
        Ok(())
    }

    fn model(&self, id: u64) -> AqResult<Option<CorrectionModel>> {
        Ok(self.read()?.models.get(&id).cloned())
    }

    fn models(&self, pollutant: Pollutant) -> AqResult<Vec<CorrectionModel>> {
        Ok(self
            .read()?
            .models
            .values()
            .filter(|m| m.pollutant == pollutant)
            .cloned()
            .collect())
    }

    fn activate_model(&self, id: u64) -> AqResult<()> {
        let mut t = self.write()?;
        let pollutant = t
            .models
            .get(&id)
            .map(|m| m.pollutant)
            .ok_or_else(|| AqError::InvalidInput(format!("Unknown correction model {}", id)))?;

        for model in t.models.values_mut().filter(|m| m.pollutant == pollutant) {
            if model.id == id {
                model.is_active = true;
                model.status = ModelStatus::Active;
            } else {
                model.is_active = false;
                if model.status == ModelStatus::Active {
                    model.status = ModelStatus::Archived;
                }
            }
        }
        Ok(())
    }

    fn active_model(&self, pollutant: Pollutant) -> AqResult<Option<CorrectionModel>> {
        Ok(self
            .read()?
            .models
            .values()
            .find(|m| m.pollutant == pollutant && m.is_usable())
            .cloned())
    }

    fn upsert_calibration_points(&self, points: Vec<CalibrationPoint>) -> AqResult<()> {
        let mut t = self.write()?;
        for point in points {
            t.calibration
                .insert((point.model_id, point.station_id.clone(), point.date), point);
        }
        Ok(())
    }

    fn calibration_points(&self, model_id: u64) -> AqResult<Vec<CalibrationPoint>> {
        Ok(self
            .read()?
            .calibration
            .values()
            .filter(|p| p.model_id == model_id)
            .cloned()
            .collect())
    }

    fn upsert_run(&self, run: CorrectionRun) -> AqResult<()> {
        self.write()?.runs.insert((run.model_id, run.raster_id), run);
        Ok(())
    }

    fn run(&self, model_id: u64, raster_id: u64) -> AqResult<Option<CorrectionRun>> {
        Ok(self.read()?.runs.get(&(model_id, raster_id)).cloned())
    }

    fn upsert_district_exposures(&self, records: Vec<DistrictExposure>) -> AqResult<()> {
        let mut t = self.write()?;
        for record in records {
            t.districts
                .insert((record.scope, record.date, record.district_id.clone()), record);
        }
        Ok(())
    }

    fn district_exposures(&self, scope: ExposureScope, date: NaiveDate) -> AqResult<Vec<DistrictExposure>> {
        Ok(self
            .read()?
            .districts
            .values()
            .filter(|r| r.scope == scope && r.date == date)
            .cloned()
            .collect())
    }

    fn upsert_province_exposures(&self, records: Vec<ProvinceExposure>) -> AqResult<()> {
        let mut t = self.write()?;
        for record in records {
            t.provinces
                .insert((record.scope, record.date, record.province_id.clone()), record);
        }
        Ok(())
    }

    fn province_exposures(&self, scope: ExposureScope, date: NaiveDate) -> AqResult<Vec<ProvinceExposure>> {
        Ok(self
            .read()?
            .provinces
            .values()
            .filter(|r| r.scope == scope && r.date == date)
            .cloned()
            .collect())
    }

    fn upsert_national_exposure(&self, record: NationalExposure) -> AqResult<()> {
        self.write()?.national.insert((record.scope, record.date), record);
        Ok(())
    }

    fn national_exposure(&self, scope: ExposureScope, date: NaiveDate) -> AqResult<Option<NationalExposure>> {
        Ok(self.read()?.national.get(&(scope, date)).cloned())
    }

    fn replace_hotspots(&self, pollutant: Pollutant, date: NaiveDate, hotspots: Vec<Hotspot>) -> AqResult<()> {
        let mut t = self.write()?;
        t.hotspots.remove(&(pollutant, date));
        if !hotspots.is_empty() {
            t.hotspots.insert((pollutant, date), hotspots);
        }
        Ok(())
    }

    fn hotspots(&self, pollutant: Pollutant, date: NaiveDate) -> AqResult<Vec<Hotspot>> {
        Ok(self
            .read()?
            .hotspots
            .get(&(pollutant, date))
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::correction::ModelType;
    use crate::types::RasterRef;

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 11, day).unwrap()
    }

    #[test]
    fn test_raster_upsert_keeps_id() {
        let store = InMemoryStore::new();
        let id = store
            .upsert_raster(PollutantRaster::downloaded(Pollutant::NO2, date(3), RasterRef::path("a.tif")))
            .unwrap();
        let again = store
            .upsert_raster(PollutantRaster::downloaded(Pollutant::NO2, date(3), RasterRef::path("b.tif")))
            .unwrap();
        assert_eq!(id, again);
        assert_eq!(store.rasters_between(Pollutant::NO2, date(1), date(30)).unwrap().len(), 1);
        assert!(store.rasters_between(Pollutant::SO2, date(1), date(30)).unwrap().is_empty());
    }

    #[test]
    fn test_single_active_model_per_pollutant() {
        let store = InMemoryStore::new();
        let first = store
            .insert_model(CorrectionModel::training(Pollutant::PM25, ModelType::Linear, date(1), date(10)))
            .unwrap();
        let second = store
            .insert_model(CorrectionModel::training(Pollutant::PM25, ModelType::Gwr, date(1), date(20)))
            .unwrap();
        let other = store
            .insert_model(CorrectionModel::training(Pollutant::NO2, ModelType::Linear, date(1), date(20)))
            .unwrap();

        store.activate_model(first).unwrap();
        store.activate_model(other).unwrap();
        store.activate_model(second).unwrap();

        let active: Vec<_> = store
            .models(Pollutant::PM25)
            .unwrap()
            .into_iter()
            .filter(|m| m.is_active)
            .collect();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, second);
        assert_eq!(store.model(first).unwrap().unwrap().status, ModelStatus::Archived);
        assert_eq!(store.active_model(Pollutant::NO2).unwrap().unwrap().id, other);
    }

    #[test]
    fn test_hotspots_replaced_not_appended() {
        let store = InMemoryStore::new();
        store.replace_hotspots(Pollutant::PM25, date(2), Vec::new()).unwrap();
        assert!(store.hotspots(Pollutant::PM25, date(2)).unwrap().is_empty());
    }
}
