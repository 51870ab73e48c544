//! Applying the active correction model to stored rasters.

use crate::core::correction::{correct_grid, BiasCorrector, Corrector};
use crate::io::raster;
use crate::records::{CorrectionModel, CorrectionRun, PollutantRaster, RasterStatus};
use crate::store::Store;
use crate::types::{AqError, AqResult, RasterRef};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Loaded correction models, keyed by model id
///
/// A model file is read the first time it is needed and shared afterwards.
#[derive(Default)]
pub struct CorrectionService {
    cache: Mutex<HashMap<u64, Arc<Corrector>>>,
}

impl CorrectionService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn model_for(&self, record: &CorrectionModel) -> AqResult<Arc<Corrector>> {
        let mut cache = self
            .cache
            .lock()
            .map_err(|_| AqError::Processing("model cache lock poisoned".to_string()))?;
        if let Some(model) = cache.get(&record.id) {
            return Ok(Arc::clone(model));
        }

        let path = record.model_path.as_ref().ok_or_else(|| {
            AqError::Processing(format!("Correction model {} has no serialized file", record.id))
        })?;
        let model = Arc::new(Corrector::load(path)?);
        if model.model_type() != record.model_type {
            return Err(AqError::Processing(format!(
                "Model file {} holds a {} model, record {} says {}",
                path.display(),
                model.model_type(),
                record.id,
                record.model_type
            )));
        }
        cache.insert(record.id, Arc::clone(&model));
        Ok(model)
    }

    /// Drop a cached model, e.g. after it was archived
    pub fn invalidate(&self, model_id: u64) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.remove(&model_id);
        }
    }

    pub fn cached(&self) -> usize {
        self.cache.lock().map(|c| c.len()).unwrap_or(0)
    }
}

/// Correct one stored raster with its pollutant's active model
///
/// Fails with [`AqError::NoActiveModel`] when there is none; a default model
/// is never substituted. A raster that cannot enter `Correcting` is rejected
/// before any run is recorded; past that point the run and raster records are
/// persisted whether the correction succeeds or fails.
pub fn correct_raster_record(
    store: &dyn Store,
    service: &CorrectionService,
    raster_id: u64,
    output_dir: &Path,
) -> AqResult<CorrectionRun> {
    let mut record = store
        .raster(raster_id)?
        .ok_or_else(|| AqError::InvalidInput(format!("Unknown raster {}", raster_id)))?;
    let model = store
        .active_model(record.pollutant)?
        .ok_or(AqError::NoActiveModel(record.pollutant))?;
    let corrector = service.model_for(&model)?;

    record.transition(RasterStatus::Correcting)?;
    let mut run = CorrectionRun::pending(model.id, record.id);
    run.start();
    store.upsert_run(run.clone())?;
    store.upsert_raster(record.clone())?;

    match apply(&corrector, &record, output_dir) {
        Ok((output, stats)) => {
            run.succeed(output.file_path().map(Path::to_path_buf), stats.clone());
            record.mark_corrected(output, stats)?;
            log::info!(
                "Corrected {} {} with {} model {}",
                record.pollutant,
                record.date,
                model.model_type,
                model.id
            );
        }
        Err(e) => {
            run.fail(e.to_string());
            record.mark_failed(e.to_string())?;
            store.upsert_run(run)?;
            store.upsert_raster(record)?;
            return Err(e);
        }
    }

    store.upsert_run(run.clone())?;
    store.upsert_raster(record)?;
    Ok(run)
}

fn apply(
    corrector: &Corrector,
    record: &PollutantRaster,
    output_dir: &Path,
) -> AqResult<(RasterRef, raster::ZonalStats)> {
    match &record.raw {
        RasterRef::Path(input) => {
            let output = output_dir.join(format!(
                "{}_{}_corrected.tif",
                record.pollutant.code(),
                record.date.format("%Y%m%d")
            ));
            let output = corrector.correct_raster(input, &output)?;
            let stats = raster::zonal_stats(&output, 1, None)?;
            Ok((RasterRef::Path(output), stats))
        }
        RasterRef::Memory(grid) => {
            if !corrector.is_fitted() {
                return Err(AqError::NotFitted);
            }
            let corrected = correct_grid(grid, |x, coords| corrector.predict(x, coords))?;
            let stats = raster::zonal_stats_grid(&corrected, None)?;
            Ok((RasterRef::memory(corrected), stats))
        }
    }
}
