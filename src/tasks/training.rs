//! Model training: assemble, select, fit, validate, persist, activate.

use crate::core::correction::{BiasCorrector, Corrector, GwrCorrector, GwrParams, LinearCorrector};
use crate::core::training::{TrainingDataAssembler, TrainingParams, TrainingSet};
use crate::records::{CalibrationPoint, CorrectionModel, GwrDiagnostics, ModelStatus};
use crate::store::Store;
use crate::types::{AqResult, Pollutant};
use chrono::{Days, NaiveDate};

/// Trains and registers correction models
pub struct ModelTrainer<'a> {
    store: &'a dyn Store,
    params: TrainingParams,
    gwr: GwrParams,
}

impl<'a> ModelTrainer<'a> {
    pub fn new(store: &'a dyn Store, params: TrainingParams, gwr: GwrParams) -> Self {
        Self { store, params, gwr }
    }

    /// GWR with enough distinct stations, linear otherwise
    pub fn select_corrector(&self, n_stations: usize) -> Corrector {
        if n_stations >= self.params.gwr_station_threshold {
            Corrector::Gwr(GwrCorrector::new(self.gwr.clone()))
        } else {
            Corrector::Linear(LinearCorrector::new())
        }
    }

    /// Train on the `lookback_days` ending at `end` and make the result the
    /// active model for `pollutant`
    ///
    /// Data insufficiency is returned before any model record is created. Any
    /// later failure (fit, validation, serialization or calibration points)
    /// leaves a FAILED record behind.
    pub fn train(&self, pollutant: Pollutant, end: NaiveDate) -> AqResult<CorrectionModel> {
        let start = end
            .checked_sub_days(Days::new(u64::from(self.params.lookback_days)))
            .unwrap_or(end);
        let set = TrainingDataAssembler::new(self.store)
            .with_band(self.params.band)
            .assemble(pollutant, start, end, self.params.min_stations)?;

        let mut corrector = self.select_corrector(set.n_stations());
        let mut record = CorrectionModel::training(pollutant, corrector.model_type(), start, end);
        record.n_samples = set.len();
        record.n_stations = set.n_stations();
        record.id = self.store.insert_model(record.clone())?;
        log::info!(
            "Training {} model {} for {} on {} samples from {} stations",
            corrector.model_type(),
            record.id,
            pollutant,
            record.n_samples,
            record.n_stations
        );

        let outcome = self
            .fit_and_save(&mut corrector, &set, &mut record)
            .and_then(|()| calibration_points(record.id, &corrector, &set))
            .and_then(|points| self.store.upsert_calibration_points(points));
        if let Err(e) = outcome {
            log::error!("Training {} model {} failed: {}", pollutant, record.id, e);
            record.status = ModelStatus::Failed;
            record.error_message = Some(e.to_string());
            self.store.update_model(&record)?;
            return Err(e);
        }

        self.store.update_model(&record)?;
        self.store.activate_model(record.id)?;

        let active = self.store.model(record.id)?.unwrap_or(record);
        log::info!(
            "Activated {} model {} for {} (R²={:.3})",
            active.model_type,
            active.id,
            pollutant,
            active.metrics.as_ref().map(|m| m.r_squared).unwrap_or(f64::NAN)
        );
        Ok(active)
    }

    fn fit_and_save(&self, corrector: &mut Corrector, set: &TrainingSet, record: &mut CorrectionModel) -> AqResult<()> {
        corrector.fit(&set.x, &set.y, &set.coords)?;

        match corrector.cross_validate(&set.x, &set.y, &set.coords, self.params.cv_folds) {
            Ok(cv) => corrector.set_cross_validation(&cv),
            Err(e) if e.is_data_insufficiency() => {
                log::warn!("Skipping cross-validation for model {}: {}", record.id, e);
            }
            Err(e) => return Err(e),
        }

        let path = self.params.model_dir.join(format!(
            "{}_{}_{}.json",
            record.pollutant.code(),
            record.model_type,
            record.id
        ));
        corrector.save(&path)?;

        record.model_path = Some(path);
        record.metrics = corrector.metrics().cloned();
        record.gwr = match &*corrector {
            Corrector::Gwr(gwr) => gwr.local_r2_summary().map(|(min, max, mean)| GwrDiagnostics {
                bandwidth_km: gwr.bandwidth,
                kernel: gwr.params.kernel,
                local_r2_min: min,
                local_r2_max: max,
                local_r2_mean: mean,
            }),
            _ => None,
        };
        record.status = ModelStatus::Active;
        Ok(())
    }
}

/// One diagnostic point per training sample
fn calibration_points(model_id: u64, corrector: &Corrector, set: &TrainingSet) -> AqResult<Vec<CalibrationPoint>> {
    let predicted = corrector.predict(&set.x, &set.coords)?;
    Ok((0..set.len())
        .map(|i| {
            let local = match corrector {
                Corrector::Gwr(gwr) => gwr.coefficients_at(set.coords[i].0, set.coords[i].1),
                _ => None,
            };
            CalibrationPoint {
                model_id,
                station_id: set.station_ids[i].clone(),
                date: set.dates[i],
                ground_value: set.y[i],
                satellite_value: set.x[i],
                corrected_value: predicted[i],
                residual: set.y[i] - predicted[i],
                local_intercept: local.map(|c| c[0]),
                local_slope: local.map(|c| c[1]),
            }
        })
        .collect())
}
