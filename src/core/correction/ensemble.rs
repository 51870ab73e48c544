use super::{
    clamp_concentration, compute_metrics, validate_prediction, validate_training, BiasCorrector,
    CorrectionMetrics, Corrector, GwrCorrector, GwrParams, LinearCorrector, ModelType,
    RobustLinearCorrector,
};
use crate::types::{AqError, AqResult};
use serde::{Deserialize, Serialize};

/// Inverse-MSE weighted blend of several correctors
///
/// Members that cannot be fitted on the available samples (for instance GWR
/// below its station floor) are left out of that fit's blend. The configured
/// member list never changes, so a later fit on more samples can use them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnsembleCorrector {
    /// Configured strategies, unfitted
    pub members: Vec<Corrector>,
    /// Fitted members with blend weights summing to 1
    #[serde(default)]
    pub fitted: Vec<(Corrector, f64)>,
    pub(crate) metrics: Option<CorrectionMetrics>,
}

impl Default for EnsembleCorrector {
    fn default() -> Self {
        Self::new(vec![
            Corrector::Linear(LinearCorrector::new()),
            Corrector::Robust(RobustLinearCorrector::new()),
            Corrector::Gwr(GwrCorrector::new(GwrParams::default())),
        ])
    }
}

impl EnsembleCorrector {
    pub fn new(members: Vec<Corrector>) -> Self {
        Self {
            members,
            fitted: Vec::new(),
            metrics: None,
        }
    }

    pub(crate) fn restore_members(&mut self) {
        for (member, _) in &mut self.fitted {
            member.restore();
        }
    }
}

impl BiasCorrector for EnsembleCorrector {
    fn model_type(&self) -> ModelType {
        ModelType::Ensemble
    }

    fn min_samples(&self) -> usize {
        self.members.iter().map(|m| m.min_samples()).min().unwrap_or(usize::MAX)
    }

    fn fit(&mut self, x: &[f64], y: &[f64], coords: &[(f64, f64)]) -> AqResult<()> {
        if self.members.is_empty() {
            return Err(AqError::InvalidInput("Ensemble has no members".to_string()));
        }
        validate_training(x, y, coords, self.min_samples(), "Ensemble")?;

        let mut fitted = Vec::with_capacity(self.members.len());
        let mut inverse_mse = Vec::with_capacity(self.members.len());
        for member in &self.members {
            let mut candidate = member.fresh();
            match candidate.fit(x, y, coords) {
                Ok(()) => {}
                Err(e) if e.is_data_insufficiency() => {
                    log::debug!("Ensemble member {} skipped: {}", member.model_type(), e);
                    continue;
                }
                Err(e) => return Err(e),
            }
            let rmse = candidate.metrics().map(|m| m.rmse).unwrap_or(f64::INFINITY);
            inverse_mse.push(1.0 / rmse.powi(2).max(1e-12));
            fitted.push(candidate);
        }

        if fitted.is_empty() {
            return Err(AqError::InsufficientData(
                "No ensemble member could be fitted".to_string(),
            ));
        }

        let total: f64 = inverse_mse.iter().sum();
        self.fitted = fitted
            .into_iter()
            .zip(inverse_mse)
            .map(|(member, w)| (member, w / total))
            .collect();

        let predicted = self.blend(x, coords)?;
        let metrics = compute_metrics(y, &predicted);
        log::info!(
            "Ensemble correction fitted: members=[{}], R²={:.3}, RMSE={:.3}",
            self.fitted
                .iter()
                .map(|(m, w)| format!("{}:{:.2}", m.model_type(), w))
                .collect::<Vec<_>>()
                .join(", "),
            metrics.r_squared,
            metrics.rmse
        );
        self.metrics = Some(metrics);
        Ok(())
    }

    fn predict(&self, x: &[f64], coords: &[(f64, f64)]) -> AqResult<Vec<f64>> {
        if self.metrics.is_none() {
            return Err(AqError::NotFitted);
        }
        validate_prediction(x, coords)?;
        self.blend(x, coords)
    }

    fn metrics(&self) -> Option<&CorrectionMetrics> {
        self.metrics.as_ref()
    }

    fn fresh(&self) -> Self {
        Self::new(self.members.iter().map(|m| m.fresh()).collect())
    }
}

impl EnsembleCorrector {
    fn blend(&self, x: &[f64], coords: &[(f64, f64)]) -> AqResult<Vec<f64>> {
        let mut out = vec![0.0; x.len()];
        for (member, w) in &self.fitted {
            let predicted = member.predict(x, coords)?;
            for (acc, p) in out.iter_mut().zip(predicted) {
                *acc += *w * p;
            }
        }
        Ok(out.into_iter().map(clamp_concentration).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ensemble_skips_underpowered_members() {
        // Six samples: enough for linear and robust, not for GWR
        let x = [10.0, 20.0, 30.0, 40.0, 50.0, 60.0];
        let y: Vec<f64> = x.iter().map(|v| 0.5 * v + 3.0).collect();
        let coords: Vec<(f64, f64)> = (0..6).map(|i| (70.0 + i as f64 * 0.1, 30.0)).collect();

        let mut ensemble = EnsembleCorrector::default();
        ensemble.fit(&x, &y, &coords).unwrap();

        assert_eq!(ensemble.members.len(), 3);
        assert_eq!(ensemble.fitted.len(), 2);
        assert!(ensemble.fitted.iter().all(|(m, _)| m.model_type() != ModelType::Gwr));
        let total: f64 = ensemble.fitted.iter().map(|(_, w)| w).sum();
        assert!((total - 1.0).abs() < 1e-12);

        let out = ensemble.predict(&[100.0, f64::NAN, -50.0], &coords[..3]).unwrap();
        assert!((out[0] - 53.0).abs() < 1e-6);
        assert!(out[1].is_nan());
        assert_eq!(out[2], 0.0);
    }

    #[test]
    fn test_refit_with_more_stations_uses_gwr() {
        let mut ensemble = EnsembleCorrector::default();

        let x = [10.0, 20.0, 30.0, 40.0, 50.0, 60.0];
        let y: Vec<f64> = x.iter().map(|v| 0.5 * v + 3.0).collect();
        let coords: Vec<(f64, f64)> = (0..6).map(|i| (70.0 + i as f64 * 0.1, 30.0)).collect();
        ensemble.fit(&x, &y, &coords).unwrap();
        assert_eq!(ensemble.fitted.len(), 2);

        // 15 stations spread over a degree
        let mut x = Vec::new();
        let mut y = Vec::new();
        let mut coords = Vec::new();
        for i in 0..15 {
            let lon = 70.0 + (i % 5) as f64 * 0.25;
            let lat = 30.0 + (i / 5) as f64 * 0.5;
            let sat = 25.0 + 4.0 * i as f64;
            x.push(sat);
            y.push((0.6 + 0.3 * (lon - 70.0)) * sat + 1.0 + 0.4 * (i as f64).sin());
            coords.push((lon, lat));
        }
        ensemble.fit(&x, &y, &coords).unwrap();

        assert_eq!(ensemble.members.len(), 3);
        assert_eq!(ensemble.fitted.len(), 3);
        assert!(ensemble.fitted.iter().any(|(m, _)| m.model_type() == ModelType::Gwr));
    }

    #[test]
    fn test_saved_ensemble_keeps_configuration() {
        let x: Vec<f64> = (0..12).map(|i| 15.0 + 5.0 * i as f64).collect();
        let y: Vec<f64> = x.iter().enumerate().map(|(i, v)| 0.8 * v + (i % 3) as f64).collect();
        let coords: Vec<(f64, f64)> =
            (0..12).map(|i| (70.0 + (i % 4) as f64 * 0.3, 30.0 + (i / 4) as f64 * 0.3)).collect();

        let mut model = Corrector::Ensemble(EnsembleCorrector::default());
        model.fit(&x, &y, &coords).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ensemble.json");
        model.save(&path).unwrap();
        let loaded = Corrector::load(&path).unwrap();

        let Corrector::Ensemble(ensemble) = &loaded else {
            panic!("expected an ensemble, got {}", loaded.model_type());
        };
        assert_eq!(ensemble.members.len(), 3);
        assert!(ensemble.members.iter().all(|m| !m.is_fitted()));

        let q = [40.0, 75.0];
        let qc = [(70.1, 30.1), (70.7, 30.5)];
        let before = model.predict(&q, &qc).unwrap();
        let after = loaded.predict(&q, &qc).unwrap();
        for (a, b) in before.iter().zip(&after) {
            assert!((a - b).abs() < 1e-9);
        }
    }

    #[test]
    fn test_fresh_ensemble_is_unfitted() {
        let ensemble = EnsembleCorrector::default();
        assert!(!ensemble.fresh().is_fitted());
        assert_eq!(ensemble.min_samples(), LinearCorrector::MIN_SAMPLES);
    }
}
