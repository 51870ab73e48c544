use super::{
    clamp_concentration, compute_metrics, validate_prediction, validate_training, BiasCorrector,
    CorrectionMetrics, ModelType,
};
use crate::types::{AqError, AqResult};
use serde::{Deserialize, Serialize};

/// Global `ground = intercept + slope × satellite` correction
///
/// The predictor is standardized before fitting; the stored coefficients
/// are back-transformed to raw satellite units.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LinearCorrector {
    /// Ridge penalty on the standardized slope (0 = ordinary least squares)
    pub alpha: f64,
    pub intercept: f64,
    pub slope: f64,
    pub x_mean: f64,
    pub x_std: f64,
    pub(crate) metrics: Option<CorrectionMetrics>,
}

impl LinearCorrector {
    pub const MIN_SAMPLES: usize = 3;

    pub fn new() -> Self {
        Self::default()
    }

    pub fn ridge(alpha: f64) -> Self {
        Self {
            alpha: alpha.max(0.0),
            ..Self::default()
        }
    }

    /// Construct a fitted model from known coefficients
    pub fn from_coefficients(intercept: f64, slope: f64) -> Self {
        Self {
            intercept,
            slope,
            metrics: Some(CorrectionMetrics::default()),
            ..Self::default()
        }
    }

    #[inline]
    fn apply(&self, x: f64) -> f64 {
        clamp_concentration(self.intercept + self.slope * x)
    }
}

impl BiasCorrector for LinearCorrector {
    fn model_type(&self) -> ModelType {
        ModelType::Linear
    }

    fn min_samples(&self) -> usize {
        Self::MIN_SAMPLES
    }

    fn fit(&mut self, x: &[f64], y: &[f64], coords: &[(f64, f64)]) -> AqResult<()> {
        validate_training(x, y, coords, Self::MIN_SAMPLES, "Linear")?;

        let n = x.len() as f64;
        let x_mean = x.iter().sum::<f64>() / n;
        let y_mean = y.iter().sum::<f64>() / n;
        let x_std = (x.iter().map(|v| (v - x_mean).powi(2)).sum::<f64>() / n).sqrt();

        if x_std == 0.0 || x_std <= 1e-12 * x_mean.abs() {
            return Err(AqError::InsufficientData(
                "Satellite values have no variance".to_string(),
            ));
        }

        let mut szz = 0.0;
        let mut szy = 0.0;
        for (xi, yi) in x.iter().zip(y) {
            let z = (xi - x_mean) / x_std;
            szz += z * z;
            szy += z * (yi - y_mean);
        }
        let slope_std = szy / (szz + self.alpha);

        self.x_mean = x_mean;
        self.x_std = x_std;
        self.slope = slope_std / x_std;
        self.intercept = y_mean - self.slope * x_mean;

        let predicted: Vec<f64> = x.iter().map(|&v| self.apply(v)).collect();
        let metrics = compute_metrics(y, &predicted);
        log::info!(
            "Linear correction fitted: intercept={:.4}, slope={:.4}, R²={:.3}, RMSE={:.3}, n={}",
            self.intercept,
            self.slope,
            metrics.r_squared,
            metrics.rmse,
            metrics.n_samples
        );
        self.metrics = Some(metrics);
        Ok(())
    }

    fn predict(&self, x: &[f64], coords: &[(f64, f64)]) -> AqResult<Vec<f64>> {
        if self.metrics.is_none() {
            return Err(AqError::NotFitted);
        }
        validate_prediction(x, coords)?;
        Ok(x.iter().map(|&v| self.apply(v)).collect())
    }

    fn metrics(&self) -> Option<&CorrectionMetrics> {
        self.metrics.as_ref()
    }

    fn fresh(&self) -> Self {
        Self::ridge(self.alpha)
    }
}
