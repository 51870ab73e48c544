use super::{
    clamp_concentration, compute_metrics, validate_prediction, validate_training,
    weighted_linear_fit, BiasCorrector, CorrectionMetrics, ModelType,
};
use crate::types::{AqError, AqResult};
use serde::{Deserialize, Serialize};

/// Huber-loss linear correction fitted by iteratively reweighted least squares
///
/// Less sensitive than [`super::LinearCorrector`] to stations with
/// instrument faults or local sources the satellite cannot see.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RobustLinearCorrector {
    /// Huber threshold in units of the robust residual scale
    pub huber_k: f64,
    pub max_iterations: usize,
    pub intercept: f64,
    pub slope: f64,
    /// Final IRLS weight of each training sample
    pub sample_weights: Vec<f64>,
    pub(crate) metrics: Option<CorrectionMetrics>,
}

impl Default for RobustLinearCorrector {
    fn default() -> Self {
        Self {
            huber_k: 1.345,  // 95% efficiency under normal errors
            max_iterations: 50,
            intercept: 0.0,
            slope: 0.0,
            sample_weights: Vec::new(),
            metrics: None,
        }
    }
}

impl RobustLinearCorrector {
    pub const MIN_SAMPLES: usize = 5;

    pub fn new() -> Self {
        Self::default()
    }
}

/// Median absolute deviation scaled to a normal standard deviation
fn robust_scale(residuals: &[f64]) -> f64 {
    let mut abs: Vec<f64> = residuals.iter().map(|r| r.abs()).collect();
    abs.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let n = abs.len();
    if n == 0 {
        return 0.0;
    }
    let median = if n % 2 == 0 {
        (abs[n / 2 - 1] + abs[n / 2]) / 2.0
    } else {
        abs[n / 2]
    };
    median / 0.6745
}

impl BiasCorrector for RobustLinearCorrector {
    fn model_type(&self) -> ModelType {
        ModelType::Robust
    }

    fn min_samples(&self) -> usize {
        Self::MIN_SAMPLES
    }

    fn fit(&mut self, x: &[f64], y: &[f64], coords: &[(f64, f64)]) -> AqResult<()> {
        validate_training(x, y, coords, Self::MIN_SAMPLES, "Robust linear")?;

        let mut weights = vec![1.0; x.len()];
        let (mut a, mut b) = weighted_linear_fit(x, y, &weights).ok_or_else(|| {
            AqError::InsufficientData("Satellite values have no variance".to_string())
        })?;

        for iteration in 0..self.max_iterations {
            let residuals: Vec<f64> = x.iter().zip(y).map(|(xi, yi)| yi - (a + b * xi)).collect();
            let scale = robust_scale(&residuals);
            if scale <= f64::EPSILON {
                log::debug!("Robust fit converged to exact line after {} iterations", iteration);
                break;
            }

            for (w, r) in weights.iter_mut().zip(&residuals) {
                let u = r.abs() / scale;
                *w = if u <= self.huber_k { 1.0 } else { self.huber_k / u };
            }

            let Some((new_a, new_b)) = weighted_linear_fit(x, y, &weights) else {
                break;
            };
            let change = (new_a - a).abs() + (new_b - b).abs();
            a = new_a;
            b = new_b;
            if change < 1e-10 * (1.0 + a.abs() + b.abs()) {
                log::debug!("Robust fit converged after {} iterations", iteration + 1);
                break;
            }
        }

        self.intercept = a;
        self.slope = b;
        self.sample_weights = weights;

        let predicted: Vec<f64> = x.iter().map(|&v| clamp_concentration(a + b * v)).collect();
        let metrics = compute_metrics(y, &predicted);
        log::info!(
            "Robust correction fitted: intercept={:.4}, slope={:.4}, R²={:.3}, downweighted={}",
            a,
            b,
            metrics.r_squared,
            self.sample_weights.iter().filter(|w| **w < 1.0).count()
        );
        self.metrics = Some(metrics);
        Ok(())
    }

    fn predict(&self, x: &[f64], coords: &[(f64, f64)]) -> AqResult<Vec<f64>> {
        if self.metrics.is_none() {
            return Err(AqError::NotFitted);
        }
        validate_prediction(x, coords)?;
        Ok(x
            .iter()
            .map(|&v| clamp_concentration(self.intercept + self.slope * v))
            .collect())
    }

    fn metrics(&self) -> Option<&CorrectionMetrics> {
        self.metrics.as_ref()
    }

    fn fresh(&self) -> Self {
        Self {
            huber_k: self.huber_k,
            max_iterations: self.max_iterations,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_robust_resists_outlier() {
        let x: Vec<f64> = (0..12).map(|i| 10.0 + i as f64).collect();
        let mut y: Vec<f64> = x.iter().map(|v| 0.8 * v + 1.0).collect();
        y[11] = 500.0;
        let coords: Vec<(f64, f64)> = (0..12).map(|i| (70.0 + i as f64 * 0.05, 30.0)).collect();

        let mut robust = RobustLinearCorrector::new();
        robust.fit(&x, &y, &coords).unwrap();
        assert!((robust.slope - 0.8).abs() < 0.05);
        assert!(robust.sample_weights[11] < 0.1);

        let mut ols = super::super::LinearCorrector::new();
        ols.fit(&x, &y, &coords).unwrap();
        assert!((ols.slope - 0.8).abs() > (robust.slope - 0.8).abs());
    }

    #[test]
    fn test_minimum_samples() {
        let mut model = RobustLinearCorrector::new();
        let coords = vec![(70.0, 30.0); 4];
        let result = model.fit(&[1.0, 2.0, 3.0, 4.0], &[1.0, 2.0, 3.0, 4.0], &coords);
        assert!(matches!(result, Err(AqError::InsufficientData(_))));
    }
}
