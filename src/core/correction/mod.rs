//! Satellite-to-ground bias correction models
//!
//! Every corrector implements [`BiasCorrector`]; [`Corrector`] is the closed
//! set of strategies that can be persisted and applied to rasters.

pub mod ensemble;
pub mod gwr;
pub mod linear;
pub mod robust;

pub use ensemble::EnsembleCorrector;
pub use gwr::{BandwidthSelection, GwrCorrector, GwrParams, Kernel};
pub use linear::LinearCorrector;
pub use robust::RobustLinearCorrector;

use crate::io::raster;
use crate::types::{AqError, AqResult, Grid};
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Fixed seed for fold assignment
pub const CV_SEED: u64 = 42;

/// Pixels predicted per batch when correcting a raster
const PREDICT_CHUNK: usize = 65_536;

/// Strategy used by a trained model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModelType {
    Gwr,
    Linear,
    Robust,
    Ensemble,
}

impl std::fmt::Display for ModelType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelType::Gwr => write!(f, "GWR"),
            ModelType::Linear => write!(f, "LINEAR"),
            ModelType::Robust => write!(f, "ROBUST"),
            ModelType::Ensemble => write!(f, "ENSEMBLE"),
        }
    }
}

/// Goodness-of-fit of a correction model against ground truth
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CorrectionMetrics {
    pub r_squared: f64,
    pub rmse: f64,
    pub mae: f64,
    /// Mean of (predicted - observed)
    pub bias: f64,
    pub n_samples: usize,
    pub cv_r_squared: Option<f64>,
    pub cv_rmse: Option<f64>,
    pub cv_mae: Option<f64>,
}

/// Out-of-fold performance from k-fold cross-validation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossValidation {
    pub cv_r_squared: f64,
    pub cv_rmse: f64,
    pub cv_mae: f64,
    pub n_folds: usize,
    pub fold_rmse: Vec<f64>,
}

/// Common fit/predict contract of all correction strategies
pub trait BiasCorrector {
    fn model_type(&self) -> ModelType;

    /// Smallest sample count `fit` accepts
    fn min_samples(&self) -> usize;

    /// Fit against satellite values `x`, ground values `y` at `coords` (lon, lat)
    fn fit(&mut self, x: &[f64], y: &[f64], coords: &[(f64, f64)]) -> AqResult<()>;

    /// Corrected values; NaN inputs give NaN, everything else is non-negative
    fn predict(&self, x: &[f64], coords: &[(f64, f64)]) -> AqResult<Vec<f64>>;

    fn metrics(&self) -> Option<&CorrectionMetrics>;

    fn is_fitted(&self) -> bool {
        self.metrics().is_some()
    }

    /// An unfitted instance with the same configuration
    fn fresh(&self) -> Self
    where
        Self: Sized;
}

/// Closed set of correction strategies
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "model_type", rename_all = "snake_case")]
pub enum Corrector {
    Linear(LinearCorrector),
    Gwr(GwrCorrector),
    Robust(RobustLinearCorrector),
    Ensemble(EnsembleCorrector),
}

impl BiasCorrector for Corrector {
    fn model_type(&self) -> ModelType {
        match self {
            Corrector::Linear(m) => m.model_type(),
            Corrector::Gwr(m) => m.model_type(),
            Corrector::Robust(m) => m.model_type(),
            Corrector::Ensemble(m) => m.model_type(),
        }
    }

    fn min_samples(&self) -> usize {
        match self {
            Corrector::Linear(m) => m.min_samples(),
            Corrector::Gwr(m) => m.min_samples(),
            Corrector::Robust(m) => m.min_samples(),
            Corrector::Ensemble(m) => m.min_samples(),
        }
    }

    fn fit(&mut self, x: &[f64], y: &[f64], coords: &[(f64, f64)]) -> AqResult<()> {
        match self {
            Corrector::Linear(m) => m.fit(x, y, coords),
            Corrector::Gwr(m) => m.fit(x, y, coords),
            Corrector::Robust(m) => m.fit(x, y, coords),
            Corrector::Ensemble(m) => m.fit(x, y, coords),
        }
    }

    fn predict(&self, x: &[f64], coords: &[(f64, f64)]) -> AqResult<Vec<f64>> {
        match self {
            Corrector::Linear(m) => m.predict(x, coords),
            Corrector::Gwr(m) => m.predict(x, coords),
            Corrector::Robust(m) => m.predict(x, coords),
            Corrector::Ensemble(m) => m.predict(x, coords),
        }
    }

    fn metrics(&self) -> Option<&CorrectionMetrics> {
        match self {
            Corrector::Linear(m) => m.metrics(),
            Corrector::Gwr(m) => m.metrics(),
            Corrector::Robust(m) => m.metrics(),
            Corrector::Ensemble(m) => m.metrics(),
        }
    }

    fn fresh(&self) -> Self {
        match self {
            Corrector::Linear(m) => Corrector::Linear(m.fresh()),
            Corrector::Gwr(m) => Corrector::Gwr(m.fresh()),
            Corrector::Robust(m) => Corrector::Robust(m.fresh()),
            Corrector::Ensemble(m) => Corrector::Ensemble(m.fresh()),
        }
    }
}

impl Corrector {
    /// Record cross-validation results into the model's metrics
    pub fn set_cross_validation(&mut self, cv: &CrossValidation) {
        let metrics = match self {
            Corrector::Linear(m) => m.metrics.as_mut(),
            Corrector::Gwr(m) => m.metrics.as_mut(),
            Corrector::Robust(m) => m.metrics.as_mut(),
            Corrector::Ensemble(m) => m.metrics.as_mut(),
        };
        if let Some(metrics) = metrics {
            metrics.cv_r_squared = Some(cv.cv_r_squared);
            metrics.cv_rmse = Some(cv.cv_rmse);
            metrics.cv_mae = Some(cv.cv_mae);
        }
    }

    /// Local [intercept, slope] at each distinct training location, when the
    /// model has them
    pub fn local_parameters(&self) -> Option<&[[f64; 2]]> {
        match self {
            Corrector::Gwr(m) => m.local_params(),
            _ => None,
        }
    }

    /// Serialize fitted state to a JSON file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> AqResult<()> {
        let path = path.as_ref();
        if !self.is_fitted() {
            return Err(AqError::NotFitted);
        }

        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)?;

        // Write then rename so readers never see a partial model
        let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
        serde_json::to_writer(&mut tmp, self)?;
        tmp.flush()?;
        tmp.persist(path).map_err(|e| AqError::Io(e.error))?;

        log::info!("Saved {} correction model to {}", self.model_type(), path.display());
        Ok(())
    }

    /// Load a model written by [`Corrector::save`]
    pub fn load<P: AsRef<Path>>(path: P) -> AqResult<Self> {
        let path = path.as_ref();
        let file = std::fs::File::open(path)?;
        let mut model: Corrector = serde_json::from_reader(std::io::BufReader::new(file))?;
        model.restore();
        log::debug!("Loaded {} correction model from {}", model.model_type(), path.display());
        Ok(model)
    }

    /// Rebuild state that is not serialized
    fn restore(&mut self) {
        match self {
            Corrector::Gwr(m) => m.rebuild_index(),
            Corrector::Ensemble(m) => m.restore_members(),
            Corrector::Linear(_) | Corrector::Robust(_) => {}
        }
    }

    /// Apply this model to every valid pixel of `input_path`
    pub fn correct_raster<P: AsRef<Path>, Q: AsRef<Path>>(
        &self,
        input_path: P,
        output_path: Q,
    ) -> AqResult<PathBuf> {
        if !self.is_fitted() {
            return Err(AqError::NotFitted);
        }
        correct_raster(input_path, output_path, |x, coords| self.predict(x, coords))
    }

    /// k-fold cross-validation using fresh instances of this configuration
    pub fn cross_validate(
        &self,
        x: &[f64],
        y: &[f64],
        coords: &[(f64, f64)],
        n_folds: usize,
    ) -> AqResult<CrossValidation> {
        cross_validate(|| self.fresh(), x, y, coords, n_folds, CV_SEED)
    }
}

/// Reject mismatched or non-finite training inputs
pub(crate) fn validate_training(
    x: &[f64],
    y: &[f64],
    coords: &[(f64, f64)],
    min_samples: usize,
    method: &str,
) -> AqResult<()> {
    if x.len() != y.len() || x.len() != coords.len() {
        return Err(AqError::InvalidInput(format!(
            "Training arrays differ in length: x={}, y={}, coords={}",
            x.len(),
            y.len(),
            coords.len()
        )));
    }
    if x.len() < min_samples {
        return Err(AqError::InsufficientData(format!(
            "{} correction needs at least {} samples, got {}",
            method,
            min_samples,
            x.len()
        )));
    }
    let finite = x.iter().chain(y.iter()).all(|v| v.is_finite())
        && coords.iter().all(|(lon, lat)| lon.is_finite() && lat.is_finite());
    if !finite {
        return Err(AqError::InvalidInput(
            "Training data contains non-finite values".to_string(),
        ));
    }
    Ok(())
}

pub(crate) fn validate_prediction(x: &[f64], coords: &[(f64, f64)]) -> AqResult<()> {
    if x.len() != coords.len() {
        return Err(AqError::InvalidInput(format!(
            "Prediction arrays differ in length: x={}, coords={}",
            x.len(),
            coords.len()
        )));
    }
    Ok(())
}

/// Concentrations cannot be negative; NaN stays NaN
#[inline]
pub(crate) fn clamp_concentration(value: f64) -> f64 {
    if value.is_nan() {
        value
    } else {
        value.max(0.0)
    }
}

/// Goodness-of-fit of `predicted` against `observed`
pub fn compute_metrics(observed: &[f64], predicted: &[f64]) -> CorrectionMetrics {
    let pairs: Vec<(f64, f64)> = observed
        .iter()
        .zip(predicted.iter())
        .filter(|(o, p)| o.is_finite() && p.is_finite())
        .map(|(&o, &p)| (o, p))
        .collect();

    let n = pairs.len();
    if n == 0 {
        return CorrectionMetrics::default();
    }

    let nf = n as f64;
    let mean_obs = pairs.iter().map(|(o, _)| o).sum::<f64>() / nf;
    let ss_tot: f64 = pairs.iter().map(|(o, _)| (o - mean_obs).powi(2)).sum();
    let ss_res: f64 = pairs.iter().map(|(o, p)| (o - p).powi(2)).sum();

    let r_squared = if ss_tot > 0.0 {
        1.0 - ss_res / ss_tot
    } else if ss_res == 0.0 {
        1.0
    } else {
        0.0
    };

    CorrectionMetrics {
        r_squared,
        rmse: (ss_res / nf).sqrt(),
        mae: pairs.iter().map(|(o, p)| (o - p).abs()).sum::<f64>() / nf,
        bias: pairs.iter().map(|(o, p)| p - o).sum::<f64>() / nf,
        n_samples: n,
        cv_r_squared: None,
        cv_rmse: None,
        cv_mae: None,
    }
}

/// Weighted least squares for `y = a + b·x`, returning (a, b)
///
/// `None` when the weighted predictor has no spread.
pub(crate) fn weighted_linear_fit(x: &[f64], y: &[f64], w: &[f64]) -> Option<(f64, f64)> {
    let sw: f64 = w.iter().sum();
    if sw <= 0.0 || !sw.is_finite() {
        return None;
    }

    let xm = x.iter().zip(w).map(|(xi, wi)| xi * wi).sum::<f64>() / sw;
    let ym = y.iter().zip(w).map(|(yi, wi)| yi * wi).sum::<f64>() / sw;

    let mut sxx = 0.0;
    let mut sxy = 0.0;
    let mut max_abs = 0.0f64;
    for ((xi, yi), wi) in x.iter().zip(y).zip(w) {
        if *wi <= 0.0 {
            continue;
        }
        let dx = xi - xm;
        sxx += wi * dx * dx;
        sxy += wi * dx * (yi - ym);
        max_abs = max_abs.max(xi.abs());
    }

    if sxx / sw <= (1e-10 * max_abs).powi(2) || sxx <= 0.0 {
        return None;
    }

    let b = sxy / sxx;
    Some((ym - b * xm, b))
}

/// Predict every valid pixel of an in-memory grid
pub fn correct_grid<F>(grid: &Grid, predict: F) -> AqResult<Grid>
where
    F: Fn(&[f64], &[(f64, f64)]) -> AqResult<Vec<f64>> + Sync,
{
    let (rows, cols) = grid.shape();
    let fill = grid.nodata.unwrap_or(f64::NAN);

    let mut indices = Vec::new();
    let mut xs = Vec::new();
    let mut coords = Vec::new();
    for ((row, col), &value) in grid.data.indexed_iter() {
        if grid.is_valid(value) {
            indices.push((row, col));
            xs.push(value);
            coords.push(grid.transform.pixel_center(row, col));
        }
    }
    log::debug!("Correcting {} valid pixels of a {}x{} grid", xs.len(), rows, cols);

    let predicted = predict_chunked(&xs, &coords, &predict)?;

    let mut output = Array2::from_elem((rows, cols), fill);
    for (&(row, col), value) in indices.iter().zip(predicted) {
        output[[row, col]] = if value.is_nan() { fill } else { value };
    }

    Ok(Grid {
        data: output,
        transform: grid.transform,
        nodata: grid.nodata,
        crs_wkt: grid.crs_wkt.clone(),
    })
}

#[cfg(feature = "parallel")]
fn predict_chunked<F>(xs: &[f64], coords: &[(f64, f64)], predict: &F) -> AqResult<Vec<f64>>
where
    F: Fn(&[f64], &[(f64, f64)]) -> AqResult<Vec<f64>> + Sync,
{
    use rayon::prelude::*;

    let chunks: AqResult<Vec<Vec<f64>>> = xs
        .par_chunks(PREDICT_CHUNK)
        .zip(coords.par_chunks(PREDICT_CHUNK))
        .map(|(x, c)| predict(x, c))
        .collect();
    Ok(chunks?.into_iter().flatten().collect())
}

#[cfg(not(feature = "parallel"))]
fn predict_chunked<F>(xs: &[f64], coords: &[(f64, f64)], predict: &F) -> AqResult<Vec<f64>>
where
    F: Fn(&[f64], &[(f64, f64)]) -> AqResult<Vec<f64>> + Sync,
{
    let mut out = Vec::with_capacity(xs.len());
    for (x, c) in xs.chunks(PREDICT_CHUNK).zip(coords.chunks(PREDICT_CHUNK)) {
        out.extend(predict(x, c)?);
    }
    Ok(out)
}

/// Correct a raster file with any prediction strategy
///
/// Pixel coordinates come from the affine transform and are assumed to be
/// lon/lat. Nodata pixels are carried through; the output keeps the input's
/// shape, data type and nodata value.
pub fn correct_raster<P, Q, F>(input_path: P, output_path: Q, predict: F) -> AqResult<PathBuf>
where
    P: AsRef<Path>,
    Q: AsRef<Path>,
    F: Fn(&[f64], &[(f64, f64)]) -> AqResult<Vec<f64>> + Sync,
{
    let input_path = input_path.as_ref();
    let output_path = output_path.as_ref();
    log::info!(
        "Correcting raster {} -> {}",
        input_path.display(),
        output_path.display()
    );

    let grid = raster::read_grid(input_path, 1)?;
    let corrected = correct_grid(&grid, predict)?;

    if let Some(parent) = output_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    raster::write_like(input_path, output_path, &corrected.data)?;
    Ok(output_path.to_path_buf())
}

/// Distinct (lon, lat) locations in first-seen order, and the location of
/// each sample
///
/// Training sets hold one sample per station per day, so the same
/// coordinates repeat.
pub(crate) fn group_locations(coords: &[(f64, f64)]) -> (Vec<(f64, f64)>, Vec<usize>) {
    let mut lookup: HashMap<(u64, u64), usize> = HashMap::new();
    let mut sites = Vec::new();
    let mut site_of = Vec::with_capacity(coords.len());
    for &(lon, lat) in coords {
        // -0.0 and 0.0 are the same place
        let key = ((lon + 0.0).to_bits(), (lat + 0.0).to_bits());
        let site = *lookup.entry(key).or_insert_with(|| {
            sites.push((lon, lat));
            sites.len() - 1
        });
        site_of.push(site);
    }
    (sites, site_of)
}

/// k-fold cross-validation with a fixed shuffle seed
///
/// Folds hold whole locations: every sample of a station is either in the
/// training part or in the held-out part, never both. `factory` must return
/// an unfitted model; the model under evaluation is never touched.
pub fn cross_validate<C, F>(
    factory: F,
    x: &[f64],
    y: &[f64],
    coords: &[(f64, f64)],
    n_folds: usize,
    seed: u64,
) -> AqResult<CrossValidation>
where
    C: BiasCorrector,
    F: Fn() -> C,
{
    let n = x.len();
    if y.len() != n || coords.len() != n {
        return Err(AqError::InvalidInput("Cross-validation arrays differ in length".to_string()));
    }

    let (sites, site_of) = group_locations(coords);
    let n_sites = sites.len();
    if n_sites < 2 {
        return Err(AqError::InsufficientData(format!(
            "Cross-validation needs at least 2 distinct locations, got {}",
            n_sites
        )));
    }
    let n_folds = n_folds.clamp(2, n_sites);

    let mut order: Vec<usize> = (0..n_sites).collect();
    let mut rng = StdRng::seed_from_u64(seed);
    order.shuffle(&mut rng);

    let mut fold_of_site = vec![0usize; n_sites];
    for (pos, &site) in order.iter().enumerate() {
        fold_of_site[site] = pos % n_folds;
    }

    let mut oof_observed = Vec::with_capacity(n);
    let mut oof_predicted = Vec::with_capacity(n);
    let mut fold_rmse = Vec::with_capacity(n_folds);

    for fold in 0..n_folds {
        let (test, train): (Vec<usize>, Vec<usize>) =
            (0..n).partition(|&i| fold_of_site[site_of[i]] == fold);

        let pick = |idx: &[usize], v: &[f64]| idx.iter().map(|&i| v[i]).collect::<Vec<f64>>();
        let pick_coords = |idx: &[usize]| idx.iter().map(|&i| coords[i]).collect::<Vec<_>>();

        let mut model = factory();
        match model.fit(&pick(&train, x), &pick(&train, y), &pick_coords(&train)) {
            Ok(()) => {}
            Err(e) if e.is_data_insufficiency() => {
                log::debug!("Skipping fold {}: {}", fold, e);
                continue;
            }
            Err(e) => return Err(e),
        }

        let observed = pick(&test, y);
        let predicted = model.predict(&pick(&test, x), &pick_coords(&test))?;
        fold_rmse.push(compute_metrics(&observed, &predicted).rmse);
        oof_observed.extend(observed);
        oof_predicted.extend(predicted);
    }

    if fold_rmse.is_empty() {
        return Err(AqError::InsufficientData(
            "No cross-validation fold had enough training samples".to_string(),
        ));
    }

    let metrics = compute_metrics(&oof_observed, &oof_predicted);
    Ok(CrossValidation {
        cv_r_squared: metrics.r_squared,
        cv_rmse: metrics.rmse,
        cv_mae: metrics.mae,
        n_folds: fold_rmse.len(),
        fold_rmse,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GeoTransform;

    #[test]
    fn test_metrics_perfect_fit() {
        let obs = [1.0, 2.0, 3.0];
        let m = compute_metrics(&obs, &obs);
        assert_eq!(m.r_squared, 1.0);
        assert_eq!(m.rmse, 0.0);
        assert_eq!(m.n_samples, 3);
    }

    #[test]
    fn test_metrics_bias_sign() {
        let m = compute_metrics(&[1.0, 2.0], &[2.0, 3.0]);
        assert!((m.bias - 1.0).abs() < 1e-12);
        assert!((m.mae - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_weighted_fit_recovers_line() {
        let x = [1.0, 2.0, 3.0, 4.0];
        let y: Vec<f64> = x.iter().map(|v| 2.0 + 0.5 * v).collect();
        let (a, b) = weighted_linear_fit(&x, &y, &[1.0, 1.0, 1.0, 1.0]).unwrap();
        assert!((a - 2.0).abs() < 1e-12);
        assert!((b - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_weighted_fit_constant_predictor() {
        assert!(weighted_linear_fit(&[3.0, 3.0, 3.0], &[1.0, 2.0, 3.0], &[1.0, 1.0, 1.0]).is_none());
    }

    #[test]
    fn test_correct_grid_keeps_nodata() {
        let mut data = Array2::from_elem((2, 2), 10.0);
        data[[0, 1]] = -9999.0;
        let grid = Grid::new(data, GeoTransform::north_up(70.0, 30.0, 0.5, 0.5), Some(-9999.0));

        let out = correct_grid(&grid, |x, _| Ok(x.iter().map(|v| v * 0.5).collect())).unwrap();
        assert_eq!(out.data[[0, 0]], 5.0);
        assert_eq!(out.data[[0, 1]], -9999.0);
        assert_eq!(out.shape(), (2, 2));
    }

    #[test]
    fn test_clamp_concentration() {
        assert_eq!(clamp_concentration(-3.0), 0.0);
        assert!(clamp_concentration(f64::NAN).is_nan());
        assert_eq!(clamp_concentration(4.0), 4.0);
    }

    /// Returns the training value for any location it was fitted on, 0 elsewhere
    struct Memorizer {
        seen: Vec<((f64, f64), f64)>,
        metrics: Option<CorrectionMetrics>,
    }

    impl BiasCorrector for Memorizer {
        fn model_type(&self) -> ModelType {
            ModelType::Linear
        }

        fn min_samples(&self) -> usize {
            1
        }

        fn fit(&mut self, _x: &[f64], y: &[f64], coords: &[(f64, f64)]) -> AqResult<()> {
            self.seen = coords.iter().copied().zip(y.iter().copied()).collect();
            self.metrics = Some(CorrectionMetrics::default());
            Ok(())
        }

        fn predict(&self, x: &[f64], coords: &[(f64, f64)]) -> AqResult<Vec<f64>> {
            Ok(x
                .iter()
                .zip(coords)
                .map(|(_, c)| {
                    self.seen
                        .iter()
                        .find(|(seen, _)| seen == c)
                        .map(|(_, v)| *v)
                        .unwrap_or(0.0)
                })
                .collect())
        }

        fn metrics(&self) -> Option<&CorrectionMetrics> {
            self.metrics.as_ref()
        }

        fn fresh(&self) -> Self {
            Memorizer { seen: Vec::new(), metrics: None }
        }
    }

    #[test]
    fn test_group_locations() {
        let coords = [(70.0, 30.0), (71.0, 30.0), (70.0, 30.0), (-0.0, 0.0), (0.0, 0.0)];
        let (sites, site_of) = group_locations(&coords);
        assert_eq!(sites, vec![(70.0, 30.0), (71.0, 30.0), (-0.0, 0.0)]);
        assert_eq!(site_of, vec![0, 1, 0, 2, 2]);
    }

    #[test]
    fn test_cv_folds_hold_out_whole_stations() {
        // 6 stations reporting on 5 days; a constant value per station
        let mut x = Vec::new();
        let mut y = Vec::new();
        let mut coords = Vec::new();
        for day in 0..5 {
            for station in 0..6 {
                x.push(10.0 + day as f64);
                y.push(20.0 + station as f64);
                coords.push((70.0 + station as f64 * 0.5, 30.0));
            }
        }

        let factory = || Memorizer { seen: Vec::new(), metrics: None };
        let cv = cross_validate(factory, &x, &y, &coords, 3, CV_SEED).unwrap();
        assert_eq!(cv.n_folds, 3);

        // A held-out station is never in the training part, so every
        // out-of-fold prediction is 0 and the error is the full value
        let mean_y = y.iter().sum::<f64>() / y.len() as f64;
        assert!((cv.cv_mae - mean_y).abs() < 1e-9, "cv_mae={}", cv.cv_mae);
    }

    #[test]
    fn test_cv_single_location_is_insufficient() {
        let factory = || Memorizer { seen: Vec::new(), metrics: None };
        let coords = vec![(70.0, 30.0); 10];
        let values: Vec<f64> = (0..10).map(f64::from).collect();
        let err = cross_validate(factory, &values, &values, &coords, 5, CV_SEED).unwrap_err();
        assert!(err.is_data_insufficiency());
    }
}
