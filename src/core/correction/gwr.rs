//! Geographically weighted regression
//!
//! One weighted least-squares fit per distinct training location gives a
//! field of local [intercept, slope] pairs. Each local fit sees every sample,
//! so a station that reported on many days contributes all of its days.
//! Prediction does not refit: it blends the local coefficients of the nearest
//! locations with the same kernel, which keeps raster-scale correction linear
//! in the number of pixels.

use super::{
    clamp_concentration, compute_metrics, group_locations, validate_prediction,
    validate_training, weighted_linear_fit, BiasCorrector, CorrectionMetrics, ModelType,
};
use crate::types::{haversine_km, AqError, AqResult};
use rstar::primitives::GeomWithData;
use rstar::RTree;
use serde::{Deserialize, Serialize};

/// Distance-decay kernel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Kernel {
    Gaussian,
    Bisquare,
    Exponential,
}

impl Kernel {
    /// Weight of an observation `distance` km away; 1 at zero distance
    pub fn weight(&self, distance: f64, bandwidth: f64) -> f64 {
        let u = distance / bandwidth;
        match self {
            Kernel::Gaussian => (-0.5 * u * u).exp(),
            Kernel::Bisquare => {
                if u < 1.0 {
                    (1.0 - u * u).powi(2)
                } else {
                    0.0
                }
            }
            Kernel::Exponential => (-u).exp(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Kernel::Gaussian => "gaussian",
            Kernel::Bisquare => "bisquare",
            Kernel::Exponential => "exponential",
        }
    }
}

/// How the kernel bandwidth is chosen
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BandwidthSelection {
    /// Golden-section search minimizing the corrected AIC
    Aicc,
    /// Half the median pairwise station distance
    RuleOfThumb,
    /// Fixed bandwidth in km
    Fixed(f64),
}

/// GWR fitting parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GwrParams {
    pub kernel: Kernel,
    pub bandwidth: BandwidthSelection,
    /// Training locations blended per prediction
    pub prediction_neighbors: usize,
    /// Relative interval width at which the bandwidth search stops
    pub search_tolerance: f64,
    pub max_search_iterations: usize,
}

impl Default for GwrParams {
    fn default() -> Self {
        Self {
            kernel: Kernel::Gaussian,
            bandwidth: BandwidthSelection::Aicc,
            prediction_neighbors: 8,
            search_tolerance: 1e-3,
            max_search_iterations: 60,
        }
    }
}

type IndexedPoint = GeomWithData<[f64; 2], usize>;

/// R-tree over training locations (lon, lat degrees)
#[derive(Clone)]
struct StationIndex(RTree<IndexedPoint>);

impl std::fmt::Debug for StationIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "StationIndex({} points)", self.0.size())
    }
}

/// Geographically weighted bias correction
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GwrCorrector {
    pub params: GwrParams,
    /// Selected bandwidth (km)
    pub bandwidth: f64,
    /// Distinct training locations (lon, lat)
    pub sites: Vec<(f64, f64)>,
    local_params: Vec<[f64; 2]>,
    local_r2: Vec<f64>,
    /// Coefficients of the unweighted global fit
    pub global_params: [f64; 2],
    pub(crate) metrics: Option<CorrectionMetrics>,
    #[serde(skip)]
    index: Option<StationIndex>,
}

impl GwrCorrector {
    pub const MIN_SAMPLES: usize = 10;

    pub fn new(params: GwrParams) -> Self {
        Self {
            params,
            ..Self::default()
        }
    }

    /// Local [intercept, slope] at each entry of `sites`
    pub fn local_params(&self) -> Option<&[[f64; 2]]> {
        self.metrics.as_ref().map(|_| self.local_params.as_slice())
    }

    /// (min, max, mean) of the local weighted R²
    pub fn local_r2_summary(&self) -> Option<(f64, f64, f64)> {
        if self.local_r2.is_empty() {
            return None;
        }
        let min = self.local_r2.iter().copied().fold(f64::INFINITY, f64::min);
        let max = self.local_r2.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let mean = self.local_r2.iter().sum::<f64>() / self.local_r2.len() as f64;
        Some((min, max, mean))
    }

    pub(crate) fn rebuild_index(&mut self) {
        if self.sites.is_empty() {
            self.index = None;
            return;
        }
        let points = self
            .sites
            .iter()
            .enumerate()
            .map(|(i, &(lon, lat))| IndexedPoint::new([lon, lat], i))
            .collect();
        self.index = Some(StationIndex(RTree::bulk_load(points)));
    }

    /// Indices into `sites` of the `k` locations nearest to (lon, lat)
    fn nearest(&self, lon: f64, lat: f64, k: usize) -> Vec<usize> {
        if let Some(StationIndex(tree)) = &self.index {
            return tree
                .nearest_neighbor_iter(&[lon, lat])
                .take(k)
                .map(|p| p.data)
                .collect();
        }

        let mut order: Vec<(f64, usize)> = self
            .sites
            .iter()
            .enumerate()
            .map(|(i, &(x, y))| ((x - lon).powi(2) + (y - lat).powi(2), i))
            .collect();
        order.sort_by(|a, b| a.0.total_cmp(&b.0));
        order.into_iter().take(k).map(|(_, i)| i).collect()
    }

    /// Kernel-blended local coefficients at an arbitrary location
    pub fn coefficients_at(&self, lon: f64, lat: f64) -> Option<[f64; 2]> {
        if self.metrics.is_none() || self.local_params.is_empty() {
            return None;
        }
        let k = self.params.prediction_neighbors.max(1).min(self.sites.len());
        let neighbours = self.nearest(lon, lat, k);

        let mut sw = 0.0;
        let mut a = 0.0;
        let mut b = 0.0;
        for &i in &neighbours {
            let (sx, sy) = self.sites[i];
            let w = self.params.kernel.weight(haversine_km(lon, lat, sx, sy), self.bandwidth);
            sw += w;
            a += w * self.local_params[i][0];
            b += w * self.local_params[i][1];
        }

        if sw > 1e-12 {
            Some([a / sw, b / sw])
        } else {
            // Beyond kernel reach of every neighbour
            neighbours.first().map(|&i| self.local_params[i])
        }
    }
}

fn distance_matrix(coords: &[(f64, f64)]) -> Vec<Vec<f64>> {
    let n = coords.len();
    let mut d = vec![vec![0.0; n]; n];
    for i in 0..n {
        for j in (i + 1)..n {
            let dist = haversine_km(coords[i].0, coords[i].1, coords[j].0, coords[j].1);
            d[i][j] = dist;
            d[j][i] = dist;
        }
    }
    d
}

fn rule_of_thumb_bandwidth(distances: &[Vec<f64>]) -> f64 {
    let mut pairs: Vec<f64> = distances
        .iter()
        .enumerate()
        .flat_map(|(i, row)| row.iter().skip(i + 1).copied())
        .collect();
    if pairs.is_empty() {
        return 0.0;
    }
    pairs.sort_by(|a, b| a.total_cmp(b));
    let m = pairs.len();
    let median = if m % 2 == 0 {
        (pairs[m / 2 - 1] + pairs[m / 2]) / 2.0
    } else {
        pairs[m / 2]
    };
    median * 0.5
}

/// Samples and site-to-site distances shared by every local fit
struct Design<'a> {
    x: &'a [f64],
    y: &'a [f64],
    site_of: Vec<usize>,
    /// Sample indices at each site
    members: Vec<Vec<usize>>,
    distances: Vec<Vec<f64>>,
}

impl<'a> Design<'a> {
    fn new(x: &'a [f64], y: &'a [f64], coords: &[(f64, f64)]) -> (Self, Vec<(f64, f64)>) {
        let (sites, site_of) = group_locations(coords);
        let mut members = vec![Vec::new(); sites.len()];
        for (i, &site) in site_of.iter().enumerate() {
            members[site].push(i);
        }
        let distances = distance_matrix(&sites);
        let design = Design { x, y, site_of, members, distances };
        (design, sites)
    }

    /// Kernel weight of every sample as seen from `site`
    fn weights(&self, site: usize, kernel: Kernel, bandwidth: f64) -> Vec<f64> {
        let row = &self.distances[site];
        self.site_of.iter().map(|&s| kernel.weight(row[s], bandwidth)).collect()
    }
}

/// Corrected AIC of a GWR fit at `bandwidth`; infinite when any local fit is degenerate
fn aicc(design: &Design<'_>, kernel: Kernel, bandwidth: f64) -> f64 {
    let (x, y) = (design.x, design.y);
    let nf = x.len() as f64;
    let mut rss = 0.0;
    let mut trace = 0.0;

    for (site, members) in design.members.iter().enumerate() {
        let w = design.weights(site, kernel, bandwidth);
        let Some((a, b)) = weighted_linear_fit(x, y, &w) else {
            return f64::INFINITY;
        };

        let sw: f64 = w.iter().sum();
        let xm = x.iter().zip(&w).map(|(xi, wi)| xi * wi).sum::<f64>() / sw;
        let sxx: f64 = x.iter().zip(&w).map(|(xi, wi)| wi * (xi - xm).powi(2)).sum();
        for &i in members {
            trace += w[i] * (1.0 / sw + (x[i] - xm).powi(2) / sxx);
            rss += (y[i] - (a + b * x[i])).powi(2);
        }
    }

    let denom = nf - 2.0 - trace;
    if denom <= 0.0 {
        return f64::INFINITY;
    }
    let sigma = (rss / nf).sqrt().max(1e-12);
    2.0 * nf * sigma.ln() + nf * (2.0 * std::f64::consts::PI).ln() + nf * (nf + trace) / denom
}

fn golden_section_bandwidth(
    design: &Design<'_>,
    params: &GwrParams,
    lower: f64,
    upper: f64,
) -> f64 {
    const INV_PHI: f64 = 0.618_033_988_749_894_9;
    let kernel = params.kernel;
    let (mut a, mut b) = (lower, upper);
    let mut c = b - INV_PHI * (b - a);
    let mut d = a + INV_PHI * (b - a);
    let mut fc = aicc(design, kernel, c);
    let mut fd = aicc(design, kernel, d);

    for _ in 0..params.max_search_iterations {
        if (b - a) <= params.search_tolerance * b.abs().max(1.0) {
            break;
        }
        if fc <= fd {
            b = d;
            d = c;
            fd = fc;
            c = b - INV_PHI * (b - a);
            fc = aicc(design, kernel, c);
        } else {
            a = c;
            c = d;
            fc = fd;
            d = a + INV_PHI * (b - a);
            fd = aicc(design, kernel, d);
        }
    }

    let best = if fc <= fd { c } else { d };
    if fc.min(fd).is_finite() {
        log::debug!("AICc bandwidth search: {:.2} km (AICc={:.3})", best, fc.min(fd));
        best
    } else {
        f64::NAN
    }
}

impl BiasCorrector for GwrCorrector {
    fn model_type(&self) -> ModelType {
        ModelType::Gwr
    }

    fn min_samples(&self) -> usize {
        Self::MIN_SAMPLES
    }

    fn fit(&mut self, x: &[f64], y: &[f64], coords: &[(f64, f64)]) -> AqResult<()> {
        validate_training(x, y, coords, Self::MIN_SAMPLES, "GWR")?;
        let n = x.len();

        let global = weighted_linear_fit(x, y, &vec![1.0; n]).ok_or_else(|| {
            AqError::InsufficientData("Satellite values have no variance".to_string())
        })?;

        let (design, sites) = Design::new(x, y, coords);
        let distances = &design.distances;
        let max_distance = distances
            .iter()
            .flat_map(|row| row.iter().copied())
            .fold(0.0, f64::max);
        if sites.len() < 2 || max_distance <= 0.0 {
            return Err(AqError::InsufficientData(
                "All GWR training samples share one location".to_string(),
            ));
        }
        let min_distance = distances
            .iter()
            .flat_map(|row| row.iter().copied())
            .filter(|&d| d > 0.0)
            .fold(f64::INFINITY, f64::min);

        let bandwidth = match self.params.bandwidth {
            BandwidthSelection::Fixed(bw) if bw.is_finite() && bw > 0.0 => bw,
            BandwidthSelection::Fixed(bw) => {
                return Err(AqError::InvalidInput(format!("Invalid GWR bandwidth: {}", bw)))
            }
            BandwidthSelection::RuleOfThumb => rule_of_thumb_bandwidth(distances),
            BandwidthSelection::Aicc => {
                let bw = golden_section_bandwidth(&design, &self.params, min_distance, max_distance);
                if bw.is_finite() && bw > 0.0 {
                    bw
                } else {
                    log::warn!("AICc bandwidth search failed, using rule-of-thumb bandwidth");
                    rule_of_thumb_bandwidth(distances)
                }
            }
        };
        let bandwidth = if bandwidth > 0.0 { bandwidth } else { max_distance };

        let kernel = self.params.kernel;
        let mut local_params = Vec::with_capacity(sites.len());
        let mut local_r2 = Vec::with_capacity(sites.len());
        let mut fallbacks = 0usize;

        for site in 0..sites.len() {
            let w = design.weights(site, kernel, bandwidth);
            let (a, b) = match weighted_linear_fit(x, y, &w) {
                Some(fit) => fit,
                None => {
                    fallbacks += 1;
                    global
                }
            };

            let sw: f64 = w.iter().sum();
            let ym = y.iter().zip(&w).map(|(yi, wi)| yi * wi).sum::<f64>() / sw;
            let mut ss_res = 0.0;
            let mut ss_tot = 0.0;
            for ((xi, yi), wi) in x.iter().zip(y).zip(&w) {
                ss_res += wi * (yi - (a + b * xi)).powi(2);
                ss_tot += wi * (yi - ym).powi(2);
            }
            local_r2.push(if ss_tot > 0.0 { 1.0 - ss_res / ss_tot } else { 0.0 });
            local_params.push([a, b]);
        }

        if fallbacks > 0 {
            log::warn!(
                "{} of {} local GWR fits fell back to global coefficients",
                fallbacks,
                sites.len()
            );
        }

        let predicted: Vec<f64> = x
            .iter()
            .zip(&design.site_of)
            .map(|(xi, &site)| {
                let [a, b] = local_params[site];
                clamp_concentration(a + b * xi)
            })
            .collect();
        let metrics = compute_metrics(y, &predicted);

        self.bandwidth = bandwidth;
        let n_sites = sites.len();
        self.sites = sites;
        self.local_params = local_params;
        self.local_r2 = local_r2;
        self.global_params = [global.0, global.1];
        self.rebuild_index();

        log::info!(
            "GWR correction fitted: kernel={}, bandwidth={:.2} km, R²={:.3}, RMSE={:.3}, n={}, locations={}",
            kernel.name(),
            bandwidth,
            metrics.r_squared,
            metrics.rmse,
            n,
            n_sites
        );
        self.metrics = Some(metrics);
        Ok(())
    }

    fn predict(&self, x: &[f64], coords: &[(f64, f64)]) -> AqResult<Vec<f64>> {
        if self.metrics.is_none() {
            return Err(AqError::NotFitted);
        }
        validate_prediction(x, coords)?;

        x.iter()
            .zip(coords)
            .map(|(&value, &(lon, lat))| {
                if value.is_nan() {
                    return Ok(f64::NAN);
                }
                let [a, b] = self.coefficients_at(lon, lat).ok_or(AqError::NotFitted)?;
                Ok(clamp_concentration(a + b * value))
            })
            .collect()
    }

    fn metrics(&self) -> Option<&CorrectionMetrics> {
        self.metrics.as_ref()
    }

    fn fresh(&self) -> Self {
        Self::new(self.params.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::correction::LinearCorrector;

    /// 4x4 stations over one degree with a slope that grows eastward
    fn varying_slope_data() -> (Vec<f64>, Vec<f64>, Vec<(f64, f64)>) {
        let mut x = Vec::new();
        let mut y = Vec::new();
        let mut coords = Vec::new();
        for i in 0..16 {
            let lon = 70.0 + (i % 4) as f64 / 3.0;
            let lat = 30.0 + (i / 4) as f64 / 3.0;
            let sat = 20.0 + 10.0 * ((i * 7) % 5) as f64 + i as f64;
            let slope = 0.5 + 1.5 * (lon - 70.0);
            x.push(sat);
            y.push(slope * sat + 2.0 + 0.3 * (i as f64 * 1.7).sin());
            coords.push((lon, lat));
        }
        (x, y, coords)
    }

    #[test]
    fn test_kernel_weights() {
        for kernel in [Kernel::Gaussian, Kernel::Bisquare, Kernel::Exponential] {
            assert_eq!(kernel.weight(0.0, 10.0), 1.0);
            assert!(kernel.weight(5.0, 10.0) > kernel.weight(8.0, 10.0));
        }
        assert_eq!(Kernel::Bisquare.weight(12.0, 10.0), 0.0);
    }

    #[test]
    fn test_gwr_beats_global_on_varying_slope() {
        let (x, y, coords) = varying_slope_data();

        let mut gwr = GwrCorrector::new(GwrParams::default());
        gwr.fit(&x, &y, &coords).unwrap();
        let mut linear = LinearCorrector::new();
        linear.fit(&x, &y, &coords).unwrap();

        assert!(gwr.bandwidth > 0.0);
        assert_eq!(gwr.local_params().unwrap().len(), 16);
        assert!(gwr.metrics().unwrap().r_squared > linear.metrics().unwrap().r_squared);

        let west = gwr.coefficients_at(70.0, 30.5).unwrap();
        let east = gwr.coefficients_at(71.0, 30.5).unwrap();
        assert!(east[1] > west[1]);
    }

    #[test]
    fn test_gwr_predictions_non_negative() {
        let (x, y, coords) = varying_slope_data();
        let mut gwr = GwrCorrector::new(GwrParams {
            bandwidth: BandwidthSelection::RuleOfThumb,
            ..GwrParams::default()
        });
        gwr.fit(&x, &y, &coords).unwrap();

        let query = [-500.0, f64::NAN, 25.0];
        let qc = [(70.2, 30.2), (70.5, 30.5), (75.0, 35.0)];
        let out = gwr.predict(&query, &qc).unwrap();
        assert_eq!(out[0], 0.0);
        assert!(out[1].is_nan());
        assert!(out[2] >= 0.0);
    }

    #[test]
    fn test_gwr_minimum_samples() {
        let (x, y, coords) = varying_slope_data();
        let mut gwr = GwrCorrector::new(GwrParams::default());
        let result = gwr.fit(&x[..9], &y[..9], &coords[..9]);
        assert!(matches!(result, Err(AqError::InsufficientData(_))));
    }

    #[test]
    fn test_colocated_samples_rejected() {
        let (x, y, _) = varying_slope_data();
        let coords = vec![(70.0, 30.0); 16];
        let mut gwr = GwrCorrector::new(GwrParams::default());
        assert!(matches!(gwr.fit(&x, &y, &coords), Err(AqError::InsufficientData(_))));
    }

    /// 12 stations on a 4x3 grid, each reporting on 6 days
    fn station_days() -> (Vec<f64>, Vec<f64>, Vec<(f64, f64)>) {
        let mut x = Vec::new();
        let mut y = Vec::new();
        let mut coords = Vec::new();
        for day in 0..6 {
            for station in 0..12 {
                let lon = 70.0 + (station % 4) as f64 * 0.5;
                let lat = 30.0 + (station / 4) as f64 * 0.5;
                let sat = 30.0 + 8.0 * day as f64 + 3.0 * (station % 5) as f64;
                let slope = 0.5 + 0.5 * (lon - 70.0);
                x.push(sat);
                y.push(slope * sat + 2.0 + 0.2 * ((day * 12 + station) as f64).sin());
                coords.push((lon, lat));
            }
        }
        (x, y, coords)
    }

    #[test]
    fn test_repeated_station_days_fit_one_model_per_location() {
        let (x, y, coords) = station_days();
        let mut gwr = GwrCorrector::new(GwrParams {
            bandwidth: BandwidthSelection::Fixed(40.0),
            ..GwrParams::default()
        });
        gwr.fit(&x, &y, &coords).unwrap();

        assert_eq!(gwr.sites.len(), 12);
        assert_eq!(gwr.metrics().unwrap().n_samples, 72);
        let local = gwr.local_params().unwrap();
        assert_eq!(local.len(), 12);

        // Sites 0 and 1 sit at (70.0, 30.0) and (70.5, 30.0)
        let west = local[0];
        let east = local[1];
        assert!(east[1] > west[1]);

        let mid = gwr.coefficients_at(70.25, 30.0).unwrap();
        assert!((mid[1] - west[1]).abs() > 0.01, "mid={:?} west={:?}", mid, west);
        assert!((mid[1] - east[1]).abs() > 0.01, "mid={:?} east={:?}", mid, east);

        // At a training location the blend is dominated by that location
        let at_west = gwr.coefficients_at(70.0, 30.0).unwrap();
        assert!((at_west[1] - west[1]).abs() < (mid[1] - west[1]).abs());
    }

    #[test]
    fn test_aicc_bandwidth_with_repeated_locations() {
        let (x, y, coords) = station_days();
        let mut gwr = GwrCorrector::new(GwrParams::default());
        gwr.fit(&x, &y, &coords).unwrap();

        assert!(gwr.bandwidth.is_finite() && gwr.bandwidth > 0.0);
        assert_eq!(gwr.local_params().unwrap().len(), 12);
    }

    #[test]
    fn test_prediction_without_index_matches() {
        let (x, y, coords) = varying_slope_data();
        let mut gwr = GwrCorrector::new(GwrParams::default());
        gwr.fit(&x, &y, &coords).unwrap();

        let mut unindexed = gwr.clone();
        unindexed.index = None;
        let q = [30.0, 45.0];
        let qc = [(70.4, 30.1), (70.9, 30.8)];
        let a = gwr.predict(&q, &qc).unwrap();
        let b = unindexed.predict(&q, &qc).unwrap();
        for (u, v) in a.iter().zip(&b) {
            assert!((u - v).abs() < 1e-9);
        }
    }
}
