use crate::core::aqi::AqiCategory;
use crate::io::regions::Region;
use crate::records::{Hotspot, Severity};
use crate::types::{haversine_km, AqError, AqResult, Grid, Pollutant};
use chrono::NaiveDate;
use geo::{BoundingRect, ConvexHull, MultiPoint, Point};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Hotspot detection parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HotspotParams {
    /// Pixels at or above this AQI are candidates
    pub aqi_threshold: f64,
    /// Smallest component kept, in pixels
    pub min_pixels: usize,
    /// Centroid distance (km) within which a hotspot continues a prior-day one
    pub persistence_distance_km: f64,
    /// Compute a convex-hull boundary polygon
    pub compute_boundary: bool,
}

impl Default for HotspotParams {
    fn default() -> Self {
        Self {
            aqi_threshold: 150.0,
            min_pixels: 4,
            persistence_distance_km: 50.0,
            compute_boundary: true,
        }
    }
}

/// Connected high-AQI clusters in a grid
pub struct HotspotDetector {
    params: HotspotParams,
}

impl HotspotDetector {
    pub fn new() -> Self {
        Self {
            params: HotspotParams::default(),
        }
    }

    pub fn with_params(params: HotspotParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &HotspotParams {
        &self.params
    }

    /// Label 8-connected components of pixels with AQI ≥ threshold
    ///
    /// Returns the component index of every pixel (`None` below threshold)
    /// and the pixel list of each component.
    pub fn label_components(&self, aqi: &Array2<f64>) -> (Array2<Option<usize>>, Vec<Vec<(usize, usize)>>) {
        let (rows, cols) = aqi.dim();
        let mut labels: Array2<Option<usize>> = Array2::from_elem((rows, cols), None);
        let mut components = Vec::new();
        let above = |r: usize, c: usize| {
            let v = aqi[[r, c]];
            v.is_finite() && v >= self.params.aqi_threshold
        };

        for start_r in 0..rows {
            for start_c in 0..cols {
                if labels[[start_r, start_c]].is_some() || !above(start_r, start_c) {
                    continue;
                }

                let label = components.len();
                let mut pixels = Vec::new();
                let mut queue = VecDeque::new();
                labels[[start_r, start_c]] = Some(label);
                queue.push_back((start_r, start_c));

                while let Some((r, c)) = queue.pop_front() {
                    pixels.push((r, c));
                    for dr in -1i64..=1 {
                        for dc in -1i64..=1 {
                            if dr == 0 && dc == 0 {
                                continue;
                            }
                            let nr = r as i64 + dr;
                            let nc = c as i64 + dc;
                            if nr < 0 || nc < 0 || nr >= rows as i64 || nc >= cols as i64 {
                                continue;
                            }
                            let (nr, nc) = (nr as usize, nc as usize);
                            if labels[[nr, nc]].is_none() && above(nr, nc) {
                                labels[[nr, nc]] = Some(label);
                                queue.push_back((nr, nc));
                            }
                        }
                    }
                }
                components.push(pixels);
            }
        }

        (labels, components)
    }

    /// Hotspots of one (pollutant, date) with `persistence_days = 1`
    ///
    /// `aqi` and `concentration` must share a grid; `population`, when given,
    /// must already be aligned to it.
    pub fn detect(
        &self,
        pollutant: Pollutant,
        date: NaiveDate,
        aqi: &Grid,
        concentration: &Grid,
        population: Option<&Grid>,
        districts: &[Region],
    ) -> AqResult<Vec<Hotspot>> {
        if aqi.shape() != concentration.shape() {
            return Err(AqError::InvalidInput(format!(
                "AQI grid {:?} and concentration grid {:?} differ in shape",
                aqi.shape(),
                concentration.shape()
            )));
        }
        let population = population.filter(|p| p.shape() == aqi.shape());

        let (_, components) = self.label_components(&aqi.data);
        let total = components.len();
        let district_boxes: Vec<_> = districts.iter().map(|d| d.bounding_box()).collect();

        let mut hotspots = Vec::new();
        for pixels in components.into_iter().filter(|p| p.len() >= self.params.min_pixels) {
            let n = pixels.len() as f64;
            let mean_row = pixels.iter().map(|(r, _)| *r as f64).sum::<f64>() / n;
            let mean_col = pixels.iter().map(|(_, c)| *c as f64).sum::<f64>() / n;
            let (cx, cy) = aqi.transform.pixel_to_world(mean_row + 0.5, mean_col + 0.5);

            let mut area_km2 = 0.0;
            let mut sum_aqi = 0.0;
            let mut max_aqi = f64::NEG_INFINITY;
            let mut sum_c = 0.0;
            let mut n_c = 0usize;
            let mut max_c = f64::NEG_INFINITY;
            let mut affected = 0.0;
            let mut centres = Vec::with_capacity(pixels.len());

            for &(r, c) in &pixels {
                let a = aqi.data[[r, c]];
                sum_aqi += a;
                max_aqi = max_aqi.max(a);
                area_km2 += aqi.pixel_area_km2(r);

                let conc = concentration.data[[r, c]];
                if concentration.is_valid(conc) {
                    sum_c += conc;
                    n_c += 1;
                    max_c = max_c.max(conc);
                }
                if let Some(pop) = population {
                    let p = pop.data[[r, c]];
                    if pop.is_valid(p) && p > 0.0 {
                        affected += p;
                    }
                }
                centres.push(aqi.transform.pixel_center(r, c));
            }
            let mean_aqi = sum_aqi / n;

            let intersecting: Vec<String> = districts
                .iter()
                .zip(&district_boxes)
                .filter(|(_, bbox)| {
                    bbox.map_or(false, |b| centres.iter().any(|&(x, y)| b.contains(x, y)))
                })
                .filter(|(region, _)| centres.iter().any(|&(x, y)| region.covers(x, y)))
                .map(|(region, _)| region.id.clone())
                .collect();

            let boundary = if self.params.compute_boundary {
                let points: MultiPoint<f64> = centres.iter().map(|&(x, y)| Point::new(x, y)).collect();
                let hull = points.convex_hull();
                hull.bounding_rect().map(|_| hull)
            } else {
                None
            };

            hotspots.push(Hotspot {
                pollutant,
                date,
                centroid: Point::new(cx, cy),
                boundary,
                area_km2,
                pixel_count: pixels.len(),
                severity: Severity::from_mean_aqi(mean_aqi),
                mean_concentration: if n_c > 0 { sum_c / n_c as f64 } else { f64::NAN },
                max_concentration: if n_c > 0 { max_c } else { f64::NAN },
                mean_aqi,
                max_aqi,
                category: AqiCategory::from_aqi(mean_aqi),
                affected_population: affected,
                districts: intersecting,
                persistence_days: 1,
            });
        }

        log::info!(
            "{} {}: {} hotspots ({} components above AQI {})",
            pollutant,
            date,
            hotspots.len(),
            total,
            self.params.aqi_threshold
        );
        Ok(hotspots)
    }

    /// Continue prior-day lineages
    ///
    /// Each hotspot takes the persistence of the nearest same-pollutant prior
    /// hotspot within the distance threshold, plus one.
    pub fn apply_persistence(&self, today: &mut [Hotspot], previous: &[Hotspot]) {
        for hotspot in today.iter_mut() {
            let (lon, lat) = (hotspot.centroid.x(), hotspot.centroid.y());
            let nearest = previous
                .iter()
                .filter(|p| p.pollutant == hotspot.pollutant)
                .map(|p| (haversine_km(lon, lat, p.centroid.x(), p.centroid.y()), p.persistence_days))
                .filter(|(d, _)| *d <= self.params.persistence_distance_km)
                .min_by(|a, b| a.0.total_cmp(&b.0));

            hotspot.persistence_days = match nearest {
                Some((_, days)) => days + 1,
                None => 1,
            };
        }
    }
}

impl Default for HotspotDetector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GeoTransform;

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 11, day).unwrap()
    }

    fn grid_with_block(top: usize, left: usize, value: f64) -> Grid {
        let mut data = Array2::from_elem((20, 20), 40.0);
        for r in top..top + 3 {
            for c in left..left + 3 {
                data[[r, c]] = value;
            }
        }
        Grid::new(data, GeoTransform::north_up(70.0, 32.0, 0.05, 0.05), None)
    }

    #[test]
    fn test_diagonal_pixels_join() {
        let mut aqi = Array2::from_elem((4, 4), 0.0);
        aqi[[0, 0]] = 200.0;
        aqi[[1, 1]] = 200.0;
        aqi[[3, 3]] = 200.0;
        let (labels, components) = HotspotDetector::new().label_components(&aqi);
        assert_eq!(components.len(), 2);
        assert_eq!(labels[[0, 0]], labels[[1, 1]]);
        assert_ne!(labels[[0, 0]], labels[[3, 3]]);
    }

    #[test]
    fn test_detect_single_hotspot() {
        let aqi = grid_with_block(5, 5, 320.0);
        let population = Grid::new(Array2::from_elem((20, 20), 10.0), aqi.transform, None);
        let hotspots = HotspotDetector::new()
            .detect(Pollutant::PM25, date(1), &aqi, &aqi, Some(&population), &[])
            .unwrap();

        assert_eq!(hotspots.len(), 1);
        let h = &hotspots[0];
        assert_eq!(h.pixel_count, 9);
        assert_eq!(h.severity, Severity::Critical);
        assert_eq!(h.affected_population, 90.0);
        // Centre of pixel (6, 6)
        assert!((h.centroid.x() - 70.325).abs() < 1e-9);
        assert!((h.centroid.y() - 31.675).abs() < 1e-9);
        assert!(h.boundary.is_some());
    }

    #[test]
    fn test_small_components_discarded() {
        let mut aqi = grid_with_block(5, 5, 40.0);
        aqi.data[[2, 2]] = 400.0;
        let hotspots = HotspotDetector::new()
            .detect(Pollutant::PM25, date(1), &aqi, &aqi, None, &[])
            .unwrap();
        assert!(hotspots.is_empty());
    }

    #[test]
    fn test_persistence_lineage() {
        let detector = HotspotDetector::new();
        let day1 = detector
            .detect(Pollutant::PM25, date(1), &grid_with_block(5, 5, 250.0), &grid_with_block(5, 5, 250.0), None, &[])
            .unwrap();

        let same = grid_with_block(5, 5, 260.0);
        let mut day2 = detector.detect(Pollutant::PM25, date(2), &same, &same, None, &[]).unwrap();
        detector.apply_persistence(&mut day2, &day1);
        assert_eq!(day2[0].persistence_days, 2);

        // Same place but a different pollutant's history
        let mut other = day2.clone();
        other[0].pollutant = Pollutant::NO2;
        detector.apply_persistence(&mut other, &day1);
        assert_eq!(other[0].persistence_days, 1);
    }
}
