use crate::io::raster::bilinear_at;
use crate::types::{AqResult, AqError, GeoTransform, Grid};
use ndarray::{Array2, Zip};

/// Resample `array` onto a target grid using bilinear interpolation
///
/// Used to co-register grids of differing native resolution (satellite
/// pixels vs. the 100 m population grid) before elementwise combination.
/// Target pixels outside the source extent, or whose neighbours are all
/// invalid, become NaN.
pub fn resample_to_match(
    array: &Array2<f64>,
    src_transform: &GeoTransform,
    dst_transform: &GeoTransform,
    dst_shape: (usize, usize),
    src_nodata: Option<f64>,
) -> Array2<f64> {
    log::debug!(
        "Resampling {:?} grid to target shape {:?}",
        array.dim(),
        dst_shape
    );

    let mut resampled = Array2::from_elem(dst_shape, f64::NAN);
    Zip::indexed(&mut resampled).for_each(|(i, j), value| {
        let (x, y) = dst_transform.pixel_center(i, j);
        let (src_row, src_col) = src_transform.world_to_pixel(x, y);
        if let Some(v) = bilinear_at(array, src_nodata, src_row, src_col) {
            *value = v;
        }
    });
    resampled
}

/// Resample `source` onto `target`'s shape and transform
pub fn resample_grid(source: &Grid, target: &Grid) -> Grid {
    let data = resample_to_match(
        &source.data,
        &source.transform,
        &target.transform,
        target.shape(),
        source.nodata,
    );
    Grid {
        data,
        transform: target.transform,
        nodata: None,
        crs_wkt: target.crs_wkt.clone().or_else(|| source.crs_wkt.clone()),
    }
}

/// Resample a population count grid onto `target`, preserving its total
///
/// Bilinear interpolation of counts does not conserve mass when the pixel
/// sizes differ, so the result is rescaled to the source's valid total.
pub fn resample_population(population: &Grid, target: &Grid) -> AqResult<Grid> {
    if target.is_empty() {
        return Err(AqError::InvalidInput("Cannot resample onto an empty grid".to_string()));
    }

    let source_total: f64 = population
        .data
        .iter()
        .filter(|&&v| population.is_valid(v) && v > 0.0)
        .sum();

    let mut resampled = resample_grid(population, target);
    let resampled_total: f64 = resampled
        .data
        .iter()
        .filter(|v| v.is_finite() && **v > 0.0)
        .sum();

    if resampled_total > 0.0 && source_total > 0.0 {
        let scale = source_total / resampled_total;
        resampled.data.mapv_inplace(|v| if v.is_finite() { v.max(0.0) * scale } else { v });
    }
    Ok(resampled)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_resample() {
        let gt = GeoTransform::north_up(70.0, 30.0, 0.1, 0.1);
        let data = Array2::from_shape_fn((3, 3), |(r, c)| (r * 3 + c) as f64);
        let out = resample_to_match(&data, &gt, &gt, (3, 3), None);
        for (a, b) in data.iter().zip(out.iter()) {
            assert!((a - b).abs() < 1e-9);
        }
    }

    #[test]
    fn test_population_total_preserved_when_downsampling() {
        // 100 m-style fine grid onto a grid 4x coarser
        let fine = Grid::new(
            Array2::from_elem((8, 8), 10.0),
            GeoTransform::north_up(70.0, 30.8, 0.1, 0.1),
            Some(-1.0),
        );
        let coarse = Grid::new(
            Array2::zeros((2, 2)),
            GeoTransform::north_up(70.0, 30.8, 0.4, 0.4),
            None,
        );

        let out = resample_population(&fine, &coarse).unwrap();
        assert_eq!(out.shape(), (2, 2));
        let total: f64 = out.data.iter().filter(|v| v.is_finite()).sum();
        assert!((total - 640.0).abs() < 1e-6);
    }
}
