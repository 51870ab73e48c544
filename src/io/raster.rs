use crate::types::{
    is_valid_value, pixel_window, AqError, AqResult, BoundingBox, GeoTransform, Grid, RasterRef,
};
use gdal::raster::{Buffer, RasterCreationOptions};
use gdal::spatial_ref::{AxisMappingStrategy, CoordTransform, SpatialRef};
use gdal::{Dataset, DriverManager};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Summary statistics over the valid pixels of a (masked) raster
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ZonalStats {
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub mean: Option<f64>,
    pub std: Option<f64>,
    pub count: usize,
}

fn open_dataset(path: &Path) -> AqResult<Dataset> {
    Dataset::open(path).map_err(|e| {
        AqError::Raster(format!("Failed to open raster {}: {}", path.display(), e))
    })
}

fn checked_band<'a>(dataset: &'a Dataset, path: &Path, band: usize) -> AqResult<gdal::raster::RasterBand<'a>> {
    let band_count = dataset.raster_count();
    if band == 0 || band > band_count {
        return Err(AqError::Raster(format!(
            "Invalid band index {} for {} ({} bands)",
            band,
            path.display(),
            band_count
        )));
    }
    Ok(dataset.rasterband(band)?)
}

fn read_block(
    dataset: &Dataset,
    path: &Path,
    band: usize,
    row_off: usize,
    col_off: usize,
    rows: usize,
    cols: usize,
) -> AqResult<(Array2<f64>, Option<f64>)> {
    let rasterband = checked_band(dataset, path, band)?;
    let nodata = rasterband.no_data_value();

    if rows == 0 || cols == 0 {
        return Ok((Array2::zeros((0, 0)), nodata));
    }

    let buffer = rasterband.read_as::<f64>(
        (col_off as isize, row_off as isize),
        (cols, rows),
        (cols, rows),
        None,
    )?;

    let (_, data) = buffer.into_shape_and_vec();
    let array = Array2::from_shape_vec((rows, cols), data)
        .map_err(|e| AqError::Raster(format!("Failed to reshape raster data: {}", e)))?;
    Ok((array, nodata))
}

fn dataset_crs(dataset: &Dataset) -> Option<String> {
    let wkt = dataset.projection();
    (!wkt.trim().is_empty()).then_some(wkt)
}

/// Shape and georeferencing of a raster, without its pixels
#[derive(Debug, Clone, PartialEq)]
pub struct RasterInfo {
    pub shape: (usize, usize),
    pub transform: GeoTransform,
    pub nodata: Option<f64>,
    pub band_count: usize,
}

impl RasterInfo {
    pub fn bounds(&self) -> BoundingBox {
        self.transform.bounds(self.shape)
    }
}

/// Read raster metadata (band 1 nodata)
pub fn read_info<P: AsRef<Path>>(path: P) -> AqResult<RasterInfo> {
    let path = path.as_ref();
    let dataset = open_dataset(path)?;
    let (width, height) = dataset.raster_size();
    let band_count = dataset.raster_count();
    let nodata = checked_band(&dataset, path, 1)?.no_data_value();
    Ok(RasterInfo {
        shape: (height, width),
        transform: GeoTransform::from_gdal(dataset.geo_transform()?),
        nodata,
        band_count,
    })
}

/// Read a full band into memory
pub fn read_grid<P: AsRef<Path>>(path: P, band: usize) -> AqResult<Grid> {
    let path = path.as_ref();
    log::debug!("Reading raster band {} from {}", band, path.display());

    let dataset = open_dataset(path)?;
    let transform = GeoTransform::from_gdal(dataset.geo_transform()?);
    let (width, height) = dataset.raster_size();
    let (data, nodata) = read_block(&dataset, path, band, 0, 0, height, width)?;

    Ok(Grid {
        data,
        transform,
        nodata,
        crs_wkt: dataset_crs(&dataset),
    })
}

/// Read only the sub-grid intersecting `bounds`
///
/// Returns an empty grid when `bounds` does not overlap the raster extent.
pub fn read_window<P: AsRef<Path>>(path: P, bounds: &BoundingBox, band: usize) -> AqResult<Grid> {
    let path = path.as_ref();
    let dataset = open_dataset(path)?;
    let transform = GeoTransform::from_gdal(dataset.geo_transform()?);
    let (width, height) = dataset.raster_size();

    let (row_off, col_off, rows, cols) = pixel_window(&transform, (height, width), bounds);
    log::debug!(
        "Window read {}: offset ({}, {}), size {}x{}",
        path.display(),
        row_off,
        col_off,
        rows,
        cols
    );

    let (data, nodata) = read_block(&dataset, path, band, row_off, col_off, rows, cols)?;
    Ok(Grid {
        data,
        transform: transform.offset(row_off, col_off),
        nodata,
        crs_wkt: dataset_crs(&dataset),
    })
}

/// Nearest-pixel sampling at (x, y) map coordinates
///
/// Points outside the extent or on nodata yield `None`.
pub fn sample_at_points<P: AsRef<Path>>(
    path: P,
    points: &[(f64, f64)],
    band: usize,
) -> AqResult<Vec<Option<f64>>> {
    let path = path.as_ref();
    let dataset = open_dataset(path)?;
    let transform = GeoTransform::from_gdal(dataset.geo_transform()?);
    let (width, height) = dataset.raster_size();
    let rasterband = checked_band(&dataset, path, band)?;
    let nodata = rasterband.no_data_value();

    let mut samples = Vec::with_capacity(points.len());
    for &(x, y) in points {
        let (row, col) = transform.world_to_pixel(x, y);
        if !row.is_finite() || !col.is_finite() || row < 0.0 || col < 0.0 {
            samples.push(None);
            continue;
        }
        let (r, c) = (row.floor() as usize, col.floor() as usize);
        if r >= height || c >= width {
            samples.push(None);
            continue;
        }

        let buffer = rasterband.read_as::<f64>((c as isize, r as isize), (1, 1), (1, 1), None)?;
        let value = buffer.data().first().copied().unwrap_or(f64::NAN);
        samples.push(is_valid_value(value, nodata).then_some(value));
    }

    Ok(samples)
}

/// Statistics over the valid pixels of `band` selected by `mask`
pub fn zonal_stats<P: AsRef<Path>>(path: P, band: usize, mask: Option<&Array2<bool>>) -> AqResult<ZonalStats> {
    let grid = read_grid(path, band)?;
    zonal_stats_grid(&grid, mask)
}

/// In-memory variant of [`zonal_stats`]
pub fn zonal_stats_grid(grid: &Grid, mask: Option<&Array2<bool>>) -> AqResult<ZonalStats> {
    if let Some(mask) = mask {
        if mask.dim() != grid.shape() {
            return Err(AqError::Raster(format!(
                "Mask shape {:?} does not match raster shape {:?}",
                mask.dim(),
                grid.shape()
            )));
        }
    }

    let mut count = 0usize;
    let mut sum = 0.0;
    let mut sum_sq = 0.0;
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;

    for (idx, &value) in grid.data.indexed_iter() {
        if let Some(mask) = mask {
            if !mask[idx] {
                continue;
            }
        }
        if !grid.is_valid(value) {
            continue;
        }
        count += 1;
        sum += value;
        sum_sq += value * value;
        min = min.min(value);
        max = max.max(value);
    }

    if count == 0 {
        return Ok(ZonalStats::default());
    }

    let mean = sum / count as f64;
    let variance = (sum_sq / count as f64 - mean * mean).max(0.0);
    Ok(ZonalStats {
        min: Some(min),
        max: Some(max),
        mean: Some(mean),
        std: Some(variance.sqrt()),
        count,
    })
}

/// Write a grid as a single-band Float64 GeoTIFF
pub fn write_grid<P: AsRef<Path>>(grid: &Grid, output_path: P) -> AqResult<()> {
    let output_path = output_path.as_ref();
    log::info!("Writing raster: {}", output_path.display());

    let driver = DriverManager::get_driver_by_name("GTiff")?;
    let (height, width) = grid.shape();

    let mut dataset = driver.create_with_band_type::<f64, _>(output_path, width, height, 1)?;
    dataset.set_geo_transform(&grid.transform.to_gdal())?;
    if let Some(wkt) = &grid.crs_wkt {
        dataset.set_projection(wkt)?;
    }

    let mut rasterband = dataset.rasterband(1)?;
    if let Some(nodata) = grid.nodata {
        rasterband.set_no_data_value(Some(nodata))?;
    }
    let flat_data: Vec<f64> = grid.data.iter().copied().collect();
    let mut buffer = Buffer::new((width, height), flat_data);
    rasterband.write((0, 0), (width, height), &mut buffer)?;

    Ok(())
}

/// Write `data` into a copy of `template_path`
///
/// The copy keeps the template's shape, data type, nodata, transform and CRS.
pub fn write_like<P: AsRef<Path>, Q: AsRef<Path>>(
    template_path: P,
    output_path: Q,
    data: &Array2<f64>,
) -> AqResult<()> {
    let template_path = template_path.as_ref();
    let output_path = output_path.as_ref();

    let template = open_dataset(template_path)?;
    let (width, height) = template.raster_size();
    if data.dim() != (height, width) {
        return Err(AqError::Raster(format!(
            "Output shape {:?} does not match template {}x{}",
            data.dim(),
            height,
            width
        )));
    }

    let driver = DriverManager::get_driver_by_name("GTiff")?;
    let output = template.create_copy(&driver, output_path, &RasterCreationOptions::default())?;
    let mut rasterband = output.rasterband(1)?;
    let flat_data: Vec<f64> = data.iter().copied().collect();
    let mut buffer = Buffer::new((width, height), flat_data);
    rasterband.write((0, 0), (width, height), &mut buffer)?;

    log::debug!("Wrote {}x{} raster like {}", height, width, template_path.display());
    Ok(())
}

fn traditional_axis_order(srs: &mut SpatialRef) {
    srs.set_axis_mapping_strategy(AxisMappingStrategy::TraditionalGisOrder);
}

/// Bilinear sample at fractional (row, col), skipping invalid neighbours
pub(crate) fn bilinear_at(data: &Array2<f64>, nodata: Option<f64>, row: f64, col: f64) -> Option<f64> {
    let (rows, cols) = data.dim();
    if rows == 0 || cols == 0 || !row.is_finite() || !col.is_finite() {
        return None;
    }
    // Pixel centres sit at +0.5
    let y = row - 0.5;
    let x = col - 0.5;
    if y < -0.5 || x < -0.5 || y > rows as f64 - 0.5 || x > cols as f64 - 0.5 {
        return None;
    }

    let y0 = y.floor().max(0.0) as usize;
    let x0 = x.floor().max(0.0) as usize;
    let y1 = (y0 + 1).min(rows - 1);
    let x1 = (x0 + 1).min(cols - 1);
    let dy = (y - y0 as f64).clamp(0.0, 1.0);
    let dx = (x - x0 as f64).clamp(0.0, 1.0);

    let taps = [
        (data[[y0, x0]], (1.0 - dx) * (1.0 - dy)),
        (data[[y0, x1]], dx * (1.0 - dy)),
        (data[[y1, x0]], (1.0 - dx) * dy),
        (data[[y1, x1]], dx * dy),
    ];

    let mut acc = 0.0;
    let mut weight = 0.0;
    for (value, w) in taps {
        if w > 0.0 && is_valid_value(value, nodata) {
            acc += value * w;
            weight += w;
        }
    }
    (weight > 0.0).then(|| acc / weight)
}

/// Resample `src_path` into `dst_epsg` at `resolution` (target CRS units)
///
/// Continuous fields are interpolated bilinearly. The source file is untouched.
pub fn reproject<P: AsRef<Path>, Q: AsRef<Path>>(
    src_path: P,
    dst_path: Q,
    dst_epsg: u32,
    resolution: f64,
) -> AqResult<()> {
    let src_path = src_path.as_ref();
    let dst_path = dst_path.as_ref();
    if resolution <= 0.0 || !resolution.is_finite() {
        return Err(AqError::InvalidInput(format!("Invalid target resolution {}", resolution)));
    }
    log::info!(
        "Reprojecting {} to EPSG:{} at {} resolution",
        src_path.display(),
        dst_epsg,
        resolution
    );

    let source = read_grid(src_path, 1)?;
    let mut src_srs = match &source.crs_wkt {
        Some(wkt) => SpatialRef::from_wkt(wkt)?,
        None => SpatialRef::from_epsg(4326)?,
    };
    let mut dst_srs = SpatialRef::from_epsg(dst_epsg)?;
    traditional_axis_order(&mut src_srs);
    traditional_axis_order(&mut dst_srs);

    let forward = CoordTransform::new(&src_srs, &dst_srs)?;
    let inverse = CoordTransform::new(&dst_srs, &src_srs)?;

    // Densified edge sampling to find the destination extent
    let (rows, cols) = source.shape();
    let b = source.bounds();
    let steps = 20usize;
    let mut xs = Vec::with_capacity(4 * (steps + 1));
    let mut ys = Vec::with_capacity(4 * (steps + 1));
    for i in 0..=steps {
        let t = i as f64 / steps as f64;
        let lon = b.min_lon + t * (b.max_lon - b.min_lon);
        let lat = b.min_lat + t * (b.max_lat - b.min_lat);
        xs.extend_from_slice(&[lon, lon, b.min_lon, b.max_lon]);
        ys.extend_from_slice(&[b.min_lat, b.max_lat, lat, lat]);
    }
    let mut zs = vec![0.0; xs.len()];
    forward.transform_coords(&mut xs, &mut ys, &mut zs)?;

    let min_x = xs.iter().copied().fold(f64::INFINITY, f64::min);
    let max_x = xs.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let min_y = ys.iter().copied().fold(f64::INFINITY, f64::min);
    let max_y = ys.iter().copied().fold(f64::NEG_INFINITY, f64::max);

    let dst_cols = ((max_x - min_x) / resolution).ceil().max(1.0) as usize;
    let dst_rows = ((max_y - min_y) / resolution).ceil().max(1.0) as usize;
    let dst_transform = GeoTransform::north_up(min_x, max_y, resolution, resolution);
    log::debug!("Source {}x{} -> destination {}x{}", rows, cols, dst_rows, dst_cols);

    let nodata = source.nodata.unwrap_or(f64::NAN);
    let mut output = Array2::from_elem((dst_rows, dst_cols), nodata);

    for r in 0..dst_rows {
        let mut row_x: Vec<f64> = (0..dst_cols).map(|c| dst_transform.pixel_center(r, c).0).collect();
        let mut row_y: Vec<f64> = (0..dst_cols).map(|c| dst_transform.pixel_center(r, c).1).collect();
        let mut row_z = vec![0.0; dst_cols];
        inverse.transform_coords(&mut row_x, &mut row_y, &mut row_z)?;

        for c in 0..dst_cols {
            let (src_row, src_col) = source.transform.world_to_pixel(row_x[c], row_y[c]);
            if let Some(value) = bilinear_at(&source.data, source.nodata, src_row, src_col) {
                output[[r, c]] = value;
            }
        }
    }

    let mut grid = Grid::new(output, dst_transform, Some(nodata));
    grid.crs_wkt = Some(dst_srs.to_wkt()?);
    write_grid(&grid, dst_path)
}

/// Load a full raster regardless of where it lives
pub fn load(raster: &RasterRef, band: usize) -> AqResult<Grid> {
    match raster {
        RasterRef::Path(path) => read_grid(path, band),
        RasterRef::Memory(grid) => Ok(grid.as_ref().clone()),
    }
}

/// Window read regardless of where the raster lives
pub fn load_window(raster: &RasterRef, bounds: &BoundingBox, band: usize) -> AqResult<Grid> {
    match raster {
        RasterRef::Path(path) => read_window(path, bounds, band),
        RasterRef::Memory(grid) => Ok(grid.window(bounds)),
    }
}

/// Point sampling regardless of where the raster lives
pub fn sample(raster: &RasterRef, points: &[(f64, f64)], band: usize) -> AqResult<Vec<Option<f64>>> {
    match raster {
        RasterRef::Path(path) => sample_at_points(path, points, band),
        RasterRef::Memory(grid) => Ok(points.iter().map(|&(x, y)| grid.sample(x, y)).collect()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GeoTransform;

    #[test]
    fn test_zonal_stats_all_nodata() {
        let grid = Grid::new(
            Array2::from_elem((3, 3), -9999.0),
            GeoTransform::north_up(0.0, 0.0, 1.0, 1.0),
            Some(-9999.0),
        );
        let stats = zonal_stats_grid(&grid, None).unwrap();
        assert_eq!(stats.count, 0);
        assert!(stats.mean.is_none());
        assert!(stats.min.is_none());
        assert!(stats.std.is_none());
    }

    #[test]
    fn test_zonal_stats_with_mask() {
        let data = Array2::from_shape_vec((2, 2), vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        let grid = Grid::new(data, GeoTransform::north_up(0.0, 0.0, 1.0, 1.0), None);
        let mask = Array2::from_shape_vec((2, 2), vec![true, false, true, false]).unwrap();

        let stats = zonal_stats_grid(&grid, Some(&mask)).unwrap();
        assert_eq!(stats.count, 2);
        assert_eq!(stats.mean, Some(2.0));
        assert_eq!(stats.min, Some(1.0));
        assert_eq!(stats.max, Some(3.0));
        assert!((stats.std.unwrap() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_zonal_stats_mask_shape_mismatch() {
        let grid = Grid::new(Array2::zeros((2, 2)), GeoTransform::north_up(0.0, 0.0, 1.0, 1.0), None);
        let mask = Array2::from_elem((3, 3), true);
        let result = zonal_stats_grid(&grid, Some(&mask));
        assert!(matches!(result, Err(AqError::Raster(_))));
    }

    #[test]
    fn test_bilinear_interpolation() {
        let data = Array2::from_shape_vec((2, 2), vec![0.0, 10.0, 20.0, 30.0]).unwrap();
        // Midway between the four pixel centres
        let value = bilinear_at(&data, None, 1.0, 1.0).unwrap();
        assert!((value - 15.0).abs() < 1e-12);
        // Exactly on a pixel centre
        assert_eq!(bilinear_at(&data, None, 0.5, 1.5), Some(10.0));
        assert_eq!(bilinear_at(&data, None, 5.0, 5.0), None);
    }

    #[test]
    fn test_missing_file_is_raster_error() {
        let result = read_grid("/nonexistent/raster.tif", 1);
        assert!(matches!(result, Err(ref e) if e.is_raster_error()));
    }
}
