use ndarray::Array2;
use smogmap::io::raster;
use smogmap::types::{BoundingBox, GeoTransform, Grid, RasterRef};

const WGS84_WKT: &str = r#"GEOGCS["WGS 84",DATUM["WGS_1984",SPHEROID["WGS 84",6378137,298.257223563]],PRIMEM["Greenwich",0],UNIT["degree",0.0174532925199433],AUTHORITY["EPSG","4326"]]"#;

fn write_scene(dir: &std::path::Path) -> std::path::PathBuf {
    let data = Array2::from_shape_fn((20, 30), |(r, c)| (r * 30 + c) as f64);
    let mut grid = Grid::new(data, GeoTransform::north_up(60.0, 37.0, 0.5, 0.5), Some(-1.0)).with_crs(WGS84_WKT);
    grid.data[[0, 0]] = -1.0;
    let path = dir.join("scene.tif");
    raster::write_grid(&grid, &path).unwrap();
    path
}

#[test]
fn test_geotiff_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_scene(dir.path());

    let info = raster::read_info(&path).unwrap();
    assert_eq!(info.shape, (20, 30));
    assert_eq!(info.nodata, Some(-1.0));

    let grid = raster::read_grid(&path, 1).unwrap();
    assert_eq!(grid.data[[3, 4]], 94.0);
    assert!(!grid.is_valid(grid.data[[0, 0]]));
    assert_eq!(grid.transform, GeoTransform::north_up(60.0, 37.0, 0.5, 0.5));
    assert!(grid.crs_wkt.is_some());
}

#[test]
fn test_window_matches_full_read() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_scene(dir.path());
    let full = raster::read_grid(&path, 1).unwrap();

    let bounds = BoundingBox::new(62.0, 30.0, 64.0, 33.0);
    let window = raster::read_window(&path, &bounds, 1).unwrap();
    assert!(!window.is_empty());
    let (row_off, col_off) = {
        let (r, c) = full.transform.world_to_pixel(window.transform.top_left_x, window.transform.top_left_y);
        (r.round() as usize, c.round() as usize)
    };
    for ((r, c), &v) in window.data.indexed_iter() {
        assert_eq!(v, full.data[[r + row_off, c + col_off]]);
    }

    let outside = raster::read_window(&path, &BoundingBox::new(0.0, 0.0, 1.0, 1.0), 1).unwrap();
    assert!(outside.is_empty());
}

#[test]
fn test_sampling_file_and_memory_agree() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_scene(dir.path());
    let memory = RasterRef::memory(raster::read_grid(&path, 1).unwrap());
    let file = RasterRef::path(&path);

    let points = [(60.1, 36.9), (62.3, 35.2), (74.9, 27.1), (10.0, 10.0)];
    let from_file = raster::sample(&file, &points, 1).unwrap();
    let from_memory = raster::sample(&memory, &points, 1).unwrap();
    assert_eq!(from_file, from_memory);
    assert_eq!(from_file[0], None);
    assert_eq!(from_file[3], None);
    assert_eq!(from_file[1], Some(94.0));
}

#[test]
fn test_zonal_stats_ignore_nodata() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_scene(dir.path());
    let stats = raster::zonal_stats(&path, 1, None).unwrap();
    assert_eq!(stats.count, 599);
    assert_eq!(stats.min, Some(1.0));
    assert_eq!(stats.max, Some(599.0));

    let none = Array2::from_elem((20, 30), false);
    let empty = raster::zonal_stats(&path, 1, Some(&none)).unwrap();
    assert_eq!(empty.count, 0);
    assert!(empty.mean.is_none());
}

#[test]
fn test_missing_band_is_raster_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_scene(dir.path());
    let err = raster::read_grid(&path, 3).unwrap_err();
    assert!(err.is_raster_error());
}
