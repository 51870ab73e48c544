use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

/// Mean Earth radius used for great-circle distances (km)
pub const EARTH_RADIUS_KM: f64 = 6371.0088;

/// Kilometres per degree of latitude
pub const KM_PER_DEGREE: f64 = 111.32;

/// Pollutants tracked by the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Pollutant {
    PM25,
    PM10,
    NO2,
    SO2,
    CO,
    O3,
}

impl Pollutant {
    pub const ALL: [Pollutant; 6] = [
        Pollutant::PM25,
        Pollutant::PM10,
        Pollutant::NO2,
        Pollutant::SO2,
        Pollutant::CO,
        Pollutant::O3,
    ];

    /// Molecular weight in g/mol, defined for gas-phase pollutants only
    pub fn molecular_weight(&self) -> Option<f64> {
        match self {
            Pollutant::NO2 => Some(46.0055),
            Pollutant::SO2 => Some(64.066),
            Pollutant::CO => Some(28.010),
            Pollutant::O3 => Some(47.997),
            Pollutant::PM25 | Pollutant::PM10 => None,
        }
    }

    /// Canonical short code used in file names and record keys
    pub fn code(&self) -> &'static str {
        match self {
            Pollutant::PM25 => "PM25",
            Pollutant::PM10 => "PM10",
            Pollutant::NO2 => "NO2",
            Pollutant::SO2 => "SO2",
            Pollutant::CO => "CO",
            Pollutant::O3 => "O3",
        }
    }
}

impl std::fmt::Display for Pollutant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code())
    }
}

impl FromStr for Pollutant {
    type Err = AqError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .trim()
            .to_uppercase()
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect();

        match normalized.as_str() {
            "PM25" => Ok(Pollutant::PM25),
            "PM10" => Ok(Pollutant::PM10),
            "NO2" => Ok(Pollutant::NO2),
            "SO2" => Ok(Pollutant::SO2),
            "CO" => Ok(Pollutant::CO),
            "O3" | "OZONE" => Ok(Pollutant::O3),
            _ => Err(AqError::UnitConversion(format!("Unknown pollutant: {}", s))),
        }
    }
}

/// Geospatial bounding box in map coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lon: f64,
    pub max_lon: f64,
    pub min_lat: f64,
    pub max_lat: f64,
}

impl BoundingBox {
    pub fn new(min_lon: f64, min_lat: f64, max_lon: f64, max_lat: f64) -> Self {
        Self {
            min_lon,
            max_lon,
            min_lat,
            max_lat,
        }
    }

    pub fn contains(&self, lon: f64, lat: f64) -> bool {
        lon >= self.min_lon && lon <= self.max_lon && lat >= self.min_lat && lat <= self.max_lat
    }

    pub fn intersection(&self, other: &BoundingBox) -> Option<BoundingBox> {
        let min_lon = self.min_lon.max(other.min_lon);
        let max_lon = self.max_lon.min(other.max_lon);
        let min_lat = self.min_lat.max(other.min_lat);
        let max_lat = self.max_lat.min(other.max_lat);

        if min_lon < max_lon && min_lat < max_lat {
            Some(BoundingBox::new(min_lon, min_lat, max_lon, max_lat))
        } else {
            None
        }
    }
}

/// Geospatial transformation parameters (GDAL affine ordering)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub top_left_x: f64,
    pub pixel_width: f64,
    pub rotation_x: f64,
    pub top_left_y: f64,
    pub rotation_y: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    /// North-up transform with square-ish pixels
    pub fn north_up(top_left_x: f64, top_left_y: f64, pixel_width: f64, pixel_height: f64) -> Self {
        Self {
            top_left_x,
            pixel_width,
            rotation_x: 0.0,
            top_left_y,
            rotation_y: 0.0,
            pixel_height: -pixel_height.abs(),
        }
    }

    pub fn from_gdal(gt: [f64; 6]) -> Self {
        Self {
            top_left_x: gt[0],
            pixel_width: gt[1],
            rotation_x: gt[2],
            top_left_y: gt[3],
            rotation_y: gt[4],
            pixel_height: gt[5],
        }
    }

    pub fn to_gdal(&self) -> [f64; 6] {
        [
            self.top_left_x,
            self.pixel_width,
            self.rotation_x,
            self.top_left_y,
            self.rotation_y,
            self.pixel_height,
        ]
    }

    /// Map coordinates of the centre of pixel (row, col)
    pub fn pixel_center(&self, row: usize, col: usize) -> (f64, f64) {
        self.pixel_to_world(row as f64 + 0.5, col as f64 + 0.5)
    }

    /// Map coordinates of fractional pixel position (row, col)
    pub fn pixel_to_world(&self, row: f64, col: f64) -> (f64, f64) {
        (
            self.top_left_x + col * self.pixel_width + row * self.rotation_x,
            self.top_left_y + col * self.rotation_y + row * self.pixel_height,
        )
    }

    /// Fractional (row, col) of a map coordinate; rotation terms are ignored
    pub fn world_to_pixel(&self, x: f64, y: f64) -> (f64, f64) {
        let col = (x - self.top_left_x) / self.pixel_width;
        let row = (y - self.top_left_y) / self.pixel_height;
        (row, col)
    }

    /// Transform of a sub-window starting at (row_off, col_off)
    pub fn offset(&self, row_off: usize, col_off: usize) -> GeoTransform {
        GeoTransform {
            top_left_x: self.top_left_x + col_off as f64 * self.pixel_width,
            top_left_y: self.top_left_y + row_off as f64 * self.pixel_height,
            ..*self
        }
    }

    /// Extent covered by a grid of the given (rows, cols)
    pub fn bounds(&self, shape: (usize, usize)) -> BoundingBox {
        let (rows, cols) = shape;
        let x0 = self.top_left_x;
        let x1 = self.top_left_x + cols as f64 * self.pixel_width;
        let y0 = self.top_left_y;
        let y1 = self.top_left_y + rows as f64 * self.pixel_height;
        BoundingBox::new(x0.min(x1), y0.min(y1), x0.max(x1), y0.max(y1))
    }
}

/// Whether grid coordinates are geographic degrees or projected metres
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GridUnits {
    Degrees,
    Meters,
}

/// In-memory single-band raster
#[derive(Debug, Clone)]
pub struct Grid {
    pub data: Array2<f64>,
    pub transform: GeoTransform,
    pub nodata: Option<f64>,
    /// Coordinate reference system as WKT, when known
    pub crs_wkt: Option<String>,
}

impl Grid {
    pub fn new(data: Array2<f64>, transform: GeoTransform, nodata: Option<f64>) -> Self {
        Self {
            data,
            transform,
            nodata,
            crs_wkt: None,
        }
    }

    pub fn with_crs(mut self, crs_wkt: impl Into<String>) -> Self {
        self.crs_wkt = Some(crs_wkt.into());
        self
    }

    pub fn shape(&self) -> (usize, usize) {
        self.data.dim()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// True when `value` is neither NaN nor the nodata sentinel
    pub fn is_valid(&self, value: f64) -> bool {
        is_valid_value(value, self.nodata)
    }

    pub fn valid_mask(&self) -> Array2<bool> {
        let nodata = self.nodata;
        self.data.mapv(|v| is_valid_value(v, nodata))
    }

    pub fn bounds(&self) -> BoundingBox {
        self.transform.bounds(self.shape())
    }

    pub fn units(&self) -> GridUnits {
        if let Some(wkt) = &self.crs_wkt {
            let upper = wkt.trim_start().to_uppercase();
            if upper.starts_with("PROJCS") || upper.starts_with("PROJCRS") {
                return GridUnits::Meters;
            }
            if upper.starts_with("GEOGCS") || upper.starts_with("GEOGCRS") {
                return GridUnits::Degrees;
            }
        }

        let b = self.bounds();
        if self.transform.pixel_width.abs() <= 1.0
            && b.min_lon >= -180.0
            && b.max_lon <= 180.0
            && b.min_lat >= -90.0
            && b.max_lat <= 90.0
        {
            GridUnits::Degrees
        } else {
            GridUnits::Meters
        }
    }

    /// Area of one pixel in the given row, in km²
    pub fn pixel_area_km2(&self, row: usize) -> f64 {
        let w = self.transform.pixel_width.abs();
        let h = self.transform.pixel_height.abs();
        match self.units() {
            GridUnits::Meters => w * h / 1.0e6,
            GridUnits::Degrees => {
                let (_, lat) = self.transform.pixel_center(row, 0);
                w * KM_PER_DEGREE * h * KM_PER_DEGREE * lat.to_radians().cos().abs()
            }
        }
    }

    /// Nearest-pixel lookup; `None` outside the extent or on nodata
    pub fn sample(&self, x: f64, y: f64) -> Option<f64> {
        let (rows, cols) = self.shape();
        let (row, col) = self.transform.world_to_pixel(x, y);
        if !row.is_finite() || !col.is_finite() || row < 0.0 || col < 0.0 {
            return None;
        }
        let (r, c) = (row.floor() as usize, col.floor() as usize);
        if r >= rows || c >= cols {
            return None;
        }
        let value = self.data[[r, c]];
        self.is_valid(value).then_some(value)
    }

    /// Sub-grid intersecting `bounds`; an empty grid when there is no overlap
    pub fn window(&self, bounds: &BoundingBox) -> Grid {
        let (rows, cols) = self.shape();
        let (row_off, col_off, win_rows, win_cols) = pixel_window(&self.transform, (rows, cols), bounds);
        let data = self
            .data
            .slice(ndarray::s![row_off..row_off + win_rows, col_off..col_off + win_cols])
            .to_owned();
        Grid {
            data,
            transform: self.transform.offset(row_off, col_off),
            nodata: self.nodata,
            crs_wkt: self.crs_wkt.clone(),
        }
    }
}

pub(crate) fn is_valid_value(value: f64, nodata: Option<f64>) -> bool {
    if value.is_nan() {
        return false;
    }
    match nodata {
        Some(nd) if nd.is_nan() => true,
        Some(nd) => (value - nd).abs() > f64::EPSILON * nd.abs().max(1.0),
        None => true,
    }
}

/// Pixel window (row_off, col_off, rows, cols) covering `bounds`, clamped to the grid
pub(crate) fn pixel_window(
    transform: &GeoTransform,
    shape: (usize, usize),
    bounds: &BoundingBox,
) -> (usize, usize, usize, usize) {
    let (rows, cols) = shape;
    let (r_a, c_a) = transform.world_to_pixel(bounds.min_lon, bounds.max_lat);
    let (r_b, c_b) = transform.world_to_pixel(bounds.max_lon, bounds.min_lat);

    // Tolerance keeps edges that land exactly on pixel boundaries from growing the window
    const EPS: f64 = 1e-9;
    let r0 = (r_a.min(r_b) + EPS).floor().max(0.0);
    let r1 = (r_a.max(r_b) - EPS).ceil().min(rows as f64);
    let c0 = (c_a.min(c_b) + EPS).floor().max(0.0);
    let c1 = (c_a.max(c_b) - EPS).ceil().min(cols as f64);

    if !(r0 < r1 && c0 < c1) {
        return (0, 0, 0, 0);
    }

    let (r0, r1, c0, c1) = (r0 as usize, r1 as usize, c0 as usize, c1 as usize);
    (r0, c0, r1 - r0, c1 - c0)
}

/// A raster held on disk or in memory
///
/// Only file-backed rasters serialize.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RasterRef {
    Path(PathBuf),
    #[serde(skip)]
    Memory(Arc<Grid>),
}

impl RasterRef {
    pub fn path<P: AsRef<Path>>(path: P) -> Self {
        RasterRef::Path(path.as_ref().to_path_buf())
    }

    pub fn memory(grid: Grid) -> Self {
        RasterRef::Memory(Arc::new(grid))
    }

    pub fn file_path(&self) -> Option<&Path> {
        match self {
            RasterRef::Path(p) => Some(p),
            RasterRef::Memory(_) => None,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            RasterRef::Path(p) => p.display().to_string(),
            RasterRef::Memory(g) => {
                let (rows, cols) = g.shape();
                format!("<memory {}x{}>", rows, cols)
            }
        }
    }
}

/// Great-circle distance between two lon/lat points in km
pub fn haversine_km(lon1: f64, lat1: f64, lon2: f64, lat2: f64) -> f64 {
    let (phi1, phi2) = (lat1.to_radians(), lat2.to_radians());
    let d_phi = (lat2 - lat1).to_radians();
    let d_lambda = (lon2 - lon1).to_radians();

    let a = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * a.sqrt().min(1.0).asin()
}

/// Error types for air-quality processing
#[derive(Debug, thiserror::Error)]
pub enum AqError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Raster error (GDAL): {0}")]
    Gdal(#[from] gdal::errors::GdalError),

    #[error("Raster error: {0}")]
    Raster(String),

    #[error("Unit conversion error: {0}")]
    UnitConversion(String),

    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    #[error("Model has not been fitted")]
    NotFitted,

    #[error("No active correction model for {0}")]
    NoActiveModel(Pollutant),

    #[error("Invalid status transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Remote source error: {0}")]
    Remote(String),

    #[error("Remote call timed out: {0}")]
    Timeout(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Processing error: {0}")]
    Processing(String),
}

impl AqError {
    pub fn is_data_insufficiency(&self) -> bool {
        matches!(self, AqError::InsufficientData(_))
    }

    pub fn is_raster_error(&self) -> bool {
        matches!(self, AqError::Raster(_) | AqError::Gdal(_))
    }
}

/// Result type for air-quality operations
pub type AqResult<T> = Result<T, AqError>;
