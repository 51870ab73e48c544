//! Administrative region polygons (SRID 4326) and raster masking.

use crate::types::{AqError, AqResult, BoundingBox, Grid};
use geo::{BoundingRect, Intersects, MultiPolygon, Point};
use geojson::GeoJson;
use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// Administrative level of a region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RegionLevel {
    District,
    Province,
    National,
}

/// A district, province or national boundary
#[derive(Debug, Clone)]
pub struct Region {
    pub id: String,
    pub name: String,
    pub level: RegionLevel,
    /// Enclosing region (province for a district)
    pub parent_id: Option<String>,
    pub geometry: MultiPolygon<f64>,
}

impl Region {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        level: RegionLevel,
        parent_id: Option<String>,
        geometry: MultiPolygon<f64>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            level,
            parent_id,
            geometry,
        }
    }

    /// Build a region from a GeoJSON `Polygon`/`MultiPolygon` geometry string
    pub fn from_geojson(
        id: impl Into<String>,
        name: impl Into<String>,
        level: RegionLevel,
        parent_id: Option<String>,
        geojson_str: &str,
    ) -> AqResult<Self> {
        let geometry = parse_geojson_to_multipolygon(geojson_str)?;
        Ok(Self::new(id, name, level, parent_id, geometry))
    }

    pub fn bounding_box(&self) -> Option<BoundingBox> {
        self.geometry
            .bounding_rect()
            .map(|rect| BoundingBox::new(rect.min().x, rect.min().y, rect.max().x, rect.max().y))
    }

    /// Whether the point (lon, lat) lies inside or on the boundary
    pub fn covers(&self, lon: f64, lat: f64) -> bool {
        self.geometry.intersects(&Point::new(lon, lat))
    }
}

/// Parse a GeoJSON string into a [`MultiPolygon`]
///
/// Accepts a bare geometry, a feature, or a single-feature collection.
pub fn parse_geojson_to_multipolygon(geojson_str: &str) -> AqResult<MultiPolygon<f64>> {
    let geojson: GeoJson = geojson_str
        .parse()
        .map_err(|e| AqError::InvalidInput(format!("Invalid GeoJSON: {}", e)))?;

    let geometry = match geojson {
        GeoJson::Geometry(geom) => geom,
        GeoJson::Feature(feature) => feature
            .geometry
            .ok_or_else(|| AqError::InvalidInput("GeoJSON feature has no geometry".to_string()))?,
        GeoJson::FeatureCollection(collection) => collection
            .features
            .into_iter()
            .find_map(|f| f.geometry)
            .ok_or_else(|| AqError::InvalidInput("GeoJSON collection has no geometry".to_string()))?,
    };

    let geo_geom: geo::Geometry<f64> = geometry
        .try_into()
        .map_err(|e| AqError::InvalidInput(format!("Unsupported GeoJSON geometry: {}", e)))?;

    match geo_geom {
        geo::Geometry::MultiPolygon(mp) => Ok(mp),
        geo::Geometry::Polygon(p) => Ok(MultiPolygon(vec![p])),
        _ => Err(AqError::InvalidInput(
            "Region geometry must be a Polygon or MultiPolygon".to_string(),
        )),
    }
}

/// Pixels of `grid` whose centres fall inside `geometry`
pub fn geometry_mask(grid: &Grid, geometry: &MultiPolygon<f64>) -> Array2<bool> {
    let (rows, cols) = grid.shape();
    let mut mask = Array2::from_elem((rows, cols), false);
    let Some(rect) = geometry.bounding_rect() else {
        return mask;
    };

    for row in 0..rows {
        for col in 0..cols {
            let (x, y) = grid.transform.pixel_center(row, col);
            if x < rect.min().x || x > rect.max().x || y < rect.min().y || y > rect.max().y {
                continue;
            }
            mask[[row, col]] = geometry.intersects(&Point::new(x, y));
        }
    }
    mask
}

/// Copy of `grid` with pixels outside `geometry` set to NaN
pub fn clip_to_geometry(grid: &Grid, geometry: &MultiPolygon<f64>) -> Grid {
    let mask = geometry_mask(grid, geometry);
    let mut clipped = grid.clone();
    ndarray::Zip::from(&mut clipped.data).and(&mask).for_each(|value, &inside| {
        if !inside {
            *value = f64::NAN;
        }
    });
    clipped
}
