use crate::io::raster::{self, RasterInfo};
use crate::types::{AqResult, BoundingBox, Grid, RasterRef};
use std::sync::OnceLock;

/// Population grid reader shared by the exposure components
///
/// Constructed once at startup and passed by reference; metadata is loaded
/// on first use.
pub struct PopulationGrid {
    source: RasterRef,
    band: usize,
    info: OnceLock<RasterInfo>,
}

impl PopulationGrid {
    pub fn new(source: RasterRef) -> Self {
        Self {
            source,
            band: 1,
            info: OnceLock::new(),
        }
    }

    pub fn with_band(mut self, band: usize) -> Self {
        self.band = band;
        self
    }

    pub fn source(&self) -> &RasterRef {
        &self.source
    }

    /// Raster metadata, read once
    pub fn info(&self) -> AqResult<&RasterInfo> {
        if let Some(info) = self.info.get() {
            return Ok(info);
        }

        let info = match &self.source {
            RasterRef::Path(path) => raster::read_info(path)?,
            RasterRef::Memory(grid) => RasterInfo {
                shape: grid.shape(),
                transform: grid.transform,
                nodata: grid.nodata,
                band_count: 1,
            },
        };
        log::info!(
            "Population grid {}: {}x{} pixels",
            self.source.describe(),
            info.shape.0,
            info.shape.1
        );
        Ok(self.info.get_or_init(|| info))
    }

    /// Population pixels intersecting `bounds`
    pub fn read_region(&self, bounds: &BoundingBox) -> AqResult<Grid> {
        self.info()?;
        raster::load_window(&self.source, bounds, self.band)
    }

    /// The full population grid
    pub fn read_all(&self) -> AqResult<Grid> {
        raster::load(&self.source, self.band)
    }
}
