//! Input/output for rasters, region boundaries and population grids

pub mod population;
pub mod raster;
pub mod regions;

pub use population::PopulationGrid;
pub use raster::{RasterInfo, ZonalStats};
pub use regions::{Region, RegionLevel};
