//! Raster data structures

mod bands;
mod geotransform;
mod grid;
mod grid_spec;

pub use bands::MultiBandRaster;
pub use geotransform::GeoTransform;
pub use grid::{Raster, RasterStatistics};
pub use grid_spec::{GridSpec, Resolution};
