//! # forestcarb core
//!
//! Core types and I/O for the forestcarb biomass and carbon pipeline.
//!
//! This crate provides:
//! - `Raster`: single-band georeferenced grid
//! - `MultiBandRaster`: named bands sharing one grid
//! - `GeoTransform`, `GridSpec`, `Resolution`: pixel placement
//! - `CRS`: Coordinate Reference System handling
//! - `FeatureSample` / `FeatureSchema`: model inputs with explicit missing values
//! - GeoTIFF I/O

pub mod crs;
pub mod error;
pub mod features;
pub mod io;
pub mod raster;

pub use crs::{CrsKind, CRS};
pub use error::{Error, Result, Stage};
pub use features::{FeatureSample, FeatureSchema};
pub use raster::{GeoTransform, GridSpec, MultiBandRaster, Raster, RasterStatistics, Resolution};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::crs::{CrsKind, CRS};
    pub use crate::error::{Error, Result, Stage};
    pub use crate::features::{FeatureSample, FeatureSchema};
    pub use crate::raster::{GeoTransform, GridSpec, MultiBandRaster, Raster, Resolution};
}
