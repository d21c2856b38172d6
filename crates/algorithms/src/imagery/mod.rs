//! Spectral vegetation indices
//!
//! - Scalar NDVI/EVI for single plots
//! - Per-pixel NDVI/EVI rasters
//! - Per-pixel feature samples for prediction

mod indices;

pub use indices::{
    compute_indices, compute_indices_with, evi, feature_samples, ndvi, vegetation_indices,
    BandMapping, EviParams, SpectralSample, VegetationIndices, EVI, NDVI,
};
