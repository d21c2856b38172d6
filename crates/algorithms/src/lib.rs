//! # forestcarb algorithms
//!
//! The biomass and carbon pipeline:
//!
//! - **reproject**: reprojection and resampling onto a uniform grid
//! - **imagery**: NDVI and EVI, per sample and per pixel
//! - **regression**: bagged regression trees for biomass density
//! - **carbon**: biomass to carbon and CO₂
//! - **validation**: RMSE, MAE and R² against field measurements
//! - **acquisition**: imagery and field plot suppliers
//! - **workflow**: plot-level train/validate/convert run

pub mod acquisition;
pub mod carbon;
pub mod imagery;
pub(crate) mod maybe_rayon;
pub mod regression;
pub mod reproject;
pub mod validation;
pub mod workflow;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::acquisition::{
        AcquisitionRequest, BBox, GeoTiffDirectorySupplier, ImagerySupplier, PlotTable,
    };
    pub use crate::carbon::{
        carbon_layers, convert, total_stock, CarbonEstimate, CarbonStock, CarbonSummary,
        CARBON_FRACTION, CO2_PER_CARBON,
    };
    pub use crate::imagery::{
        compute_indices, evi, feature_samples, ndvi, vegetation_indices, BandMapping,
        EviParams, SpectralSample, VegetationIndices,
    };
    pub use crate::regression::{
        predict_raster, train_test_split, BiomassEstimator, BiomassModel, ForestParams,
        MaxFeatures,
    };
    pub use crate::reproject::{align_to, normalize, normalize_with, NormalizeParams, ResampleMethod};
    pub use crate::validation::{validate, validate_predictions, ValidationReport};
    pub use crate::workflow::{run_plot_workflow, WorkflowParams, WorkflowReport};
    pub use forestcarb_core::prelude::*;
}
