//! Biomass regression
//!
//! - Bagged CART regression trees with a pinned seed
//! - Raster prediction
//! - Seeded hold-out splits

mod forest;
mod split;
mod tree;

pub use forest::{predict_raster, BiomassEstimator, BiomassModel, ForestParams, MaxFeatures};
pub use split::train_test_split;
