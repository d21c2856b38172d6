//! Coordinate transforms and grid normalization

mod normalize;
mod projection;

pub use normalize::{
    align_to, normalize, normalize_with, target_grid, NormalizeParams, ResampleMethod,
};
pub use projection::Projector;
