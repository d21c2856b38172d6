//! Destination grid description

use crate::crs::CRS;
use crate::raster::GeoTransform;

/// Anisotropic pixel size in map units of the target CRS.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Resolution {
    pub x: f64,
    pub y: f64,
}

impl Resolution {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Square pixels
    pub fn square(size: f64) -> Self {
        Self { x: size, y: size }
    }

    /// Both components finite and strictly positive
    pub fn is_valid(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.x > 0.0 && self.y > 0.0
    }
}

/// A CRS, a north-up transform and a size: everything needed to place pixels.
#[derive(Debug, Clone, PartialEq)]
pub struct GridSpec {
    pub crs: CRS,
    pub transform: GeoTransform,
    pub rows: usize,
    pub cols: usize,
}

impl GridSpec {
    pub fn new(crs: CRS, transform: GeoTransform, rows: usize, cols: usize) -> Self {
        Self {
            crs,
            transform,
            rows,
            cols,
        }
    }

    /// Whether two grids place every pixel at the same location
    pub fn is_aligned_with(&self, other: &GridSpec) -> bool {
        self.rows == other.rows
            && self.cols == other.cols
            && self.crs.is_equivalent(&other.crs)
            && self.transform.approx_eq(&other.transform)
    }

    pub fn bounds(&self) -> (f64, f64, f64, f64) {
        self.transform.bounds(self.cols, self.rows)
    }
}
