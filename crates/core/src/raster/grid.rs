//! Single-band raster

use crate::crs::CRS;
use crate::error::{Error, Result};
use crate::raster::{GeoTransform, GridSpec};
use ndarray::{Array2, ArrayView2};

/// A georeferenced single-band grid of `f64` samples.
///
/// Missing samples are stored as NaN. This is the per-band view handed to
/// index kernels and the type of biomass and carbon maps.
///
/// # Example
///
/// ```ignore
/// use forestcarb_core::Raster;
///
/// let mut raster = Raster::new(100, 100);
/// raster.set(10, 20, 0.42)?;
/// let value = raster.get(10, 20)?;
/// ```
#[derive(Debug, Clone)]
pub struct Raster {
    /// Samples in row-major order (row, col)
    data: Array2<f64>,
    transform: GeoTransform,
    crs: Option<CRS>,
}

impl Raster {
    /// Zero-filled, un-georeferenced
    pub fn new(rows: usize, cols: usize) -> Self {
        Self::from_array(Array2::zeros((rows, cols)))
    }

    pub fn filled(rows: usize, cols: usize, value: f64) -> Self {
        Self::from_array(Array2::from_elem((rows, cols), value))
    }

    /// Row-major samples; fails unless `data.len() == rows * cols`
    pub fn from_vec(data: Vec<f64>, rows: usize, cols: usize) -> Result<Self> {
        if data.len() != rows * cols {
            return Err(Error::InvalidDimensions {
                width: cols,
                height: rows,
            });
        }

        let array = Array2::from_shape_vec((rows, cols), data)
            .map_err(|e| Error::Other(e.to_string()))?;
        Ok(Self::from_array(array))
    }

    pub fn from_array(data: Array2<f64>) -> Self {
        Self {
            data,
            transform: GeoTransform::default(),
            crs: None,
        }
    }

    /// New samples on this raster's grid
    pub fn with_same_meta(&self, data: Array2<f64>) -> Result<Self> {
        if data.dim() != self.shape() {
            return Err(Error::SizeMismatch {
                er: self.rows(),
                ec: self.cols(),
                ar: data.nrows(),
                ac: data.ncols(),
            });
        }
        Ok(Self {
            data,
            transform: self.transform,
            crs: self.crs.clone(),
        })
    }

    pub fn rows(&self) -> usize {
        self.data.nrows()
    }

    pub fn cols(&self) -> usize {
        self.data.ncols()
    }

    /// Dimensions as (rows, cols)
    pub fn shape(&self) -> (usize, usize) {
        self.data.dim()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn get(&self, row: usize, col: usize) -> Result<f64> {
        self.data
            .get((row, col))
            .copied()
            .ok_or(Error::IndexOutOfBounds {
                row,
                col,
                rows: self.rows(),
                cols: self.cols(),
            })
    }

    pub fn set(&mut self, row: usize, col: usize, value: f64) -> Result<()> {
        let (rows, cols) = self.shape();
        let cell = self.data.get_mut((row, col)).ok_or(Error::IndexOutOfBounds {
            row,
            col,
            rows,
            cols,
        })?;
        *cell = value;
        Ok(())
    }

    pub fn view(&self) -> ArrayView2<'_, f64> {
        self.data.view()
    }

    pub fn data(&self) -> &Array2<f64> {
        &self.data
    }

    pub fn transform(&self) -> &GeoTransform {
        &self.transform
    }

    pub fn set_transform(&mut self, transform: GeoTransform) {
        self.transform = transform;
    }

    pub fn crs(&self) -> Option<&CRS> {
        self.crs.as_ref()
    }

    pub fn set_crs(&mut self, crs: Option<CRS>) {
        self.crs = crs;
    }

    /// `None` without a CRS
    pub fn grid(&self) -> Option<GridSpec> {
        self.crs
            .clone()
            .map(|crs| GridSpec::new(crs, self.transform, self.rows(), self.cols()))
    }

    /// (min_x, min_y, max_x, max_y) in map units
    pub fn bounds(&self) -> (f64, f64, f64, f64) {
        self.transform.bounds(self.cols(), self.rows())
    }

    /// Map coordinates of the pixel centre
    pub fn pixel_to_geo(&self, col: usize, row: usize) -> (f64, f64) {
        self.transform.pixel_to_geo(col, row)
    }

    /// Min, max and mean of the finite samples
    pub fn statistics(&self) -> RasterStatistics {
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        let mut sum = 0.0;
        let mut count = 0usize;

        for &value in self.data.iter().filter(|v| v.is_finite()) {
            min = min.min(value);
            max = max.max(value);
            sum += value;
            count += 1;
        }

        let (min, max, mean) = if count > 0 {
            (Some(min), Some(max), Some(sum / count as f64))
        } else {
            (None, None, None)
        };

        RasterStatistics {
            min,
            max,
            mean,
            valid_count: count,
            nodata_count: self.len() - count,
        }
    }
}

/// Output of [`Raster::statistics`]; NaN and infinite samples count as nodata
#[derive(Debug, Clone, PartialEq)]
pub struct RasterStatistics {
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub mean: Option<f64>,
    pub valid_count: usize,
    pub nodata_count: usize,
}
