//! Multi-band raster with shared georeferencing

use crate::crs::CRS;
use crate::error::{Error, Result, Stage};
use crate::raster::{GeoTransform, GridSpec, Raster};
use ndarray::{Array3, ArrayView2, Axis};
use std::collections::HashSet;

/// A stack of named bands sharing one grid.
///
/// Samples live in a single `(band, row, col)` array, so every band has the
/// same width and height by construction; the transform and CRS are stored
/// once. Missing samples are NaN. Instances are not mutated after
/// construction by any pipeline stage.
#[derive(Debug, Clone)]
pub struct MultiBandRaster {
    names: Vec<String>,
    data: Array3<f64>,
    transform: GeoTransform,
    crs: Option<CRS>,
}

impl MultiBandRaster {
    /// Create from a `(band, row, col)` array and one name per band.
    pub fn new(
        names: Vec<String>,
        data: Array3<f64>,
        transform: GeoTransform,
        crs: Option<CRS>,
    ) -> Result<Self> {
        if names.len() != data.len_of(Axis(0)) {
            return Err(Error::InvalidParameter {
                name: "names",
                value: names.len().to_string(),
                reason: format!("expected {} band names", data.len_of(Axis(0))),
            });
        }
        check_unique(&names)?;

        Ok(Self {
            names,
            data,
            transform,
            crs,
        })
    }

    /// Assemble from single-band rasters that share one grid.
    pub fn from_bands(bands: Vec<(String, Raster)>) -> Result<Self> {
        let Some((_, first)) = bands.first() else {
            return Err(Error::geometry(
                Stage::FeatureAssembly,
                "cannot assemble a raster from zero bands",
            ));
        };
        let (rows, cols) = first.shape();
        let transform = *first.transform();
        let crs = first.crs().cloned();

        for (name, band) in &bands[1..] {
            let same_crs = match (&crs, band.crs()) {
                (Some(a), Some(b)) => a.is_equivalent(b),
                (None, None) => true,
                _ => false,
            };
            if band.shape() != (rows, cols) || !band.transform().approx_eq(&transform) || !same_crs {
                return Err(Error::geometry(
                    Stage::FeatureAssembly,
                    format!("band '{}' is not aligned with band '{}'", name, bands[0].0),
                ));
            }
        }

        let mut data = Array3::zeros((bands.len(), rows, cols));
        let mut names = Vec::with_capacity(bands.len());
        for (i, (name, band)) in bands.into_iter().enumerate() {
            data.index_axis_mut(Axis(0), i).assign(band.data());
            names.push(name);
        }

        Self::new(names, data, transform, crs)
    }

    pub fn band_count(&self) -> usize {
        self.names.len()
    }

    pub fn band_names(&self) -> &[String] {
        &self.names
    }

    pub fn rows(&self) -> usize {
        self.data.len_of(Axis(1))
    }

    pub fn cols(&self) -> usize {
        self.data.len_of(Axis(2))
    }

    /// Dimensions as (rows, cols)
    pub fn shape(&self) -> (usize, usize) {
        (self.rows(), self.cols())
    }

    pub fn data(&self) -> &Array3<f64> {
        &self.data
    }

    pub fn transform(&self) -> &GeoTransform {
        &self.transform
    }

    pub fn crs(&self) -> Option<&CRS> {
        self.crs.as_ref()
    }

    /// Grid description of this raster (requires a CRS)
    pub fn grid(&self) -> Option<GridSpec> {
        self.crs
            .clone()
            .map(|crs| GridSpec::new(crs, self.transform, self.rows(), self.cols()))
    }

    /// Geographic bounds (min_x, min_y, max_x, max_y)
    pub fn bounds(&self) -> (f64, f64, f64, f64) {
        self.transform.bounds(self.cols(), self.rows())
    }

    pub fn band_index(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    /// View of one band's samples
    pub fn band(&self, name: &str) -> Option<ArrayView2<'_, f64>> {
        self.band_index(name)
            .map(|i| self.data.index_axis(Axis(0), i))
    }

    /// Copy one band out as a georeferenced single-band raster
    pub fn band_raster(&self, name: &str) -> Option<Raster> {
        self.band(name).map(|view| {
            let mut raster = Raster::from_array(view.to_owned());
            raster.set_transform(self.transform);
            raster.set_crs(self.crs.clone());
            raster
        })
    }

    /// Iterate over (name, samples) pairs in band order
    pub fn bands(&self) -> impl Iterator<Item = (&str, ArrayView2<'_, f64>)> {
        self.names
            .iter()
            .map(String::as_str)
            .zip(self.data.axis_iter(Axis(0)))
    }

    /// Concatenate the bands of two pixel-aligned rasters.
    ///
    /// Fails when the grids differ or a band name appears in both.
    pub fn stack(&self, other: &MultiBandRaster) -> Result<MultiBandRaster> {
        let aligned = match (self.grid(), other.grid()) {
            (Some(a), Some(b)) => a.is_aligned_with(&b),
            (None, None) => {
                self.shape() == other.shape() && self.transform.approx_eq(&other.transform)
            }
            _ => false,
        };
        if !aligned {
            return Err(Error::geometry(
                Stage::FeatureAssembly,
                "cannot stack rasters on different grids; normalize them first",
            ));
        }

        let mut names = self.names.clone();
        names.extend(other.names.iter().cloned());
        let data = ndarray::concatenate(Axis(0), &[self.data.view(), other.data.view()])
            .map_err(|e| Error::Other(e.to_string()))?;

        Self::new(names, data, self.transform, self.crs.clone())
    }
}

fn check_unique(names: &[String]) -> Result<()> {
    let mut seen = HashSet::new();
    for name in names {
        if !seen.insert(name.as_str()) {
            return Err(Error::InvalidParameter {
                name: "names",
                value: name.clone(),
                reason: "duplicate band name".into(),
            });
        }
    }
    Ok(())
}
