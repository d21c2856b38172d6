//! Vegetation indices
//!
//! NDVI and EVI from NIR, Red and Blue reflectance, as scalars for single
//! plots and per pixel for rasters. A zero denominator or non-finite input
//! is a missing value: `None` for scalars, NaN in rasters.

use crate::maybe_rayon::*;
use forestcarb_core::{Error, FeatureSample, MultiBandRaster, Raster, Result, Stage};
use ndarray::{Array2, Array3, ArrayView2};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Feature name of the NDVI band
pub const NDVI: &str = "NDVI";
/// Feature name of the EVI band
pub const EVI: &str = "EVI";

/// Reflectance of one spatial unit in the three bands the indices need
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpectralSample {
    pub nir: f64,
    pub red: f64,
    pub blue: f64,
}

/// Indices for one spatial unit; `None` where the formula is undefined
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct VegetationIndices {
    pub ndvi: Option<f64>,
    pub evi: Option<f64>,
}

/// Names of the NIR, Red and Blue bands in a raster or plot table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BandMapping {
    pub nir: String,
    pub red: String,
    pub blue: String,
}

impl Default for BandMapping {
    fn default() -> Self {
        Self {
            nir: "NIR".into(),
            red: "Red".into(),
            blue: "Blue".into(),
        }
    }
}

impl BandMapping {
    /// Sentinel-2 L2A band names (B8, B4, B2)
    pub fn sentinel2() -> Self {
        Self {
            nir: "B8".into(),
            red: "B4".into(),
            blue: "B2".into(),
        }
    }

    /// Band names in NIR, Red, Blue order
    pub fn names(&self) -> [&str; 3] {
        [&self.nir, &self.red, &self.blue]
    }
}

// ───────────────────────────────────────────────────────────────────────────
// Formulas
// ───────────────────────────────────────────────────────────────────────────

/// Parameters for EVI
///
/// `EVI = G * (NIR - Red) / (NIR + C1*Red - C2*Blue + L)`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EviParams {
    /// Gain factor (default: 2.5)
    pub g: f64,
    /// Aerosol coefficient for red (default: 6.0)
    pub c1: f64,
    /// Aerosol coefficient for blue (default: 7.5)
    pub c2: f64,
    /// Canopy background adjustment (default: 1.0)
    pub l: f64,
}

impl Default for EviParams {
    fn default() -> Self {
        Self {
            g: 2.5,
            c1: 6.0,
            c2: 7.5,
            l: 1.0,
        }
    }
}

fn ndvi_value(nir: f64, red: f64) -> Option<f64> {
    if !nir.is_finite() || !red.is_finite() {
        return None;
    }
    let denom = nir + red;
    if denom == 0.0 {
        return None;
    }
    Some((nir - red) / denom)
}

fn evi_value(nir: f64, red: f64, blue: f64, p: &EviParams) -> Option<f64> {
    if !nir.is_finite() || !red.is_finite() || !blue.is_finite() {
        return None;
    }
    let denom = nir + p.c1 * red - p.c2 * blue + p.l;
    if denom == 0.0 {
        return None;
    }
    Some(p.g * (nir - red) / denom)
}

/// NDVI and EVI for a single sample with default EVI coefficients.
///
/// Values outside the usual [-1, 1] range are passed through unclamped.
pub fn compute_indices(sample: SpectralSample) -> VegetationIndices {
    compute_indices_with(sample, &EviParams::default())
}

/// [`compute_indices`] with explicit EVI coefficients
pub fn compute_indices_with(sample: SpectralSample, params: &EviParams) -> VegetationIndices {
    VegetationIndices {
        ndvi: ndvi_value(sample.nir, sample.red),
        evi: evi_value(sample.nir, sample.red, sample.blue, params),
    }
}

// ───────────────────────────────────────────────────────────────────────────
// Rasters
// ───────────────────────────────────────────────────────────────────────────

/// Normalized Difference Vegetation Index
///
/// `NDVI = (NIR - Red) / (NIR + Red)`
///
/// Dense vegetation sits around 0.6 to 0.9, bare soil near 0.1 to 0.2 and
/// water below zero.
pub fn ndvi(nir: &Raster, red: &Raster) -> Result<Raster> {
    check_aligned(nir, red)?;
    let data = per_pixel(nir.view(), |row, col| {
        ndvi_value(nir.data()[(row, col)], red.data()[(row, col)])
    })?;
    nir.with_same_meta(data)
}

/// Enhanced Vegetation Index (Huete et al., 2002)
///
/// Less sensitive than NDVI to saturation over dense canopy and to
/// atmospheric effects.
pub fn evi(nir: &Raster, red: &Raster, blue: &Raster, params: EviParams) -> Result<Raster> {
    check_aligned(nir, red)?;
    check_aligned(nir, blue)?;
    let data = per_pixel(nir.view(), |row, col| {
        evi_value(
            nir.data()[(row, col)],
            red.data()[(row, col)],
            blue.data()[(row, col)],
            &params,
        )
    })?;
    nir.with_same_meta(data)
}

/// Compute NDVI and EVI for every pixel of a multi-band raster.
///
/// Returns a two-band raster (`NDVI`, `EVI`) on the input grid.
///
/// # Errors
/// Schema mismatch if any of the mapped bands is absent.
pub fn vegetation_indices(
    raster: &MultiBandRaster,
    mapping: &BandMapping,
) -> Result<MultiBandRaster> {
    let [nir, red, blue] = mapping.names().map(|name| {
        raster.band(name).ok_or_else(|| {
            Error::schema(
                Stage::IndexCalculation,
                format!(
                    "band '{}' not found, available: [{}]",
                    name,
                    raster.band_names().join(", ")
                ),
            )
        })
    });
    let (nir, red, blue) = (nir?, red?, blue?);
    let params = EviParams::default();

    let (rows, cols) = raster.shape();
    let mut data = Array3::from_elem((2, rows, cols), f64::NAN);
    let ndvi_band = per_pixel(nir, |r, c| ndvi_value(nir[(r, c)], red[(r, c)]))?;
    let evi_band = per_pixel(nir, |r, c| {
        evi_value(nir[(r, c)], red[(r, c)], blue[(r, c)], &params)
    })?;
    data.index_axis_mut(ndarray::Axis(0), 0).assign(&ndvi_band);
    data.index_axis_mut(ndarray::Axis(0), 1).assign(&evi_band);

    debug!(rows, cols, "computed vegetation indices");

    MultiBandRaster::new(
        vec![NDVI.to_string(), EVI.to_string()],
        data,
        *raster.transform(),
        raster.crs().cloned(),
    )
}

/// One feature sample per pixel, row-major, named after the bands.
///
/// NaN pixels become missing values.
pub fn feature_samples(raster: &MultiBandRaster) -> Result<Vec<FeatureSample>> {
    if raster.band_count() == 0 {
        return Err(Error::schema(
            Stage::FeatureAssembly,
            "raster has no bands to use as features",
        ));
    }
    let (rows, cols) = raster.shape();
    let names = raster.band_names();
    let data = raster.data();

    Ok((0..rows)
        .into_par_iter()
        .flat_map(|row| {
            (0..cols)
                .map(|col| {
                    names
                        .iter()
                        .enumerate()
                        .map(|(b, name)| (name.as_str(), Some(data[(b, row, col)])))
                        .collect::<FeatureSample>()
                })
                .collect::<Vec<_>>()
        })
        .collect())
}

fn per_pixel<F>(template: ArrayView2<'_, f64>, f: F) -> Result<Array2<f64>>
where
    F: Fn(usize, usize) -> Option<f64> + Sync + Send,
{
    let (rows, cols) = template.dim();
    let data: Vec<f64> = (0..rows)
        .into_par_iter()
        .flat_map(|row| {
            let mut row_data = vec![f64::NAN; cols];
            for (col, out) in row_data.iter_mut().enumerate() {
                if let Some(v) = f(row, col) {
                    *out = v;
                }
            }
            row_data
        })
        .collect();
    Array2::from_shape_vec((rows, cols), data).map_err(|e| Error::Other(e.to_string()))
}

fn check_aligned(a: &Raster, b: &Raster) -> Result<()> {
    if a.shape() != b.shape() {
        return Err(Error::SizeMismatch {
            er: a.rows(),
            ec: a.cols(),
            ar: b.rows(),
            ac: b.cols(),
        });
    }
    if !a.transform().approx_eq(b.transform()) {
        return Err(Error::geometry(
            Stage::IndexCalculation,
            "input bands do not share a geotransform",
        ));
    }
    Ok(())
}
