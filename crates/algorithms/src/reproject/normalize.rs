//! Reprojection and resampling onto a uniform grid
//!
//! Every band of a raster is resampled with the same kernel onto one
//! destination grid, so all products derived from it are pixel-aligned.

use crate::maybe_rayon::*;
use crate::reproject::Projector;
use forestcarb_core::{
    Error, GeoTransform, GridSpec, MultiBandRaster, Resolution, Result, Stage, CRS,
};
use ndarray::{Array3, ArrayView2, Axis};
use tracing::{debug, info};

/// Fractional offsets closer than this to a pixel centre snap onto it
const CENTRE_SNAP: f64 = 1e-9;

/// Grid sizes within this many pixels of an integer are not rounded up
const SIZE_SNAP: f64 = 1e-6;

/// Upper bound on destination pixels, guarding against absurd resolutions
const MAX_PIXELS: usize = 1 << 31;

/// Interpolation kernel used for every band
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResampleMethod {
    /// Bilinear interpolation between the four nearest pixel centres
    #[default]
    Bilinear,
    /// Value of the containing source pixel
    Nearest,
}

/// Parameters for normalization
#[derive(Debug, Clone)]
pub struct NormalizeParams {
    /// Kernel applied to all bands (default: bilinear)
    pub method: ResampleMethod,
    /// Points sampled along each footprint edge when projecting the extent
    pub edge_samples: usize,
}

impl Default for NormalizeParams {
    fn default() -> Self {
        Self {
            method: ResampleMethod::Bilinear,
            edge_samples: 32,
        }
    }
}

/// Reproject and resample a raster to `target_crs` at `resolution`.
///
/// The destination grid covers the same ground extent as the source.
/// Re-normalizing an already normalized raster to the same target returns
/// the same grid and samples.
///
/// # Errors
/// - raster geometry error: zero bands, zero rows/columns, degenerate
///   transform or non-positive resolution
/// - reprojection error: missing or unsupported source/target CRS
pub fn normalize(
    source: &MultiBandRaster,
    target_crs: &CRS,
    resolution: Resolution,
) -> Result<MultiBandRaster> {
    normalize_with(source, target_crs, resolution, &NormalizeParams::default())
}

/// [`normalize`] with explicit parameters
pub fn normalize_with(
    source: &MultiBandRaster,
    target_crs: &CRS,
    resolution: Resolution,
    params: &NormalizeParams,
) -> Result<MultiBandRaster> {
    let grid = target_grid(source, target_crs, resolution, params)?;
    align_to(source, &grid, params)
}

/// Compute the destination grid [`normalize`] would produce.
pub fn target_grid(
    source: &MultiBandRaster,
    target_crs: &CRS,
    resolution: Resolution,
    params: &NormalizeParams,
) -> Result<GridSpec> {
    let source_crs = validate_source(source)?;
    if !resolution.is_valid() {
        return Err(Error::geometry(
            Stage::Normalization,
            format!(
                "target resolution must be positive, got {} x {}",
                resolution.x, resolution.y
            ),
        ));
    }

    let projector = Projector::new(source_crs, target_crs)?;
    let (min_x, min_y, max_x, max_y) = if projector.is_identity() {
        source.bounds()
    } else {
        projected_bounds(source, &projector, params.edge_samples.max(2))?
    };

    let cols = grid_count(max_x - min_x, resolution.x);
    let rows = grid_count(max_y - min_y, resolution.y);
    if rows.saturating_mul(cols) > MAX_PIXELS {
        return Err(Error::geometry(
            Stage::Normalization,
            format!("destination grid of {} x {} pixels is too large", cols, rows),
        ));
    }

    let transform = GeoTransform::new(min_x, max_y, resolution.x, -resolution.y);
    Ok(GridSpec::new(target_crs.clone(), transform, rows, cols))
}

/// Resample a raster onto an existing grid.
///
/// Used to snap ancillary layers onto the grid of the imagery.
pub fn align_to(
    source: &MultiBandRaster,
    grid: &GridSpec,
    params: &NormalizeParams,
) -> Result<MultiBandRaster> {
    let source_crs = validate_source(source)?;
    if grid.rows == 0 || grid.cols == 0 || !grid.transform.is_valid() {
        return Err(Error::geometry(
            Stage::Normalization,
            format!("invalid destination grid {} x {}", grid.cols, grid.rows),
        ));
    }

    // Destination pixel centres are mapped back into the source CRS.
    let to_source = Projector::new(&grid.crs, source_crs)?;
    let src_transform = *source.transform();
    let n_bands = source.band_count();
    let (rows, cols) = (grid.rows, grid.cols);
    let method = params.method;

    debug!(
        from = %source_crs,
        to = %grid.crs,
        src_rows = source.rows(),
        src_cols = source.cols(),
        rows,
        cols,
        ?method,
        "resampling raster"
    );

    let bands: Vec<ArrayView2<'_, f64>> = source.data().axis_iter(Axis(0)).collect();

    let row_blocks: Vec<Vec<f64>> = (0..rows)
        .into_par_iter()
        .map(|row| {
            let mut block = vec![f64::NAN; n_bands * cols];
            for col in 0..cols {
                let (x, y) = grid.transform.pixel_to_geo(col, row);
                let (sx, sy) = to_source.transform(x, y);
                let (px, py) = src_transform.geo_to_pixel(sx, sy);
                for (b, band) in bands.iter().enumerate() {
                    block[b * cols + col] = match method {
                        ResampleMethod::Bilinear => sample_bilinear(band, px, py),
                        ResampleMethod::Nearest => sample_nearest(band, px, py),
                    };
                }
            }
            block
        })
        .collect();

    let mut data = Array3::from_elem((n_bands, rows, cols), f64::NAN);
    for (row, block) in row_blocks.iter().enumerate() {
        for b in 0..n_bands {
            let src = &block[b * cols..(b + 1) * cols];
            for (col, &value) in src.iter().enumerate() {
                data[(b, row, col)] = value;
            }
        }
    }

    info!(
        bands = n_bands,
        rows,
        cols,
        crs = %grid.crs,
        "normalized raster"
    );

    MultiBandRaster::new(
        source.band_names().to_vec(),
        data,
        grid.transform,
        Some(grid.crs.clone()),
    )
}

fn validate_source(source: &MultiBandRaster) -> Result<&CRS> {
    if source.band_count() == 0 {
        return Err(Error::geometry(Stage::Normalization, "source raster has no bands"));
    }
    if source.rows() == 0 || source.cols() == 0 {
        return Err(Error::geometry(
            Stage::Normalization,
            format!("source raster has invalid dimensions {} x {}", source.cols(), source.rows()),
        ));
    }
    if !source.transform().is_valid() {
        return Err(Error::geometry(
            Stage::Normalization,
            "source raster has a degenerate geotransform",
        ));
    }
    source.crs().ok_or_else(|| {
        Error::reprojection(Stage::Normalization, "source raster has no CRS")
    })
}

/// Envelope of the source footprint in the target CRS.
///
/// The footprint edges are densified before projection, since straight
/// edges in one CRS are curves in another.
fn projected_bounds(
    source: &MultiBandRaster,
    projector: &Projector,
    samples: usize,
) -> Result<(f64, f64, f64, f64)> {
    let (rows, cols) = (source.rows() as f64, source.cols() as f64);
    let transform = source.transform();

    let mut min_x = f64::INFINITY;
    let mut min_y = f64::INFINITY;
    let mut max_x = f64::NEG_INFINITY;
    let mut max_y = f64::NEG_INFINITY;

    for i in 0..=samples {
        let t = i as f64 / samples as f64;
        let edges = [
            (t * cols, 0.0),
            (t * cols, rows),
            (0.0, t * rows),
            (cols, t * rows),
        ];
        for (col, row) in edges {
            let (x, y) = transform.apply(col, row);
            let (px, py) = projector.transform(x, y);
            if px.is_finite() && py.is_finite() {
                min_x = min_x.min(px);
                min_y = min_y.min(py);
                max_x = max_x.max(px);
                max_y = max_y.max(py);
            }
        }
    }

    if !(min_x < max_x && min_y < max_y) {
        return Err(Error::reprojection(
            Stage::Normalization,
            "source footprint cannot be projected into the target CRS",
        ));
    }
    Ok((min_x, min_y, max_x, max_y))
}

fn grid_count(span: f64, res: f64) -> usize {
    let n = span / res;
    let n = if (n - n.round()).abs() < SIZE_SNAP {
        n.round()
    } else {
        n.ceil()
    };
    (n as usize).max(1)
}

/// Split a continuous index (pixel centres at integers) into a base index
/// and a fractional weight toward the next pixel.
fn split_index(t: f64, n: usize) -> (usize, f64) {
    let mut base = t.floor();
    let mut frac = t - base;
    if frac < CENTRE_SNAP {
        frac = 0.0;
    } else if frac > 1.0 - CENTRE_SNAP {
        base += 1.0;
        frac = 0.0;
    }
    let base = (base.max(0.0) as usize).min(n - 1);
    if base == n - 1 {
        frac = 0.0;
    }
    (base, frac)
}

fn inside(band: &ArrayView2<'_, f64>, px: f64, py: f64) -> bool {
    let (rows, cols) = band.dim();
    px.is_finite() && py.is_finite() && px >= 0.0 && py >= 0.0 && px <= cols as f64 && py <= rows as f64
}

/// Bilinear sample at fractional pixel position (`px`, `py`).
///
/// Neighbours with zero weight are ignored; a contributing NaN neighbour
/// yields NaN. Positions within half a pixel of the border clamp to it.
fn sample_bilinear(band: &ArrayView2<'_, f64>, px: f64, py: f64) -> f64 {
    if !inside(band, px, py) {
        return f64::NAN;
    }
    let (rows, cols) = band.dim();
    let (c0, fx) = split_index((px - 0.5).clamp(0.0, (cols - 1) as f64), cols);
    let (r0, fy) = split_index((py - 0.5).clamp(0.0, (rows - 1) as f64), rows);

    let taps = [
        (r0, c0, (1.0 - fx) * (1.0 - fy)),
        (r0, c0 + 1, fx * (1.0 - fy)),
        (r0 + 1, c0, (1.0 - fx) * fy),
        (r0 + 1, c0 + 1, fx * fy),
    ];

    let mut acc = 0.0;
    for (r, c, w) in taps {
        if w == 0.0 {
            continue;
        }
        let v = band[(r, c)];
        if v.is_nan() {
            return f64::NAN;
        }
        acc += w * v;
    }
    acc
}

fn sample_nearest(band: &ArrayView2<'_, f64>, px: f64, py: f64) -> f64 {
    if !inside(band, px, py) {
        return f64::NAN;
    }
    let (rows, cols) = band.dim();
    let col = (px.floor() as usize).min(cols - 1);
    let row = (py.floor() as usize).min(rows - 1);
    band[(row, col)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use forestcarb_core::Raster;

    /// 4x6 UTM raster with a linear ramp per band
    fn ramp_raster() -> MultiBandRaster {
        let mut bands = Vec::new();
        for (i, name) in ["NIR", "Red", "Blue"].iter().enumerate() {
            let mut r = Raster::new(4, 6);
            r.set_transform(GeoTransform::new(500_000.0, 4_500_040.0, 10.0, -10.0));
            r.set_crs(Some(CRS::utm(33, true)));
            for row in 0..4 {
                for col in 0..6 {
                    r.set(row, col, (i + 1) as f64 * (col as f64 + 10.0 * row as f64)).unwrap();
                }
            }
            bands.push((name.to_string(), r));
        }
        MultiBandRaster::from_bands(bands).unwrap()
    }

    #[test]
    fn test_same_grid_is_exact_copy() {
        let src = ramp_raster();
        let out = normalize(&src, &CRS::utm(33, true), Resolution::square(10.0)).unwrap();
        assert_eq!(out.shape(), src.shape());
        assert_eq!(out.transform(), src.transform());
        assert_eq!(out.data(), src.data());
    }

    #[test]
    fn test_downsample_covers_extent() {
        let src = ramp_raster();
        let out = normalize(&src, &CRS::utm(33, true), Resolution::new(20.0, 20.0)).unwrap();
        assert_eq!(out.shape(), (2, 3));
        assert_eq!(out.band_count(), 3);
        assert_eq!(out.bounds(), src.bounds());

        // Centre of output pixel (0,0) sits between source centres (0..1, 0..1)
        let expected = (0.5 + 10.0 * 0.5) * 1.0;
        assert_relative_eq!(out.band("NIR").unwrap()[(0, 0)], expected, epsilon = 1e-9);
        assert_relative_eq!(out.band("Red").unwrap()[(0, 0)], 2.0 * expected, epsilon = 1e-9);
    }

    #[test]
    fn test_anisotropic_resolution_rounds_up() {
        let src = ramp_raster();
        let out = normalize(&src, &CRS::utm(33, true), Resolution::new(25.0, 15.0)).unwrap();
        // 60 m / 25 m -> 3 columns, 40 m / 15 m -> 3 rows
        assert_eq!(out.shape(), (3, 3));
        assert_eq!(out.transform().resolution(), (25.0, 15.0));
    }

    #[test]
    fn test_nan_contaminates_only_neighbours() {
        let mut data = ramp_raster().data().clone();
        data[(0, 0, 0)] = f64::NAN;
        let src = MultiBandRaster::new(
            vec!["NIR".into(), "Red".into(), "Blue".into()],
            data,
            *ramp_raster().transform(),
            Some(CRS::utm(33, true)),
        )
        .unwrap();

        let out = normalize(&src, &CRS::utm(33, true), Resolution::square(20.0)).unwrap();
        assert!(out.band("NIR").unwrap()[(0, 0)].is_nan());
        assert!(out.band("NIR").unwrap()[(1, 2)].is_finite());
        assert!(out.band("Red").unwrap()[(0, 0)].is_finite());
    }

    #[test]
    fn test_reproject_to_geographic_and_back() {
        let src = ramp_raster();
        let geo = normalize(&src, &CRS::wgs84(), Resolution::square(0.0001)).unwrap();
        assert_eq!(geo.crs(), Some(&CRS::wgs84()));
        let (min_x, min_y, max_x, max_y) = geo.bounds();
        assert!(min_x > 14.0 && max_x < 16.0, "longitude near zone 33 CM: {min_x}..{max_x}");
        assert!(min_y > 40.0 && max_y < 41.0, "latitude ~40.6: {min_y}..{max_y}");
        assert!(geo.band("NIR").unwrap().iter().any(|v| v.is_finite()));
    }

    #[test]
    fn test_idempotent() {
        let src = ramp_raster();
        let target = CRS::web_mercator();
        let res = Resolution::new(7.0, 9.0);
        let once = normalize(&src, &target, res).unwrap();
        let twice = normalize(&once, &target, res).unwrap();

        assert_eq!(once.shape(), twice.shape());
        assert!(once.transform().approx_eq(twice.transform()));
        for (a, b) in once.data().iter().zip(twice.data().iter()) {
            assert!((a.is_nan() && b.is_nan()) || (a - b).abs() < 1e-9, "{a} vs {b}");
        }
    }

    #[test]
    fn test_nearest_applies_to_all_bands() {
        let src = ramp_raster();
        let params = NormalizeParams {
            method: ResampleMethod::Nearest,
            ..Default::default()
        };
        let out = normalize_with(&src, &CRS::utm(33, true), Resolution::square(30.0), &params).unwrap();
        // Output centre (15, 15) m from origin falls inside source pixel (1, 1)
        assert_eq!(out.band("NIR").unwrap()[(0, 0)], 11.0);
        assert_eq!(out.band("Blue").unwrap()[(0, 0)], 33.0);
    }

    #[test]
    fn test_zero_bands_is_geometry_error() {
        let src = MultiBandRaster::new(
            vec![],
            Array3::zeros((0, 4, 4)),
            GeoTransform::default(),
            Some(CRS::wgs84()),
        )
        .unwrap();
        let err = normalize(&src, &CRS::wgs84(), Resolution::square(1.0)).unwrap_err();
        assert!(matches!(err, Error::RasterGeometry { stage: Stage::Normalization, .. }));
    }

    #[test]
    fn test_zero_dimension_is_geometry_error() {
        let src = MultiBandRaster::new(
            vec!["NIR".into()],
            Array3::zeros((1, 0, 4)),
            GeoTransform::default(),
            Some(CRS::wgs84()),
        )
        .unwrap();
        assert!(matches!(
            normalize(&src, &CRS::wgs84(), Resolution::square(1.0)),
            Err(Error::RasterGeometry { .. })
        ));
    }

    #[test]
    fn test_bad_resolution_is_geometry_error() {
        let src = ramp_raster();
        assert!(matches!(
            normalize(&src, &CRS::utm(33, true), Resolution::new(10.0, 0.0)),
            Err(Error::RasterGeometry { .. })
        ));
    }

    #[test]
    fn test_unsupported_crs_is_reprojection_error() {
        let src = ramp_raster();
        let err = normalize(&src, &CRS::from_epsg(2154), Resolution::square(10.0)).unwrap_err();
        assert!(matches!(err, Error::Reprojection { .. }));

        let no_crs = MultiBandRaster::new(
            src.band_names().to_vec(),
            src.data().clone(),
            *src.transform(),
            None,
        )
        .unwrap();
        let err = normalize(&no_crs, &CRS::wgs84(), Resolution::square(1.0)).unwrap_err();
        assert!(matches!(err, Error::Reprojection { .. }));
    }

    #[test]
    fn test_same_crs_resample_outside_supported_families() {
        let src = ramp_raster();
        let lambert = MultiBandRaster::new(
            src.band_names().to_vec(),
            src.data().clone(),
            *src.transform(),
            Some(CRS::from_epsg(2154)),
        )
        .unwrap();

        let out = normalize(&lambert, &CRS::from_epsg(2154), Resolution::square(20.0)).unwrap();
        assert_eq!(out.shape(), (2, 3));
        assert_eq!(out.crs(), Some(&CRS::from_epsg(2154)));
        assert_relative_eq!(out.band("NIR").unwrap()[(0, 0)], 5.5, epsilon = 1e-9);

        let err = normalize(&lambert, &CRS::wgs84(), Resolution::square(0.001)).unwrap_err();
        assert!(matches!(err, Error::Reprojection { .. }));
    }

    #[test]
    fn test_align_to_reference_grid() {
        let src = ramp_raster();
        let reference = GridSpec::new(
            CRS::utm(33, true),
            GeoTransform::new(500_005.0, 4_500_035.0, 10.0, -10.0),
            3,
            5,
        );
        let out = align_to(&src, &reference, &NormalizeParams::default()).unwrap();
        assert_eq!(out.grid().unwrap(), reference);
        // Shifted half a pixel: average of four ramp values around (0.5, 0.5)
        assert_relative_eq!(out.band("NIR").unwrap()[(0, 0)], 5.5, epsilon = 1e-9);
    }

    #[test]
    fn test_source_not_mutated() {
        let src = ramp_raster();
        let before = src.data().clone();
        let _ = normalize(&src, &CRS::wgs84(), Resolution::square(0.0002)).unwrap();
        assert_eq!(src.data(), &before);
    }
}
