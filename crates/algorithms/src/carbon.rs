//! Biomass to carbon and CO₂ conversion
//!
//! Fixed domain constants: dry biomass is 50% carbon, and each unit of
//! carbon corresponds to 44/12 units of CO₂. Negative biomass is passed
//! through unchanged.

use forestcarb_core::{CrsKind, Error, MultiBandRaster, Raster, Result, Stage};
use ndarray::{stack, Axis};
use serde::Serialize;
use tracing::debug;

/// Carbon share of dry biomass
pub const CARBON_FRACTION: f64 = 0.5;

/// Molar mass ratio of CO₂ to carbon
pub const CO2_PER_CARBON: f64 = 44.0 / 12.0;

/// Band name of the carbon layer
pub const CARBON_BAND: &str = "Carbon";
/// Band name of the CO₂ layer
pub const CO2_BAND: &str = "CO2";

/// Carbon and CO₂ equivalent of one biomass value, in the biomass units
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CarbonEstimate {
    pub carbon: f64,
    pub co2: f64,
}

/// Convert a biomass density to carbon and CO₂.
pub fn convert(biomass: f64) -> CarbonEstimate {
    let carbon = biomass * CARBON_FRACTION;
    CarbonEstimate {
        carbon,
        co2: carbon * CO2_PER_CARBON,
    }
}

/// Missing biomass stays missing
pub fn convert_optional(biomass: Option<f64>) -> Option<CarbonEstimate> {
    biomass.filter(|b| b.is_finite()).map(convert)
}

/// Carbon and CO₂ density layers from a biomass density raster.
///
/// NaN pixels stay NaN in both bands.
pub fn carbon_layers(biomass: &Raster) -> Result<MultiBandRaster> {
    let carbon = biomass.data().mapv(|b| convert(b).carbon);
    let co2 = biomass.data().mapv(|b| convert(b).co2);
    let data = stack(Axis(0), &[carbon.view(), co2.view()])
        .map_err(|e| Error::Other(e.to_string()))?;
    MultiBandRaster::new(
        vec![CARBON_BAND.to_string(), CO2_BAND.to_string()],
        data,
        *biomass.transform(),
        biomass.crs().cloned(),
    )
}

/// Means over a set of biomass densities
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CarbonSummary {
    /// Non-missing values used
    pub count: usize,
    pub mean_biomass: f64,
    pub mean_carbon: f64,
    pub mean_co2: f64,
}

impl CarbonSummary {
    /// Summarise the non-missing densities; `None` if there are none.
    pub fn from_densities<I>(densities: I) -> Option<Self>
    where
        I: IntoIterator<Item = Option<f64>>,
    {
        let (count, sum) = densities
            .into_iter()
            .flatten()
            .filter(|b| b.is_finite())
            .fold((0usize, 0.0), |(n, s), b| (n + 1, s + b));
        if count == 0 {
            return None;
        }
        let mean_biomass = sum / count as f64;
        let CarbonEstimate { carbon, co2 } = convert(mean_biomass);
        Some(Self {
            count,
            mean_biomass,
            mean_carbon: carbon,
            mean_co2: co2,
        })
    }
}

/// Area-weighted totals over a biomass density map
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CarbonStock {
    /// Pixels with a biomass value
    pub pixels: usize,
    /// Area covered by those pixels, in hectares
    pub area_ha: f64,
    /// Total biomass, density units × ha (t when densities are t/ha)
    pub biomass: f64,
    pub carbon: f64,
    pub co2: f64,
}

/// Total biomass, carbon and CO₂ over a biomass density map in t/ha.
///
/// # Errors
/// Reprojection error unless the raster is on a UTM grid, where pixel
/// areas are metric.
pub fn total_stock(biomass: &Raster) -> Result<CarbonStock> {
    match biomass.crs().and_then(|c| c.kind()) {
        Some(CrsKind::Utm { .. }) => {}
        _ => {
            return Err(Error::reprojection(
                Stage::CarbonConversion,
                format!(
                    "area totals need a UTM grid, got {}",
                    biomass
                        .crs()
                        .map(|c| c.identifier())
                        .unwrap_or_else(|| "no CRS".into())
                ),
            ))
        }
    }

    let pixel_ha = biomass.transform().pixel_area() / 10_000.0;
    let (pixels, density_sum) = biomass
        .data()
        .iter()
        .filter(|v| v.is_finite())
        .fold((0usize, 0.0), |(n, s), &v| (n + 1, s + v));

    let total = density_sum * pixel_ha;
    let CarbonEstimate { carbon, co2 } = convert(total);
    debug!(pixels, pixel_ha, total, "computed carbon stock");

    Ok(CarbonStock {
        pixels,
        area_ha: pixels as f64 * pixel_ha,
        biomass: total,
        carbon,
        co2,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use forestcarb_core::{GeoTransform, CRS};

    #[test]
    fn test_convert_reference() {
        let est = convert(200.0);
        assert!((est.carbon - 100.0).abs() < 1e-3, "Expected 100, got {}", est.carbon);
        assert!((est.co2 - 366.667).abs() < 1e-3, "Expected 366.667, got {}", est.co2);
    }

    #[test]
    fn test_convert_exact() {
        for b in [0.0, 1.0, 37.5, 412.25] {
            let est = convert(b);
            assert_eq!(est.carbon, 0.5 * b);
            assert_eq!(est.co2, (0.5 * b) * (44.0 / 12.0));
        }
    }

    #[test]
    fn test_negative_passes_through() {
        assert_eq!(convert(-10.0).carbon, -5.0);
    }

    #[test]
    fn test_missing_stays_missing() {
        assert_eq!(convert_optional(None), None);
        assert_eq!(convert_optional(Some(f64::NAN)), None);
        assert_eq!(convert_optional(Some(200.0)), Some(convert(200.0)));
    }

    #[test]
    fn test_carbon_layers() {
        let mut biomass = Raster::filled(2, 2, 200.0);
        biomass.set(1, 1, f64::NAN).unwrap();
        let layers = carbon_layers(&biomass).unwrap();
        assert_eq!(layers.band_names(), &["Carbon".to_string(), "CO2".to_string()]);
        assert_eq!(layers.band(CARBON_BAND).unwrap()[(0, 0)], 100.0);
        assert_eq!(layers.band(CO2_BAND).unwrap()[(0, 1)], convert(200.0).co2);
        assert!(layers.band(CO2_BAND).unwrap()[(1, 1)].is_nan());
    }

    #[test]
    fn test_summary() {
        let summary = CarbonSummary::from_densities([Some(100.0), None, Some(300.0)]).unwrap();
        assert_eq!(summary.count, 2);
        assert_eq!(summary.mean_biomass, 200.0);
        assert_eq!(summary.mean_carbon, 100.0);
        assert!(CarbonSummary::from_densities([None, None]).is_none());
    }

    #[test]
    fn test_total_stock_utm() {
        // 100 m pixels = 1 ha each
        let mut biomass = Raster::filled(2, 3, 150.0);
        biomass.set_transform(GeoTransform::new(400_000.0, 5_000_000.0, 100.0, -100.0));
        biomass.set_crs(Some(CRS::utm(30, false)));
        biomass.set(0, 0, f64::NAN).unwrap();

        let stock = total_stock(&biomass).unwrap();
        assert_eq!(stock.pixels, 5);
        assert!((stock.area_ha - 5.0).abs() < 1e-12);
        assert!((stock.biomass - 750.0).abs() < 1e-9);
        assert!((stock.carbon - 375.0).abs() < 1e-9);
    }

    #[test]
    fn test_total_stock_needs_utm() {
        let mut biomass = Raster::filled(2, 2, 150.0);
        biomass.set_crs(Some(CRS::wgs84()));
        let err = total_stock(&biomass).unwrap_err();
        assert!(matches!(
            err,
            Error::Reprojection { stage: Stage::CarbonConversion, .. }
        ));
    }
}
