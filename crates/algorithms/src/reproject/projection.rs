//! Pure-Rust point transforms between WGS84, Web Mercator and UTM.
//!
//! UTM uses the Snyder (1987, USGS Prof. Paper 1395) series for the forward
//! and inverse transverse Mercator on the WGS84 ellipsoid. Web Mercator is
//! the spherical form used by EPSG:3857.

use forestcarb_core::{CrsKind, Error, Result, Stage, CRS};

// ── WGS84 ellipsoid constants ────────────────────────────────────────────

const A: f64 = 6_378_137.0;
const F: f64 = 1.0 / 298.257_223_563;
const E2: f64 = 2.0 * F - F * F;
const E_PRIME2: f64 = E2 / (1.0 - E2);
const K0: f64 = 0.9996;
const FALSE_EASTING: f64 = 500_000.0;
const FALSE_NORTHING_SOUTH: f64 = 10_000_000.0;

/// Latitude limit of the Web Mercator square
const MERCATOR_MAX_LAT: f64 = 85.051_128_779_806_59;

/// A resolved transform from one CRS to another.
///
/// Equivalent CRSs give the identity whatever their family; anything else
/// must be one of the supported families.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Projector {
    /// `None` for the identity
    kinds: Option<(CrsKind, CrsKind)>,
}

impl Projector {
    /// Resolve a transform between two CRSs.
    ///
    /// Fails with a reprojection error when the CRSs differ and either is
    /// outside the supported families.
    pub fn new(from: &CRS, to: &CRS) -> Result<Self> {
        if from.is_equivalent(to) {
            return Ok(Self { kinds: None });
        }
        let (from, to) = (resolve(from)?, resolve(to)?);
        Ok(Self {
            kinds: (from != to).then_some((from, to)),
        })
    }

    /// Whether the transform is the identity
    pub fn is_identity(&self) -> bool {
        self.kinds.is_none()
    }

    /// Transform one point. Returns NaN coordinates outside the domain.
    pub fn transform(&self, x: f64, y: f64) -> (f64, f64) {
        match self.kinds {
            None => (x, y),
            Some((from, to)) => {
                let (lon, lat) = to_wgs84(from, x, y);
                from_wgs84(to, lon, lat)
            }
        }
    }
}

fn resolve(crs: &CRS) -> Result<CrsKind> {
    crs.kind().ok_or_else(|| {
        Error::reprojection(
            Stage::Normalization,
            format!("unsupported or undefined CRS {}", crs),
        )
    })
}

fn to_wgs84(kind: CrsKind, x: f64, y: f64) -> (f64, f64) {
    match kind {
        CrsKind::Geographic => (x, y),
        CrsKind::WebMercator => mercator_to_wgs84(x, y),
        CrsKind::Utm { zone, north } => utm_to_wgs84(x, y, zone, north),
    }
}

fn from_wgs84(kind: CrsKind, lon: f64, lat: f64) -> (f64, f64) {
    if !lon.is_finite() || !lat.is_finite() {
        return (f64::NAN, f64::NAN);
    }
    match kind {
        CrsKind::Geographic => (lon, lat),
        CrsKind::WebMercator => wgs84_to_mercator(lon, lat),
        CrsKind::Utm { zone, north } => wgs84_to_utm(lon, lat, zone, north),
    }
}

// ── Web Mercator ─────────────────────────────────────────────────────────

fn wgs84_to_mercator(lon_deg: f64, lat_deg: f64) -> (f64, f64) {
    let lat = lat_deg.clamp(-MERCATOR_MAX_LAT, MERCATOR_MAX_LAT).to_radians();
    let x = A * lon_deg.to_radians();
    let y = A * (std::f64::consts::FRAC_PI_4 + lat / 2.0).tan().ln();
    (x, y)
}

fn mercator_to_wgs84(x: f64, y: f64) -> (f64, f64) {
    let lon = (x / A).to_degrees();
    let lat = (2.0 * (y / A).exp().atan() - std::f64::consts::FRAC_PI_2).to_degrees();
    (lon, lat)
}

// ── UTM (Snyder pp. 61-64) ───────────────────────────────────────────────

fn central_meridian(zone: u32) -> f64 {
    ((zone as f64 - 1.0) * 6.0 - 180.0 + 3.0).to_radians()
}

/// WGS84 (longitude, latitude) in degrees to UTM (easting, northing) in metres.
pub(crate) fn wgs84_to_utm(lon_deg: f64, lat_deg: f64, zone: u32, north: bool) -> (f64, f64) {
    let lat = lat_deg.to_radians();
    let lon = lon_deg.to_radians();
    let lon0 = central_meridian(zone);

    let sin_lat = lat.sin();
    let cos_lat = lat.cos();
    let tan_lat = lat.tan();

    let n = A / (1.0 - E2 * sin_lat * sin_lat).sqrt();
    let t = tan_lat * tan_lat;
    let c = E_PRIME2 * cos_lat * cos_lat;
    let a_coeff = cos_lat * (lon - lon0);
    let m = meridional_arc(lat);

    let a2 = a_coeff * a_coeff;
    let a4 = a2 * a2;
    let a6 = a4 * a2;

    // Snyder eq. 8-9
    let easting = K0
        * n
        * (a_coeff
            + (1.0 - t + c) * a2 * a_coeff / 6.0
            + (5.0 - 18.0 * t + t * t + 72.0 * c - 58.0 * E_PRIME2) * a4 * a_coeff / 120.0)
        + FALSE_EASTING;

    // Snyder eq. 8-10
    let northing = K0
        * (m + n
            * tan_lat
            * (a2 / 2.0
                + (5.0 - t + 9.0 * c + 4.0 * c * c) * a4 / 24.0
                + (61.0 - 58.0 * t + t * t + 600.0 * c - 330.0 * E_PRIME2) * a6 / 720.0));

    let northing = if north {
        northing
    } else {
        northing + FALSE_NORTHING_SOUTH
    };

    (easting, northing)
}

/// UTM (easting, northing) in metres to WGS84 (longitude, latitude) in degrees.
pub(crate) fn utm_to_wgs84(easting: f64, northing: f64, zone: u32, north: bool) -> (f64, f64) {
    let x = easting - FALSE_EASTING;
    let y = if north {
        northing
    } else {
        northing - FALSE_NORTHING_SOUTH
    };

    let e4 = E2 * E2;
    let e6 = e4 * E2;

    // Footpoint latitude (Snyder eq. 7-19, 3-26)
    let m = y / K0;
    let mu = m / (A * (1.0 - E2 / 4.0 - 3.0 * e4 / 64.0 - 5.0 * e6 / 256.0));
    let sqrt_1_e2 = (1.0 - E2).sqrt();
    let e1 = (1.0 - sqrt_1_e2) / (1.0 + sqrt_1_e2);
    let e1_2 = e1 * e1;
    let e1_3 = e1_2 * e1;
    let e1_4 = e1_3 * e1;

    let phi1 = mu
        + (3.0 * e1 / 2.0 - 27.0 * e1_3 / 32.0) * (2.0 * mu).sin()
        + (21.0 * e1_2 / 16.0 - 55.0 * e1_4 / 32.0) * (4.0 * mu).sin()
        + (151.0 * e1_3 / 96.0) * (6.0 * mu).sin()
        + (1097.0 * e1_4 / 512.0) * (8.0 * mu).sin();

    let sin_phi1 = phi1.sin();
    let cos_phi1 = phi1.cos();
    let tan_phi1 = phi1.tan();

    let c1 = E_PRIME2 * cos_phi1 * cos_phi1;
    let t1 = tan_phi1 * tan_phi1;
    let denom = 1.0 - E2 * sin_phi1 * sin_phi1;
    let n1 = A / denom.sqrt();
    let r1 = A * (1.0 - E2) / denom.powf(1.5);
    let d = x / (n1 * K0);

    let d2 = d * d;
    let d3 = d2 * d;
    let d4 = d3 * d;
    let d5 = d4 * d;
    let d6 = d5 * d;

    // Snyder eq. 8-17
    let lat = phi1
        - (n1 * tan_phi1 / r1)
            * (d2 / 2.0
                - (5.0 + 3.0 * t1 + 10.0 * c1 - 4.0 * c1 * c1 - 9.0 * E_PRIME2) * d4 / 24.0
                + (61.0 + 90.0 * t1 + 298.0 * c1 + 45.0 * t1 * t1 - 252.0 * E_PRIME2
                    - 3.0 * c1 * c1)
                    * d6
                    / 720.0);

    // Snyder eq. 8-18
    let lon = central_meridian(zone)
        + (d - (1.0 + 2.0 * t1 + c1) * d3 / 6.0
            + (5.0 - 2.0 * c1 + 28.0 * t1 - 3.0 * c1 * c1 + 8.0 * E_PRIME2 + 24.0 * t1 * t1)
                * d5
                / 120.0)
            / cos_phi1;

    (lon.to_degrees(), lat.to_degrees())
}

/// Meridional arc from equator to latitude `lat` (radians), Snyder eq. 3-21.
fn meridional_arc(lat: f64) -> f64 {
    let e4 = E2 * E2;
    let e6 = e4 * E2;

    A * ((1.0 - E2 / 4.0 - 3.0 * e4 / 64.0 - 5.0 * e6 / 256.0) * lat
        - (3.0 * E2 / 8.0 + 3.0 * e4 / 32.0 + 45.0 * e6 / 1024.0) * (2.0 * lat).sin()
        + (15.0 * e4 / 256.0 + 45.0 * e6 / 1024.0) * (4.0 * lat).sin()
        - (35.0 * e6 / 3072.0) * (6.0 * lat).sin())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(a: f64, b: f64, tol: f64, msg: &str) {
        let diff = (a - b).abs();
        assert!(diff < tol, "{msg}: expected {b}, got {a}, diff {diff} exceeds {tol}");
    }

    // Reference values from PROJ:
    //   Transformer.from_crs(4326, 32630, always_xy=True).transform(-3.7037, 40.4168)
    #[test]
    fn madrid_wgs84_to_utm30n() {
        let (e, n) = wgs84_to_utm(-3.7037, 40.4168, 30, true);
        assert_close(e, 440_298.94, 1.0, "easting");
        assert_close(n, 4_474_257.31, 1.0, "northing");
    }

    #[test]
    fn buenos_aires_wgs84_to_utm21s() {
        let (e, n) = wgs84_to_utm(-58.3816, -34.6037, 21, false);
        assert_close(e, 373_317.50, 1.0, "easting");
        assert_close(n, 6_170_036.17, 1.0, "northing");
    }

    #[test]
    fn utm_inverse_roundtrip() {
        for &(lon, lat, zone, north) in &[
            (-3.7037, 40.4168, 30, true),
            (-58.3816, -34.6037, 21, false),
            (15.2, 61.8, 33, true),
            (-62.0, -3.1, 20, false),
        ] {
            let (e, n) = wgs84_to_utm(lon, lat, zone, north);
            let (lon2, lat2) = utm_to_wgs84(e, n, zone, north);
            assert_close(lon2, lon, 1e-6, "longitude");
            assert_close(lat2, lat, 1e-6, "latitude");
        }
    }

    #[test]
    fn mercator_roundtrip() {
        let (x, y) = wgs84_to_mercator(10.0, 50.0);
        assert_close(x, 1_113_194.91, 0.01, "x");
        assert_close(y, 6_446_275.84, 0.01, "y");
        let (lon, lat) = mercator_to_wgs84(x, y);
        assert_close(lon, 10.0, 1e-9, "lon");
        assert_close(lat, 50.0, 1e-9, "lat");
    }

    #[test]
    fn projector_identity_and_errors() {
        let p = Projector::new(&CRS::utm(33, true), &CRS::utm(33, true)).unwrap();
        assert!(p.is_identity());
        assert_eq!(p.transform(1.0, 2.0), (1.0, 2.0));

        let err = Projector::new(&CRS::from_epsg(2154), &CRS::wgs84()).unwrap_err();
        assert!(matches!(err, Error::Reprojection { stage: Stage::Normalization, .. }));
        assert!(Projector::new(&CRS::wgs84(), &CRS::from_wkt("GEOGCS[...]")).is_err());
    }

    #[test]
    fn projector_same_unsupported_crs_is_identity() {
        let lambert = CRS::from_epsg(2154);
        let p = Projector::new(&lambert, &lambert).unwrap();
        assert!(p.is_identity());
        assert_eq!(p.transform(652_000.0, 6_862_000.0), (652_000.0, 6_862_000.0));

        let wkt = CRS::from_wkt("PROJCS[\"custom\"]");
        assert!(Projector::new(&wkt, &wkt.clone()).unwrap().is_identity());
    }

    #[test]
    fn projector_utm_zone_change() {
        let p = Projector::new(&CRS::utm(32, true), &CRS::utm(33, true)).unwrap();
        let (e32, n32) = wgs84_to_utm(12.0, 47.0, 32, true);
        let (e33, n33) = p.transform(e32, n32);
        let (e_ref, n_ref) = wgs84_to_utm(12.0, 47.0, 33, true);
        assert_close(e33, e_ref, 0.1, "easting");
        assert_close(n33, n_ref, 0.1, "northing");
    }
}
