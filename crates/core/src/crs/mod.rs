//! Coordinate Reference System handling

use serde::{Deserialize, Serialize};
use std::fmt;

/// Family of a CRS as far as reprojection is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrsKind {
    /// WGS84 longitude/latitude in degrees (EPSG:4326)
    Geographic,
    /// Spherical Web Mercator in metres (EPSG:3857)
    WebMercator,
    /// WGS84 / UTM zone in metres (EPSG:326xx, 327xx)
    Utm { zone: u32, north: bool },
}

/// Coordinate Reference System representation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CRS {
    /// WKT representation
    wkt: Option<String>,
    /// EPSG code if known
    epsg: Option<u32>,
    /// PROJ string if available
    proj: Option<String>,
}

impl CRS {
    /// Create a CRS from an EPSG code
    pub fn from_epsg(code: u32) -> Self {
        Self {
            wkt: None,
            epsg: Some(code),
            proj: None,
        }
    }

    /// Create a CRS from a WKT string
    pub fn from_wkt(wkt: impl Into<String>) -> Self {
        Self {
            wkt: Some(wkt.into()),
            epsg: None,
            proj: None,
        }
    }

    /// Create a CRS from a PROJ string
    pub fn from_proj(proj: impl Into<String>) -> Self {
        Self {
            wkt: None,
            epsg: None,
            proj: Some(proj.into()),
        }
    }

    /// Parse `EPSG:32633`, a bare code `4326`, a PROJ string (`+proj=...`)
    /// or WKT (`PROJCS[...]`, `GEOGCS[...]`, ...).
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        if s.starts_with("+proj=") {
            return Some(Self::from_proj(s));
        }
        if s.ends_with(']') && s.split_once('[').is_some_and(|(kw, _)| is_wkt_keyword(kw)) {
            return Some(Self::from_wkt(s));
        }
        let code = s
            .strip_prefix("EPSG:")
            .or_else(|| s.strip_prefix("epsg:"))
            .unwrap_or(s);
        code.parse::<u32>().ok().map(Self::from_epsg)
    }

    /// WGS84 geographic CRS (EPSG:4326)
    pub fn wgs84() -> Self {
        Self::from_epsg(4326)
    }

    /// Web Mercator (EPSG:3857)
    pub fn web_mercator() -> Self {
        Self::from_epsg(3857)
    }

    /// WGS84 / UTM zone
    pub fn utm(zone: u32, north: bool) -> Self {
        let base = if north { 32600 } else { 32700 };
        Self::from_epsg(base + zone)
    }

    pub fn epsg(&self) -> Option<u32> {
        self.epsg
    }

    pub fn wkt(&self) -> Option<&str> {
        self.wkt.as_deref()
    }

    pub fn proj(&self) -> Option<&str> {
        self.proj.as_deref()
    }

    /// Classify this CRS for reprojection.
    ///
    /// Only EPSG-coded CRSs of the supported families are recognized;
    /// WKT/PROJ-only definitions return `None`.
    pub fn kind(&self) -> Option<CrsKind> {
        match self.epsg? {
            4326 => Some(CrsKind::Geographic),
            3857 => Some(CrsKind::WebMercator),
            code @ 32601..=32660 => Some(CrsKind::Utm {
                zone: code - 32600,
                north: true,
            }),
            code @ 32701..=32760 => Some(CrsKind::Utm {
                zone: code - 32700,
                north: false,
            }),
            _ => None,
        }
    }

    /// Check if two CRS are equivalent
    pub fn is_equivalent(&self, other: &CRS) -> bool {
        if let (Some(a), Some(b)) = (self.epsg, other.epsg) {
            return a == b;
        }
        if let (Some(a), Some(b)) = (&self.wkt, &other.wkt) {
            return a == b;
        }
        if let (Some(a), Some(b)) = (&self.proj, &other.proj) {
            return a == b;
        }
        false
    }

    /// Get a string identifier for this CRS
    pub fn identifier(&self) -> String {
        if let Some(code) = self.epsg {
            return format!("EPSG:{}", code);
        }
        if let Some(proj) = &self.proj {
            return proj.clone();
        }
        if let Some(wkt) = &self.wkt {
            let end = wkt.char_indices().nth(50).map(|(i, _)| i).unwrap_or(wkt.len());
            return format!("WKT:{}", &wkt[..end]);
        }
        "Unknown".to_string()
    }
}

impl fmt::Display for CRS {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.identifier())
    }
}

fn is_wkt_keyword(kw: &str) -> bool {
    matches!(
        kw.trim(),
        "PROJCS" | "GEOGCS" | "GEOCCS" | "COMPD_CS" | "PROJCRS" | "GEOGCRS" | "GEODCRS" | "COMPOUNDCRS"
    )
}

impl Default for CRS {
    fn default() -> Self {
        Self::wgs84()
    }
}
