//! Imagery suppliers
//!
//! A supplier is an explicit handle with an open/close lifecycle that is
//! passed to whatever workflow needs imagery.

use crate::reproject::Projector;
use forestcarb_core::io::read_band;
use forestcarb_core::{Error, GeoTransform, MultiBandRaster, Result, CRS};
use ndarray::s;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// A WGS84 bounding box in degrees
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl BBox {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    /// Parse `min_x,min_y,max_x,max_y`
    pub fn parse(s: &str) -> Option<Self> {
        let v: Vec<f64> = s
            .split(',')
            .map(|p| p.trim().parse().ok())
            .collect::<Option<_>>()?;
        match v.as_slice() {
            [a, b, c, d] => Some(Self::new(*a, *b, *c, *d)),
            _ => None,
        }
    }

    /// Ordered and within longitude/latitude limits
    pub fn is_valid(&self) -> bool {
        self.min_x < self.max_x
            && self.min_y < self.max_y
            && self.min_x >= -180.0
            && self.max_x <= 180.0
            && self.min_y >= -90.0
            && self.max_y <= 90.0
    }
}

/// What to acquire: where, when and which bands
#[derive(Debug, Clone, PartialEq)]
pub struct AcquisitionRequest {
    pub bbox: BBox,
    /// STAC-style range `start/end`; either side may be `..` for open
    pub datetime: String,
    pub bands: Vec<String>,
}

impl AcquisitionRequest {
    pub fn new(bbox: BBox, datetime: impl Into<String>, bands: Vec<String>) -> Self {
        Self {
            bbox,
            datetime: datetime.into(),
            bands,
        }
    }

    /// Date range bounds; `None` for an open side
    pub fn date_range(&self) -> Option<(Option<&str>, Option<&str>)> {
        fn side(s: &str) -> Option<&str> {
            match s.trim() {
                "" | ".." => None,
                d => Some(d),
            }
        }
        let (start, end) = self.datetime.split_once('/')?;
        Some((side(start), side(end)))
    }

    /// Whether an ISO 8601 date falls within the requested range
    pub fn covers_date(&self, date: &str) -> bool {
        match self.date_range() {
            // An end date without a time covers that whole day
            Some((start, end)) => {
                start.map_or(true, |s| date >= s)
                    && end.map_or(true, |e| date.get(..e.len()).unwrap_or(date) <= e)
            }
            None => false,
        }
    }

    fn validate(&self, source: &str) -> Result<()> {
        if !self.bbox.is_valid() {
            return Err(Error::acquisition(
                source,
                format!("invalid bounding box {:?}", self.bbox),
            ));
        }
        match self.date_range() {
            Some((Some(s), Some(e))) if s > e => {
                return Err(Error::acquisition(
                    source,
                    format!("date range '{}' ends before it starts", self.datetime),
                ))
            }
            None => {
                return Err(Error::acquisition(
                    source,
                    format!("datetime '{}' is not a start/end range", self.datetime),
                ))
            }
            _ => {}
        }
        if self.bands.is_empty() {
            return Err(Error::acquisition(source, "no bands requested"));
        }
        Ok(())
    }
}

/// A source of multispectral imagery
pub trait ImagerySupplier {
    /// Name used in error messages and logs
    fn name(&self) -> &str;

    fn open(&mut self) -> Result<()>;

    fn is_open(&self) -> bool;

    /// Imagery covering the request, one band per requested name.
    ///
    /// Fails with an acquisition error if the supplier is closed or has no
    /// data for the region or date range.
    fn fetch(&self, request: &AcquisitionRequest) -> Result<MultiBandRaster>;

    fn close(&mut self) -> Result<()>;
}

/// Reads `<dir>/<band>.tif`, one single-band GeoTIFF per band.
#[derive(Debug, Clone)]
pub struct GeoTiffDirectorySupplier {
    dir: PathBuf,
    acquired: Option<String>,
    open: bool,
}

impl GeoTiffDirectorySupplier {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            acquired: None,
            open: false,
        }
    }

    /// Record the acquisition date so requests outside it fail
    pub fn with_acquisition_date(mut self, date: impl Into<String>) -> Self {
        self.acquired = Some(date.into());
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn band_path(&self, band: &str) -> PathBuf {
        self.dir.join(format!("{}.tif", band))
    }
}

impl ImagerySupplier for GeoTiffDirectorySupplier {
    fn name(&self) -> &str {
        "geotiff-directory"
    }

    fn open(&mut self) -> Result<()> {
        if !self.dir.is_dir() {
            return Err(Error::acquisition(
                self.name(),
                format!("{} is not a directory", self.dir.display()),
            ));
        }
        self.open = true;
        debug!(dir = %self.dir.display(), "opened imagery supplier");
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn fetch(&self, request: &AcquisitionRequest) -> Result<MultiBandRaster> {
        if !self.open {
            return Err(Error::acquisition(self.name(), "supplier is closed"));
        }
        request.validate(self.name())?;

        if let Some(date) = &self.acquired {
            if !request.covers_date(date) {
                return Err(Error::acquisition(
                    self.name(),
                    format!("no imagery in {} (acquired {})", request.datetime, date),
                ));
            }
        }

        let mut bands = Vec::with_capacity(request.bands.len());
        for band in &request.bands {
            let path = self.band_path(band);
            if !path.is_file() {
                return Err(Error::acquisition(
                    self.name(),
                    format!("band file {} not found", path.display()),
                ));
            }
            let raster = read_band(&path).map_err(|e| {
                Error::acquisition(self.name(), format!("{}: {}", path.display(), e))
            })?;
            bands.push((band.clone(), raster));
        }
        let stack = MultiBandRaster::from_bands(bands)
            .map_err(|e| Error::acquisition(self.name(), e.to_string()))?;

        let cropped = crop_to_bbox(&stack, &request.bbox)
            .map_err(|e| Error::acquisition(self.name(), e.to_string()))?
            .ok_or_else(|| {
                Error::acquisition(
                    self.name(),
                    format!("bbox {:?} does not intersect the imagery", request.bbox),
                )
            })?;

        info!(
            bands = cropped.band_count(),
            rows = cropped.rows(),
            cols = cropped.cols(),
            "acquired imagery"
        );
        Ok(cropped)
    }

    fn close(&mut self) -> Result<()> {
        self.open = false;
        Ok(())
    }
}

/// Pixel window of `raster` covering a WGS84 bbox; `None` if disjoint.
fn crop_to_bbox(raster: &MultiBandRaster, bbox: &BBox) -> Result<Option<MultiBandRaster>> {
    let crs = raster
        .crs()
        .ok_or_else(|| Error::Other("imagery has no CRS".into()))?;
    let to_native = Projector::new(&CRS::wgs84(), crs)?;
    let transform = raster.transform();

    // Densified bbox outline in pixel space
    const STEPS: usize = 8;
    let mut min_col = f64::INFINITY;
    let mut min_row = f64::INFINITY;
    let mut max_col = f64::NEG_INFINITY;
    let mut max_row = f64::NEG_INFINITY;
    for i in 0..=STEPS {
        let t = i as f64 / STEPS as f64;
        let lon = bbox.min_x + t * (bbox.max_x - bbox.min_x);
        let lat = bbox.min_y + t * (bbox.max_y - bbox.min_y);
        for (x, y) in [(lon, bbox.min_y), (lon, bbox.max_y), (bbox.min_x, lat), (bbox.max_x, lat)] {
            let (nx, ny) = to_native.transform(x, y);
            let (col, row) = transform.geo_to_pixel(nx, ny);
            if col.is_finite() && row.is_finite() {
                min_col = min_col.min(col);
                min_row = min_row.min(row);
                max_col = max_col.max(col);
                max_row = max_row.max(row);
            }
        }
    }

    let (rows, cols) = raster.shape();
    let c0 = min_col.floor().max(0.0);
    let r0 = min_row.floor().max(0.0);
    let c1 = max_col.ceil().min(cols as f64);
    let r1 = max_row.ceil().min(rows as f64);
    if !(c0 < c1 && r0 < r1) {
        return Ok(None);
    }
    let (c0, r0, c1, r1) = (c0 as usize, r0 as usize, c1 as usize, r1 as usize);

    let data = raster.data().slice(s![.., r0..r1, c0..c1]).to_owned();
    let mut gt = transform.to_gdal();
    let (ox, oy) = transform.apply(c0 as f64, r0 as f64);
    gt[0] = ox;
    gt[3] = oy;

    debug!(c0, r0, c1, r1, "cropped imagery to bbox");
    MultiBandRaster::new(
        raster.band_names().to_vec(),
        data,
        GeoTransform::from_gdal(gt),
        Some(crs.clone()),
    )
    .map(Some)
}
