//! Field plot measurements
//!
//! A CSV with one row per plot: a measured biomass column plus any number
//! of numeric feature columns (band reflectances, canopy height, ...).

use crate::imagery::{compute_indices, BandMapping, SpectralSample, EVI, NDVI};
use forestcarb_core::{Error, FeatureSample, Result, Stage};
use std::io::Read;
use tracing::{debug, info};

const SOURCE: &str = "plot table";

/// Plot features with their measured biomass density
#[derive(Debug, Clone, PartialEq)]
pub struct PlotTable {
    features: Vec<FeatureSample>,
    targets: Vec<Option<f64>>,
    target_column: String,
}

impl PlotTable {
    /// Build from parallel feature and target sequences.
    pub fn new(
        features: Vec<FeatureSample>,
        targets: Vec<Option<f64>>,
        target_column: impl Into<String>,
    ) -> Result<Self> {
        if features.len() != targets.len() {
            return Err(Error::LengthMismatch {
                stage: Stage::FeatureAssembly,
                left: features.len(),
                right: targets.len(),
            });
        }
        Ok(Self {
            features,
            targets,
            target_column: target_column.into(),
        })
    }

    /// Read a CSV with a header row.
    ///
    /// Every column other than `target_column` becomes a feature. Empty
    /// cells and `NA`/`NaN` are missing values.
    pub fn from_csv<R: Read>(reader: R, target_column: &str) -> Result<Self> {
        let mut csv = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
        let headers: Vec<String> = csv
            .headers()
            .map_err(|e| Error::acquisition(SOURCE, format!("reading header: {}", e)))?
            .iter()
            .map(str::to_string)
            .collect();

        let target_idx = headers
            .iter()
            .position(|h| h == target_column)
            .ok_or_else(|| {
                Error::schema(
                    Stage::FeatureAssembly,
                    format!(
                        "target column '{}' not in [{}]",
                        target_column,
                        headers.join(", ")
                    ),
                )
            })?;

        let mut features = Vec::new();
        let mut targets = Vec::new();
        for (row_no, record) in csv.records().enumerate() {
            let record =
                record.map_err(|e| Error::acquisition(SOURCE, format!("row {}: {}", row_no, e)))?;
            let mut sample = FeatureSample::new();
            for (col, (name, cell)) in headers.iter().zip(record.iter()).enumerate() {
                let value = parse_cell(cell).map_err(|_| {
                    Error::acquisition(
                        SOURCE,
                        format!("row {}, column '{}': '{}' is not a number", row_no, name, cell),
                    )
                })?;
                if col == target_idx {
                    targets.push(value);
                } else {
                    sample.insert(name.as_str(), value);
                }
            }
            features.push(sample);
        }

        info!(plots = features.len(), columns = headers.len(), "read plot table");
        Self::new(features, targets, target_column)
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn features(&self) -> &[FeatureSample] {
        &self.features
    }

    /// Measured biomass per plot; `None` where not recorded
    pub fn targets(&self) -> &[Option<f64>] {
        &self.targets
    }

    pub fn target_column(&self) -> &str {
        &self.target_column
    }

    /// Plots with a finite measured biomass, as (features, targets)
    pub fn labelled(&self) -> (Vec<FeatureSample>, Vec<f64>) {
        self.features
            .iter()
            .zip(&self.targets)
            .filter_map(|(f, t)| t.filter(|v| v.is_finite()).map(|t| (f.clone(), t)))
            .unzip()
    }

    /// Replace the NIR, Red and Blue columns with NDVI and EVI.
    ///
    /// Plots where an index is undefined get a missing value.
    pub fn with_vegetation_indices(&self, mapping: &BandMapping) -> Result<Self> {
        let mut features = Vec::with_capacity(self.features.len());
        for (i, sample) in self.features.iter().enumerate() {
            let mut sample = sample.clone();
            let mut bands = [0.0; 3];
            for (slot, name) in bands.iter_mut().zip(mapping.names()) {
                let value = sample.remove(name).ok_or_else(|| {
                    Error::schema(
                        Stage::IndexCalculation,
                        format!("plot {} has no '{}' column", i, name),
                    )
                })?;
                *slot = value.unwrap_or(f64::NAN);
            }
            let [nir, red, blue] = bands;
            let idx = compute_indices(SpectralSample { nir, red, blue });
            sample.insert(NDVI, idx.ndvi);
            sample.insert(EVI, idx.evi);
            features.push(sample);
        }
        debug!(plots = features.len(), "derived plot vegetation indices");
        Ok(Self {
            features,
            targets: self.targets.clone(),
            target_column: self.target_column.clone(),
        })
    }
}

fn parse_cell(cell: &str) -> std::result::Result<Option<f64>, std::num::ParseFloatError> {
    match cell {
        "" | "NA" | "na" | "NaN" | "nan" => Ok(None),
        s => s.parse::<f64>().map(Some),
    }
}
