//! Error types for forestcarb

use std::fmt;
use thiserror::Error;

/// Pipeline stage that raised an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Acquisition,
    Normalization,
    IndexCalculation,
    FeatureAssembly,
    Training,
    Prediction,
    CarbonConversion,
    Validation,
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Acquisition => "acquisition",
            Stage::Normalization => "normalization",
            Stage::IndexCalculation => "index calculation",
            Stage::FeatureAssembly => "feature assembly",
            Stage::Training => "training",
            Stage::Prediction => "prediction",
            Stage::CarbonConversion => "carbon conversion",
            Stage::Validation => "validation",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Main error type for forestcarb operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid raster dimensions: {width}x{height}")]
    InvalidDimensions { width: usize, height: usize },

    #[error("Index out of bounds: ({row}, {col}) in raster of size ({rows}, {cols})")]
    IndexOutOfBounds {
        row: usize,
        col: usize,
        rows: usize,
        cols: usize,
    },

    #[error("Raster size mismatch: expected ({er}, {ec}), got ({ar}, {ac})")]
    SizeMismatch { er: usize, ec: usize, ar: usize, ac: usize },

    #[error("[{stage}] raster geometry error: {reason}")]
    RasterGeometry { stage: Stage, reason: String },

    #[error("[{stage}] reprojection error: {reason}")]
    Reprojection { stage: Stage, reason: String },

    #[error("[{stage}] feature schema mismatch: {reason}")]
    SchemaMismatch { stage: Stage, reason: String },

    #[error("[{stage}] no usable training samples")]
    EmptyTrainingSet { stage: Stage },

    #[error("[{stage}] length mismatch: {left} vs {right}")]
    LengthMismatch {
        stage: Stage,
        left: usize,
        right: usize,
    },

    #[error("[{stage}] non-finite value: {reason}")]
    NonFinite { stage: Stage, reason: String },

    #[error("[acquisition] {source_name}: {reason}")]
    Acquisition { source_name: String, reason: String },

    #[error("Invalid model: {0}")]
    InvalidModel(String),

    #[error("Unsupported data type: {0}")]
    UnsupportedDataType(String),

    #[error("Invalid parameter: {name} = {value} ({reason})")]
    InvalidParameter {
        name: &'static str,
        value: String,
        reason: String,
    },

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn geometry(stage: Stage, reason: impl Into<String>) -> Self {
        Error::RasterGeometry {
            stage,
            reason: reason.into(),
        }
    }

    pub fn reprojection(stage: Stage, reason: impl Into<String>) -> Self {
        Error::Reprojection {
            stage,
            reason: reason.into(),
        }
    }

    pub fn schema(stage: Stage, reason: impl Into<String>) -> Self {
        Error::SchemaMismatch {
            stage,
            reason: reason.into(),
        }
    }

    pub fn acquisition(source_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Acquisition {
            source_name: source_name.into(),
            reason: reason.into(),
        }
    }

    /// The pipeline stage that raised this error, if it is a stage error.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Error::RasterGeometry { stage, .. }
            | Error::Reprojection { stage, .. }
            | Error::SchemaMismatch { stage, .. }
            | Error::EmptyTrainingSet { stage }
            | Error::LengthMismatch { stage, .. }
            | Error::NonFinite { stage, .. } => Some(*stage),
            Error::Acquisition { .. } => Some(Stage::Acquisition),
            _ => None,
        }
    }
}

/// Result type alias for forestcarb operations
pub type Result<T> = std::result::Result<T, Error>;
