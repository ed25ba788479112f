use std::io;

use polars::prelude::PolarsError;
use thiserror::Error;

/// Failures produced by the prediction/retraining pipeline.
///
/// Validation and parse errors are caller-fixable and carry the offending
/// field names in their message; `Io` and `Train` indicate environment
/// problems. Nothing in this pipeline is retried.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// One or more required feature columns could not be resolved.
    #[error("missing required columns: {}", .0.join(", "))]
    Schema(Vec<String>),

    /// A single-record field was non-numeric or outside its allowed range.
    #[error("{field} must be a number between {min} and {max}, got {value}")]
    Range {
        field: String,
        value: String,
        min: f64,
        max: f64,
    },

    /// Transform was requested before any fit or load.
    #[error("scaler has not been fitted; train or load a model first")]
    NotFitted,

    /// The uploaded tabular data could not be parsed.
    #[error("invalid tabular upload: {0}")]
    Parse(String),

    /// Persisted model state could not be read or written.
    #[error("model storage error: {0}")]
    Io(#[from] io::Error),

    /// Model fitting failed.
    #[error("training failed: {0}")]
    Train(String),

    /// A retraining job is already running.
    #[error("a retraining job is already in progress")]
    RetrainInFlight,
}

impl From<PolarsError> for PipelineError {
    fn from(e: PolarsError) -> Self {
        PipelineError::Parse(e.to_string())
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(e: serde_json::Error) -> Self {
        PipelineError::Io(io::Error::new(io::ErrorKind::InvalidData, e))
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
