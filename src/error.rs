//! Error types for Sleep Flux

use std::fmt;
use thiserror::Error;

/// Errors raised by a single pipeline stage
#[derive(Debug, Error)]
pub enum SleepError {
    #[error("Malformed input: {0}")]
    Format(String),

    #[error("Missing or invalid field: {0}")]
    Schema(String),

    #[error("Timestamps out of order: {0}")]
    TimeOrder(String),

    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Feature computation failed: {0}")]
    FeatureComputation(String),

    #[error("Model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("Invalid model score: {0}")]
    InvalidScore(String),

    #[error("Nothing to summarize: {0}")]
    EmptyInput(String),

    #[error("Export failed: {0}")]
    Export(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl SleepError {
    /// Stable machine-readable error code
    pub fn code(&self) -> &'static str {
        match self {
            SleepError::Format(_) => "FORMAT_ERROR",
            SleepError::Schema(_) => "SCHEMA_ERROR",
            SleepError::TimeOrder(_) => "TIME_ORDER_ERROR",
            SleepError::InsufficientData(_) => "INSUFFICIENT_DATA",
            SleepError::Config(_) => "CONFIG_ERROR",
            SleepError::FeatureComputation(_) => "FEATURE_ERROR",
            SleepError::ModelUnavailable(_) => "MODEL_UNAVAILABLE",
            SleepError::InvalidScore(_) => "INVALID_SCORE",
            SleepError::EmptyInput(_) => "EMPTY_INPUT",
            SleepError::Export(_) => "EXPORT_ERROR",
            SleepError::Io(_) => "IO_ERROR",
            SleepError::Json(_) => "JSON_ERROR",
        }
    }
}

/// Pipeline stage, used to report where a run aborted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Configure,
    Load,
    Unpack,
    Preprocess,
    Slice,
    Extract,
    Classify,
    Aggregate,
    Metrics,
    Export,
    Visualize,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Configure => "configure",
            Stage::Load => "load",
            Stage::Unpack => "unpack",
            Stage::Preprocess => "preprocess",
            Stage::Slice => "slice",
            Stage::Extract => "extract",
            Stage::Classify => "classify",
            Stage::Aggregate => "aggregate",
            Stage::Metrics => "metrics",
            Stage::Export => "export",
            Stage::Visualize => "visualize",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stage error as surfaced by the orchestrator
#[derive(Debug, Error)]
#[error("{stage} stage failed: {source}")]
pub struct StageFailure {
    pub stage: Stage,
    #[source]
    pub source: SleepError,
}

impl StageFailure {
    pub fn new(stage: Stage, source: SleepError) -> Self {
        Self { stage, source }
    }
}

/// Attach a stage to a stage-level result
pub(crate) trait StageContext<T> {
    fn stage(self, stage: Stage) -> Result<T, StageFailure>;
}

impl<T> StageContext<T> for Result<T, SleepError> {
    fn stage(self, stage: Stage) -> Result<T, StageFailure> {
        self.map_err(|source| StageFailure::new(stage, source))
    }
}
