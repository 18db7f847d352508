//! Sleep Flux - Deterministic sleep detection from phone sensor time series
//!
//! Sleep Flux turns raw sensor packets into sleep periods through a strictly forward
//! pipeline: loading → unpacking → preprocessing → windowing → feature
//! extraction → classification → period aggregation → metrics.
//!
//! ## Modules
//!
//! - **Stages**: `loader`, `unpack`, `preprocess`, `window`, `features`,
//!   `classifier`, `aggregate`, `metrics`
//! - **Orchestration**: `pipeline` sequences the stages, `report` writes results
//! - **Foreign interface**: `ffi` exposes the in-memory pipeline over a C ABI

pub mod aggregate;
pub mod classifier;
pub mod config;
pub mod error;
pub mod features;
pub mod loader;
pub mod metrics;
pub mod pipeline;
pub mod preprocess;
pub mod report;
pub mod types;
pub mod unpack;
pub mod window;

// FFI bindings for C interop (always available for cdylib/staticlib builds)
pub mod ffi;

pub use classifier::{
    HeuristicClassifier, LogisticScorer, ModelClassifier, SleepClassifier, SleepScorer,
};
pub use config::PipelineConfig;
pub use error::{SleepError, Stage, StageFailure};
pub use loader::{load_path, InputFormat};
pub use pipeline::{run_pipeline, PipelineOutput, SleepPipeline};
pub use types::{
    FeatureMatrix, FeatureVector, PredictionSeries, SensorKind, SensorPacket, SleepMetrics,
    SleepPeriod,
};

/// Library version embedded in every report
pub const SLEEP_FLUX_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name for reports
pub const PRODUCER_NAME: &str = "sleep-flux";
