//! Window classifiers
//!
//! This module provides the strategies that label each feature row as sleep or
//! wake: a threshold heuristic with hysteresis and a pluggable scoring model.

mod heuristic;
mod model;

pub use heuristic::{apply_hysteresis, HeuristicClassifier};
pub use model::{LogisticScorer, ModelClassifier, SleepScorer};

use crate::error::SleepError;
use crate::types::{FeatureMatrix, PredictionSeries};

/// Trait for sleep/wake classifiers
pub trait SleepClassifier {
    /// Label every row of the matrix, one prediction per row in row order
    fn classify(&self, features: &FeatureMatrix) -> Result<PredictionSeries, SleepError>;
}
