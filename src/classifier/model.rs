//! Pluggable scoring-model classifier
//!
//! The classifier only depends on a [`SleepScorer`] capability: anything that
//! maps a feature vector to a sleep probability. Closures qualify through a
//! blanket implementation; [`LogisticScorer`] is a linear model that can be
//! described in the configuration file.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::SleepClassifier;
use crate::config::DEFAULT_SCORE_THRESHOLD;
use crate::error::SleepError;
use crate::types::{FeatureMatrix, FeatureVector, Prediction, PredictionSeries};

/// Maps one feature vector to a sleep score in [0, 1]
pub trait SleepScorer {
    fn score(&self, features: &FeatureVector) -> f64;
}

impl<F> SleepScorer for F
where
    F: Fn(&FeatureVector) -> f64,
{
    fn score(&self, features: &FeatureVector) -> f64 {
        self(features)
    }
}

/// Logistic regression over named features
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticScorer {
    pub weights: BTreeMap<String, f64>,
    #[serde(default)]
    pub bias: f64,
}

impl LogisticScorer {
    /// Check that every weighted feature exists in the run
    pub fn check_features(&self, names: &[String]) -> Result<(), SleepError> {
        let unknown: Vec<&str> = self
            .weights
            .keys()
            .filter(|name| !names.contains(*name))
            .map(String::as_str)
            .collect();
        if unknown.is_empty() {
            Ok(())
        } else {
            Err(SleepError::Config(format!(
                "logistic weights on unknown feature(s): {}",
                unknown.join(", ")
            )))
        }
    }
}

impl SleepScorer for LogisticScorer {
    fn score(&self, features: &FeatureVector) -> f64 {
        let z = self
            .weights
            .iter()
            .fold(self.bias, |acc, (name, weight)| {
                acc + weight * features.get(name).unwrap_or(f64::NAN)
            });
        1.0 / (1.0 + (-z).exp())
    }
}

/// Labels each window by thresholding an injected score
pub struct ModelClassifier<'a> {
    scorer: Option<&'a dyn SleepScorer>,
    threshold: f64,
}

impl<'a> ModelClassifier<'a> {
    pub fn new(scorer: Option<&'a dyn SleepScorer>) -> Self {
        Self {
            scorer,
            threshold: DEFAULT_SCORE_THRESHOLD,
        }
    }

    /// Score at or above which a window is labelled sleep
    pub fn with_threshold(mut self, threshold: f64) -> Result<Self, SleepError> {
        if !(0.0..=1.0).contains(&threshold) {
            return Err(SleepError::Config(format!(
                "score threshold must be in [0,1], got {threshold}"
            )));
        }
        self.threshold = threshold;
        Ok(self)
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }
}

impl SleepClassifier for ModelClassifier<'_> {
    fn classify(&self, features: &FeatureMatrix) -> Result<PredictionSeries, SleepError> {
        let scorer = self.scorer.ok_or_else(|| {
            SleepError::ModelUnavailable(
                "model classifier selected but no scoring function was supplied".to_string(),
            )
        })?;

        let predictions = features
            .rows()
            .iter()
            .map(|row| {
                let score = scorer.score(row);
                if !(score.is_finite() && (0.0..=1.0).contains(&score)) {
                    return Err(SleepError::InvalidScore(format!(
                        "score {score} for window at {} is outside [0, 1]",
                        row.center.to_rfc3339()
                    )));
                }
                Ok(Prediction {
                    timestamp: row.center,
                    asleep: score >= self.threshold,
                    score: Some(score),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(PredictionSeries::new(predictions))
    }
}
