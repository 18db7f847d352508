//! Threshold classifier with hysteresis

use std::collections::BTreeMap;

use super::SleepClassifier;
use crate::config::{ClassifierConfig, DEFAULT_ACTIVITY_THRESHOLD, DEFAULT_HYSTERESIS};
use crate::error::SleepError;
use crate::features::ACTIVITY_INDEX;
use crate::types::{FeatureMatrix, FeatureVector, PredictionSeries};

/// Labels a window as a sleep candidate when every thresholded feature is
/// strictly below its cutoff, then smooths the candidates with hysteresis.
#[derive(Debug, Clone, PartialEq)]
pub struct HeuristicClassifier {
    thresholds: BTreeMap<String, f64>,
    hysteresis: usize,
}

impl Default for HeuristicClassifier {
    fn default() -> Self {
        let mut thresholds = BTreeMap::new();
        thresholds.insert(ACTIVITY_INDEX.to_string(), DEFAULT_ACTIVITY_THRESHOLD);
        Self {
            thresholds,
            hysteresis: DEFAULT_HYSTERESIS,
        }
    }
}

impl HeuristicClassifier {
    pub fn new(thresholds: BTreeMap<String, f64>, hysteresis: usize) -> Result<Self, SleepError> {
        if thresholds.is_empty() {
            return Err(SleepError::Config(
                "heuristic classifier needs at least one threshold".to_string(),
            ));
        }
        if let Some((name, value)) = thresholds.iter().find(|(_, v)| !v.is_finite()) {
            return Err(SleepError::Config(format!(
                "threshold {name} must be finite, got {value}"
            )));
        }
        if hysteresis == 0 {
            return Err(SleepError::Config("hysteresis must be >= 1".to_string()));
        }
        Ok(Self {
            thresholds,
            hysteresis,
        })
    }

    pub fn from_config(config: &ClassifierConfig) -> Result<Self, SleepError> {
        Self::new(config.thresholds.clone(), config.hysteresis)
    }

    pub fn thresholds(&self) -> &BTreeMap<String, f64> {
        &self.thresholds
    }

    pub fn hysteresis(&self) -> usize {
        self.hysteresis
    }

    fn is_candidate(&self, row: &FeatureVector) -> bool {
        self.thresholds
            .iter()
            .all(|(name, cutoff)| row.get(name).is_some_and(|v| v < *cutoff))
    }
}

impl SleepClassifier for HeuristicClassifier {
    fn classify(&self, features: &FeatureMatrix) -> Result<PredictionSeries, SleepError> {
        let unknown: Vec<&str> = self
            .thresholds
            .keys()
            .filter(|name| !features.has_feature(name))
            .map(String::as_str)
            .collect();
        if !unknown.is_empty() && !features.names().is_empty() {
            return Err(SleepError::Config(format!(
                "threshold(s) on unknown feature(s): {}",
                unknown.join(", ")
            )));
        }

        let candidates: Vec<bool> = features.rows().iter().map(|r| self.is_candidate(r)).collect();
        let labels = apply_hysteresis(&candidates, self.hysteresis);
        log::debug!(
            "{} of {} windows below thresholds, {} labelled sleep",
            candidates.iter().filter(|c| **c).count(),
            candidates.len(),
            labels.iter().filter(|l| **l).count()
        );

        Ok(PredictionSeries::from_labels(
            features.rows().iter().map(|r| r.center).zip(labels),
        ))
    }
}

/// Smooth candidate labels with symmetric hysteresis.
///
/// Starting awake, the label only changes after `hysteresis` consecutive
/// windows disagree with it; those windows take the new label. Shorter runs,
/// including a trailing one, keep the current label.
pub fn apply_hysteresis(candidates: &[bool], hysteresis: usize) -> Vec<bool> {
    let hysteresis = hysteresis.max(1);
    let mut labels = Vec::with_capacity(candidates.len());
    let mut state = false;

    let mut run_start = 0;
    while run_start < candidates.len() {
        let value = candidates[run_start];
        let run_len = candidates[run_start..]
            .iter()
            .take_while(|c| **c == value)
            .count();
        if value != state && run_len >= hysteresis {
            state = value;
        }
        labels.extend(std::iter::repeat(state).take(run_len));
        run_start += run_len;
    }
    labels
}
