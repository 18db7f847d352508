//! Pipeline configuration
//!
//! Every tunable of a run lives in one [`PipelineConfig`] value that is passed
//! explicitly through the orchestrator. It can be read from a JSON file; every
//! field falls back to its default when omitted.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::classifier::LogisticScorer;
use crate::error::SleepError;
use crate::loader::InputFormat;
use crate::types::SensorKind;

/// Default window length (seconds)
pub const DEFAULT_WINDOW_S: f64 = 10.0;

/// Default step between window starts (seconds)
pub const DEFAULT_STEP_S: f64 = 5.0;

/// Default resampling / windowing rate (Hz)
pub const DEFAULT_FS: u32 = 50;

/// Default cutoff on the activity index below which a window looks like sleep
pub const DEFAULT_ACTIVITY_THRESHOLD: f64 = 0.1;

/// Default number of consecutive windows required to change label
pub const DEFAULT_HYSTERESIS: usize = 3;

/// Default probability cutoff for the model classifier
pub const DEFAULT_SCORE_THRESHOLD: f64 = 0.5;

/// Default minimum sleep period duration (seconds)
pub const DEFAULT_MIN_DURATION_S: f64 = 60.0;

/// Sliding window geometry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub window_s: f64,
    pub step_s: f64,
    /// Sampling rate used for resampling and for seconds→samples conversion
    pub fs: u32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            window_s: DEFAULT_WINDOW_S,
            step_s: DEFAULT_STEP_S,
            fs: DEFAULT_FS,
        }
    }
}

/// Per-channel normalization applied after resampling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Normalization {
    #[default]
    None,
    /// Subtract the channel mean
    Center,
    /// Subtract the mean and divide by the standard deviation
    Standardize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessConfig {
    /// Sensor kinds kept for feature extraction
    pub sensors: Vec<SensorKind>,
    /// First-order low-pass cutoff (Hz); no smoothing when absent
    pub lowpass_cutoff_hz: Option<f64>,
    pub normalization: Normalization,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            sensors: vec![SensorKind::Accelerometer, SensorKind::Gyroscope],
            lowpass_cutoff_hz: None,
            normalization: Normalization::None,
        }
    }
}

/// Which classifier labels the windows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassifierKind {
    #[default]
    Heuristic,
    Model,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    pub kind: ClassifierKind,
    /// Feature name → cutoff; a window is a sleep candidate when every listed
    /// feature is below its cutoff
    pub thresholds: BTreeMap<String, f64>,
    /// Consecutive windows needed before a label change is accepted
    pub hysteresis: usize,
    /// Score at or above which the model classifier labels sleep
    pub score_threshold: f64,
    /// Linear scoring model usable by the model classifier
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logistic: Option<LogisticScorer>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        let mut thresholds = BTreeMap::new();
        thresholds.insert("activity_index".to_string(), DEFAULT_ACTIVITY_THRESHOLD);

        Self {
            kind: ClassifierKind::Heuristic,
            thresholds,
            hysteresis: DEFAULT_HYSTERESIS,
            score_threshold: DEFAULT_SCORE_THRESHOLD,
            logistic: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregationConfig {
    /// Candidate periods shorter than this are discarded (seconds)
    pub min_duration_s: f64,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            min_duration_s: DEFAULT_MIN_DURATION_S,
        }
    }
}

/// Complete configuration of one pipeline run
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub window: WindowConfig,
    pub preprocess: PreprocessConfig,
    pub classifier: ClassifierConfig,
    pub aggregation: AggregationConfig,
    /// Force an input format instead of detecting it from the extension
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_format: Option<InputFormat>,
}

impl PipelineConfig {
    /// Parse a configuration from JSON and validate it
    pub fn from_json(json: &str) -> Result<Self, SleepError> {
        let config: PipelineConfig = serde_json::from_str(json)
            .map_err(|e| SleepError::Config(format!("cannot parse configuration: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Read a configuration file
    pub fn from_json_file(path: &Path) -> Result<Self, SleepError> {
        let json = fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn to_json_pretty(&self) -> Result<String, SleepError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Check every numeric bound
    pub fn validate(&self) -> Result<(), SleepError> {
        let window = &self.window;
        if !(window.window_s.is_finite() && window.window_s > 0.0) {
            return Err(SleepError::Config(format!(
                "window_s must be a positive number, got {}",
                window.window_s
            )));
        }
        if !(window.step_s.is_finite() && window.step_s > 0.0) {
            return Err(SleepError::Config(format!(
                "step_s must be a positive number, got {}",
                window.step_s
            )));
        }
        if window.fs == 0 {
            return Err(SleepError::Config("fs must be > 0 Hz".to_string()));
        }

        let preprocess = &self.preprocess;
        if preprocess.sensors.is_empty() {
            return Err(SleepError::Config(
                "at least one sensor kind must be retained".to_string(),
            ));
        }
        if let Some(cutoff) = preprocess.lowpass_cutoff_hz {
            let nyquist = window.fs as f64 / 2.0;
            if !(cutoff.is_finite() && cutoff > 0.0 && cutoff < nyquist) {
                return Err(SleepError::Config(format!(
                    "lowpass_cutoff_hz must be in (0, {nyquist}), got {cutoff}"
                )));
            }
        }

        let classifier = &self.classifier;
        if classifier.hysteresis == 0 {
            return Err(SleepError::Config("hysteresis must be >= 1".to_string()));
        }
        if classifier.kind == ClassifierKind::Heuristic && classifier.thresholds.is_empty() {
            return Err(SleepError::Config(
                "heuristic classifier needs at least one threshold".to_string(),
            ));
        }
        if let Some((name, value)) = classifier.thresholds.iter().find(|(_, v)| !v.is_finite()) {
            return Err(SleepError::Config(format!(
                "threshold {name} must be finite, got {value}"
            )));
        }
        if !(0.0..=1.0).contains(&classifier.score_threshold) {
            return Err(SleepError::Config(format!(
                "score_threshold must be in [0,1], got {}",
                classifier.score_threshold
            )));
        }

        let min_duration_s = self.aggregation.min_duration_s;
        if !(min_duration_s.is_finite() && min_duration_s >= 0.0) {
            return Err(SleepError::Config(format!(
                "min_duration_s must be >= 0, got {min_duration_s}"
            )));
        }

        Ok(())
    }
}
