//! Window feature extraction
//!
//! Each window is reduced to a fixed set of named statistics:
//! - Global magnitude statistics of the primary motion sensor
//!   (`magnitude_rms`, `magnitude_std`, `magnitude_mean`, `activity_index`)
//! - The same statistics plus a zero-crossing rate per sensor kind
//!   (`acc_rms`, `gyro_activity_index`, ...)
//!
//! The name set is fixed when the extractor is built, so every row of a run
//! carries exactly the same keys.

use std::collections::BTreeMap;

use crate::error::SleepError;
use crate::types::{Channel, FeatureMatrix, FeatureVector, SensorKind};
use crate::window::{Window, WindowSlicer};

pub const MAGNITUDE_RMS: &str = "magnitude_rms";
pub const MAGNITUDE_STD: &str = "magnitude_std";
pub const MAGNITUDE_MEAN: &str = "magnitude_mean";
pub const ACTIVITY_INDEX: &str = "activity_index";

/// Global feature names, computed on the primary motion sensor
pub const GLOBAL_FEATURES: [&str; 4] = [MAGNITUDE_RMS, MAGNITUDE_STD, MAGNITUDE_MEAN, ACTIVITY_INDEX];

/// Per-sensor feature suffixes
const SENSOR_FEATURES: [&str; 5] = ["rms", "std", "mean", "activity_index", "zero_crossing_rate"];

#[derive(Debug, Clone)]
struct SensorGroup {
    kind: SensorKind,
    channels: Vec<Channel>,
}

/// Extractor bound to the channel layout of one run
#[derive(Debug, Clone)]
pub struct FeatureExtractor {
    groups: Vec<SensorGroup>,
    primary: usize,
    names: Vec<String>,
}

impl FeatureExtractor {
    /// Build the extractor and its feature names from the series channels
    pub fn new(channels: &[Channel]) -> Result<Self, SleepError> {
        let mut by_kind: BTreeMap<SensorKind, Vec<Channel>> = BTreeMap::new();
        for channel in channels {
            by_kind
                .entry(channel.kind.clone())
                .or_default()
                .push(channel.clone());
        }
        if by_kind.is_empty() {
            return Err(SleepError::FeatureComputation(
                "no channels to extract features from".to_string(),
            ));
        }

        let groups: Vec<SensorGroup> = by_kind
            .into_iter()
            .map(|(kind, channels)| SensorGroup { kind, channels })
            .collect();
        let primary = groups
            .iter()
            .position(|g| g.kind == SensorKind::Accelerometer)
            .or_else(|| groups.iter().position(|g| g.kind.is_motion()))
            .unwrap_or(0);

        let mut names: Vec<String> = GLOBAL_FEATURES.iter().map(|n| n.to_string()).collect();
        for group in &groups {
            let prefix = group.kind.feature_prefix();
            names.extend(SENSOR_FEATURES.iter().map(|suffix| format!("{prefix}_{suffix}")));
        }
        names.sort();
        if let Some(pair) = names.windows(2).find(|pair| pair[0] == pair[1]) {
            return Err(SleepError::FeatureComputation(format!(
                "feature {} would be produced twice",
                pair[0]
            )));
        }

        Ok(Self {
            groups,
            primary,
            names,
        })
    }

    /// Sorted feature names every row will carry
    pub fn feature_names(&self) -> &[String] {
        &self.names
    }

    /// Sensor kind the global features are computed on
    pub fn primary_sensor(&self) -> &SensorKind {
        &self.groups[self.primary].kind
    }

    /// Compute the feature vector of one window
    pub fn extract(&self, window: &Window<'_>) -> Result<FeatureVector, SleepError> {
        let mut values = BTreeMap::new();

        for (idx, group) in self.groups.iter().enumerate() {
            let magnitude = magnitude(window, &group.channels)?;
            let stats = MagnitudeStats::of(&magnitude);

            if idx == self.primary {
                values.insert(MAGNITUDE_RMS.to_string(), stats.rms);
                values.insert(MAGNITUDE_STD.to_string(), stats.std);
                values.insert(MAGNITUDE_MEAN.to_string(), stats.mean);
                values.insert(ACTIVITY_INDEX.to_string(), stats.activity_index);
            }

            let prefix = group.kind.feature_prefix();
            values.insert(format!("{prefix}_rms"), stats.rms);
            values.insert(format!("{prefix}_std"), stats.std);
            values.insert(format!("{prefix}_mean"), stats.mean);
            values.insert(format!("{prefix}_activity_index"), stats.activity_index);
            values.insert(format!("{prefix}_zero_crossing_rate"), stats.zero_crossing_rate);
        }

        if let Some((name, value)) = values.iter().find(|(_, v)| !v.is_finite()) {
            return Err(SleepError::FeatureComputation(format!(
                "{name} is {value} in window at {}",
                window.center.to_rfc3339()
            )));
        }

        Ok(FeatureVector {
            start: window.start,
            center: window.center,
            end: window.end,
            values,
        })
    }
}

/// Extract every window of a slicer into a feature matrix, in window order
pub fn build_feature_matrix(
    slicer: &WindowSlicer<'_>,
    extractor: &FeatureExtractor,
) -> Result<FeatureMatrix, SleepError> {
    let mut matrix = FeatureMatrix::new(extractor.feature_names().to_vec());
    for window in slicer {
        matrix.push(extractor.extract(&window)?)?;
    }
    Ok(matrix)
}

/// Euclidean norm of the given channels, per sample
fn magnitude(window: &Window<'_>, channels: &[Channel]) -> Result<Vec<f64>, SleepError> {
    let mut magnitude = vec![0.0; window.len()];
    for channel in channels {
        let samples = window.channel(channel).ok_or_else(|| {
            SleepError::FeatureComputation(format!(
                "channel {channel} missing from window at {}",
                window.center.to_rfc3339()
            ))
        })?;
        for (acc, v) in magnitude.iter_mut().zip(samples) {
            *acc += v * v;
        }
    }
    Ok(magnitude.into_iter().map(f64::sqrt).collect())
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct MagnitudeStats {
    rms: f64,
    std: f64,
    mean: f64,
    activity_index: f64,
    zero_crossing_rate: f64,
}

impl MagnitudeStats {
    fn of(samples: &[f64]) -> Self {
        if samples.is_empty() {
            return Self {
                rms: 0.0,
                std: 0.0,
                mean: 0.0,
                activity_index: 0.0,
                zero_crossing_rate: 0.0,
            };
        }

        let n = samples.len() as f64;
        let mean = samples.iter().sum::<f64>() / n;
        let rms = (samples.iter().map(|v| v * v).sum::<f64>() / n).sqrt();
        let std = (samples.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt();

        // Sum of absolute sample-to-sample differences over the window length
        let activity_index =
            samples.windows(2).map(|w| (w[1] - w[0]).abs()).sum::<f64>() / n;

        let crossings = samples
            .windows(2)
            .filter(|w| (w[0] - mean) * (w[1] - mean) < 0.0)
            .count();
        let zero_crossing_rate = if samples.len() > 1 {
            crossings as f64 / (n - 1.0)
        } else {
            0.0
        };

        Self {
            rms,
            std,
            mean,
            activity_index,
            zero_crossing_rate,
        }
    }
}
