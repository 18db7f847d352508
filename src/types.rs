//! Core types for the Sleep Flux pipeline
//!
//! This module defines the data structures that flow through each stage of the
//! pipeline: sensor packets, unified sample rows, the preprocessed series,
//! feature vectors, predictions, sleep periods and summary metrics.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::SleepError;

/// Sensor kind carried by a packet
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SensorKind {
    Accelerometer,
    Gyroscope,
    Magnetometer,
    Audio,
    Light,
    /// Any other sensor, keyed by its lowercase name
    Other(String),
}

impl SensorKind {
    /// Parse a sensor name, accepting common short forms
    pub fn parse(name: &str) -> Self {
        let name = name.trim().to_ascii_lowercase();
        match name.as_str() {
            "accelerometer" | "acc" | "accel" | "acceleration" | "linear_acceleration" => {
                SensorKind::Accelerometer
            }
            "gyroscope" | "gyro" | "gyr" => SensorKind::Gyroscope,
            "magnetometer" | "mag" | "magnetic_field" => SensorKind::Magnetometer,
            "audio" | "microphone" | "mic" | "sound" => SensorKind::Audio,
            "light" | "lux" | "ambient_light" => SensorKind::Light,
            _ => SensorKind::Other(name),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            SensorKind::Accelerometer => "accelerometer",
            SensorKind::Gyroscope => "gyroscope",
            SensorKind::Magnetometer => "magnetometer",
            SensorKind::Audio => "audio",
            SensorKind::Light => "light",
            SensorKind::Other(name) => name.as_str(),
        }
    }

    /// Prefix used for per-sensor feature names (`acc_rms`, `gyro_std`, ...)
    pub fn feature_prefix(&self) -> &str {
        match self {
            SensorKind::Accelerometer => "acc",
            SensorKind::Gyroscope => "gyro",
            SensorKind::Magnetometer => "mag",
            SensorKind::Audio => "audio",
            SensorKind::Light => "light",
            SensorKind::Other(name) => name.as_str(),
        }
    }

    /// Whether this sensor measures device motion
    pub fn is_motion(&self) -> bool {
        matches!(
            self,
            SensorKind::Accelerometer | SensorKind::Gyroscope | SensorKind::Magnetometer
        )
    }
}

impl From<String> for SensorKind {
    fn from(name: String) -> Self {
        SensorKind::parse(&name)
    }
}

impl From<SensorKind> for String {
    fn from(kind: SensorKind) -> Self {
        kind.as_str().to_string()
    }
}

impl fmt::Display for SensorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One named channel of the unified time series
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Channel {
    pub kind: SensorKind,
    pub axis: String,
}

impl Channel {
    pub fn new(kind: SensorKind, axis: impl Into<String>) -> Self {
        Self {
            kind,
            axis: axis.into().to_ascii_lowercase(),
        }
    }
}

impl fmt::Display for Channel {
    /// Motion axes are written `ax`, `gy`, `mz`; other sensors `audio_rms`, `light_lux`
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            SensorKind::Accelerometer => write!(f, "a{}", self.axis),
            SensorKind::Gyroscope => write!(f, "g{}", self.axis),
            SensorKind::Magnetometer => write!(f, "m{}", self.axis),
            other => write!(f, "{}_{}", other.as_str(), self.axis),
        }
    }
}

/// Raw sample inside a packet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawSample {
    /// Absolute epoch milliseconds, or an offset from the packet start
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t: Option<i64>,
    /// Kind-specific axis values (x/y/z for motion sensors)
    #[serde(flatten)]
    pub axes: BTreeMap<String, f64>,
}

/// One ingestion unit of raw sensor samples
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorPacket {
    pub device_id: String,
    /// Packet start (epoch milliseconds)
    pub timestamp_start: i64,
    /// Sampling rate (Hz)
    pub sampling_rate: u32,
    pub sensor: SensorKind,
    pub samples: Vec<RawSample>,
}

/// One row of the unified, time-ordered series
#[derive(Debug, Clone, PartialEq)]
pub struct SampleRow {
    pub timestamp: DateTime<Utc>,
    /// Sensors contributing to this row, sorted and unique
    pub sensors: Vec<SensorKind>,
    /// Channel values; a missing key is a null channel
    pub values: BTreeMap<Channel, f64>,
}

impl SampleRow {
    pub fn get(&self, channel: &Channel) -> Option<f64> {
        self.values.get(channel).copied()
    }

    pub fn timestamp_ms(&self) -> i64 {
        self.timestamp.timestamp_millis()
    }
}

/// Uniformly sampled, gap-free multi-channel series
#[derive(Debug, Clone, PartialEq)]
pub struct PreprocessedSeries {
    start: DateTime<Utc>,
    rate_hz: u32,
    channels: Vec<Channel>,
    columns: Vec<Vec<f64>>,
}

impl PreprocessedSeries {
    /// Build a series from equally long columns, one per channel
    pub fn new(
        start: DateTime<Utc>,
        rate_hz: u32,
        channels: Vec<Channel>,
        columns: Vec<Vec<f64>>,
    ) -> Result<Self, SleepError> {
        if rate_hz == 0 {
            return Err(SleepError::Config("series rate must be > 0 Hz".to_string()));
        }
        if channels.len() != columns.len() {
            return Err(SleepError::InsufficientData(format!(
                "{} channels but {} columns",
                channels.len(),
                columns.len()
            )));
        }
        if let Some(first) = columns.first() {
            if let Some((idx, _)) = columns
                .iter()
                .enumerate()
                .find(|(_, c)| c.len() != first.len())
            {
                return Err(SleepError::InsufficientData(format!(
                    "channel {} has {} samples, expected {}",
                    channels[idx],
                    columns[idx].len(),
                    first.len()
                )));
            }
        }

        Ok(Self {
            start,
            rate_hz,
            channels,
            columns,
        })
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn rate_hz(&self) -> u32 {
        self.rate_hz
    }

    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    /// Number of samples per channel
    pub fn len(&self) -> usize {
        self.columns.first().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn channel(&self, channel: &Channel) -> Option<&[f64]> {
        self.channels
            .iter()
            .position(|c| c == channel)
            .map(|idx| self.columns[idx].as_slice())
    }

    pub(crate) fn columns_mut(&mut self) -> impl Iterator<Item = (&Channel, &mut Vec<f64>)> {
        self.channels.iter().zip(self.columns.iter_mut())
    }

    /// Timestamp of sample `index` (exact to the nanosecond)
    pub fn timestamp_at(&self, index: usize) -> DateTime<Utc> {
        let offset_ns = (index as i128 * 1_000_000_000) / self.rate_hz as i128;
        self.start + TimeDelta::nanoseconds(offset_ns as i64)
    }

    /// Covered duration in seconds, from the first to the last sample
    pub fn duration_s(&self) -> f64 {
        match self.len() {
            0 => 0.0,
            n => (n - 1) as f64 / self.rate_hz as f64,
        }
    }
}

/// Named scalar features of one window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub start: DateTime<Utc>,
    /// Window center, the key of this row
    pub center: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub values: BTreeMap<String, f64>,
}

impl FeatureVector {
    pub fn get(&self, name: &str) -> Option<f64> {
        self.values.get(name).copied()
    }
}

/// Rectangular feature matrix, one row per window in chronological order
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FeatureMatrix {
    names: Vec<String>,
    rows: Vec<FeatureVector>,
}

impl FeatureMatrix {
    pub fn new(names: Vec<String>) -> Self {
        Self {
            names,
            rows: Vec::new(),
        }
    }

    /// Append a row, rejecting any row whose key set differs from the matrix
    pub fn push(&mut self, row: FeatureVector) -> Result<(), SleepError> {
        if row.values.len() != self.names.len()
            || !self.names.iter().all(|n| row.values.contains_key(n))
        {
            let missing: Vec<&str> = self
                .names
                .iter()
                .filter(|n| !row.values.contains_key(n.as_str()))
                .map(String::as_str)
                .collect();
            return Err(SleepError::FeatureComputation(format!(
                "window at {} does not match the feature set (missing: [{}])",
                row.center.to_rfc3339(),
                missing.join(", ")
            )));
        }
        if let Some(last) = self.rows.last() {
            if row.center <= last.center {
                return Err(SleepError::TimeOrder(format!(
                    "feature row {} does not follow {}",
                    row.center.to_rfc3339(),
                    last.center.to_rfc3339()
                )));
            }
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn rows(&self) -> &[FeatureVector] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn has_feature(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }

    /// All values of one feature, in row order
    pub fn column(&self, name: &str) -> Option<Vec<f64>> {
        if !self.has_feature(name) {
            return None;
        }
        Some(
            self.rows
                .iter()
                .map(|r| r.get(name).unwrap_or(f64::NAN))
                .collect(),
        )
    }
}

/// Sleep/wake label of one window
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    /// Window center timestamp
    pub timestamp: DateTime<Utc>,
    pub asleep: bool,
    /// Model score in [0,1] when produced by a scoring model
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

/// Chronological window labels, one per feature row
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PredictionSeries {
    predictions: Vec<Prediction>,
}

impl PredictionSeries {
    pub fn new(predictions: Vec<Prediction>) -> Self {
        Self { predictions }
    }

    /// Build unscored labels from (timestamp, asleep) pairs
    pub fn from_labels(labels: impl IntoIterator<Item = (DateTime<Utc>, bool)>) -> Self {
        Self {
            predictions: labels
                .into_iter()
                .map(|(timestamp, asleep)| Prediction {
                    timestamp,
                    asleep,
                    score: None,
                })
                .collect(),
        }
    }

    pub fn predictions(&self) -> &[Prediction] {
        &self.predictions
    }

    pub fn len(&self) -> usize {
        self.predictions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.predictions.is_empty()
    }

    pub fn sleep_count(&self) -> usize {
        self.predictions.iter().filter(|p| p.asleep).count()
    }

    /// First and last window timestamps
    pub fn span(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        match (self.predictions.first(), self.predictions.last()) {
            (Some(first), Some(last)) => Some((first.timestamp, last.timestamp)),
            _ => None,
        }
    }
}

/// Detected sleep interval
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SleepPeriod {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl SleepPeriod {
    pub fn duration(&self) -> TimeDelta {
        self.end - self.start
    }

    pub fn duration_s(&self) -> f64 {
        delta_to_seconds(self.duration())
    }
}

/// Summary statistics of one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SleepMetrics {
    pub span_start: DateTime<Utc>,
    pub span_end: DateTime<Utc>,
    /// Monitored span (seconds)
    pub span_s: f64,
    /// Sum of period durations (seconds)
    pub total_sleep_s: f64,
    pub period_count: usize,
    pub awakenings: usize,
    /// Time from span start to first period start (seconds)
    pub sleep_onset_latency_s: f64,
    /// Total sleep / span, in [0,1]
    pub sleep_efficiency: f64,
    pub longest_period_s: f64,
    /// Wake time between the first and the last period (seconds)
    pub wake_after_sleep_onset_s: f64,
}

/// Convert seconds to a nanosecond-precision delta
pub fn seconds_to_delta(seconds: f64) -> TimeDelta {
    TimeDelta::nanoseconds((seconds * 1e9).round() as i64)
}

/// Convert a delta to fractional seconds
pub fn delta_to_seconds(delta: TimeDelta) -> f64 {
    match delta.num_microseconds() {
        Some(us) => us as f64 / 1e6,
        None => delta.num_milliseconds() as f64 / 1e3,
    }
}
