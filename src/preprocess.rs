//! Preprocessing
//!
//! Turns the merged sample table into a uniformly sampled, gap-free series.
//! Each step is a separate function so it can be exercised on its own:
//! 1. [`retain_sensors`] drops channels of sensors that are not kept
//! 2. [`fill_missing`] fills null channel values from their neighbours
//! 3. [`resample`] interpolates onto a uniform grid
//! 4. [`low_pass`] optionally smooths each channel
//! 5. [`normalize_channels`] optionally centers or standardizes each channel

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::f64::consts::PI;

use crate::config::{Normalization, PreprocessConfig};
use crate::error::SleepError;
use crate::types::{Channel, PreprocessedSeries, SampleRow, SensorKind};

/// Upper bound on the samples per channel a resample may produce
pub const MAX_SERIES_SAMPLES: usize = 200_000_000;

/// Preprocessor running every step in order
pub struct Preprocessor;

impl Preprocessor {
    /// Preprocess merged rows into a series sampled at `rate_hz`
    pub fn run(
        rows: &[SampleRow],
        config: &PreprocessConfig,
        rate_hz: u32,
    ) -> Result<PreprocessedSeries, SleepError> {
        // Step 1: Keep only the configured sensors
        let retained = retain_sensors(rows, &config.sensors);

        // Step 2: Fill null channel values
        let table = fill_missing(&retained)?;

        // Step 3: Resample onto a uniform grid
        let mut series = resample(&table, rate_hz)?;

        // Step 4: Optional smoothing
        if let Some(cutoff_hz) = config.lowpass_cutoff_hz {
            low_pass(&mut series, cutoff_hz)?;
        }

        // Step 5: Optional normalization
        normalize_channels(&mut series, config.normalization);

        log::debug!(
            "preprocessed {} rows into {} samples x {} channels at {rate_hz} Hz",
            rows.len(),
            series.len(),
            series.channels().len()
        );
        Ok(series)
    }
}

/// Gap-free table on the original (irregular) timestamps
#[derive(Debug, Clone, PartialEq)]
pub struct FilledTable {
    pub timestamps: Vec<DateTime<Utc>>,
    pub channels: Vec<Channel>,
    /// One column per channel, each as long as `timestamps`
    pub columns: Vec<Vec<f64>>,
}

/// Drop channel values of sensors outside `sensors`, and rows left empty
pub fn retain_sensors(rows: &[SampleRow], sensors: &[SensorKind]) -> Vec<SampleRow> {
    rows.iter()
        .filter_map(|row| {
            let values: BTreeMap<Channel, f64> = row
                .values
                .iter()
                .filter(|(channel, _)| sensors.contains(&channel.kind))
                .map(|(channel, value)| (channel.clone(), *value))
                .collect();
            if values.is_empty() {
                return None;
            }
            Some(SampleRow {
                timestamp: row.timestamp,
                sensors: row
                    .sensors
                    .iter()
                    .filter(|kind| sensors.contains(kind))
                    .cloned()
                    .collect(),
                values,
            })
        })
        .collect()
}

/// Fill every null channel value.
///
/// A gap between two known samples is linearly interpolated in time; values
/// before the first or after the last known sample hold that sample. Every
/// channel needs at least two known samples.
pub fn fill_missing(rows: &[SampleRow]) -> Result<FilledTable, SleepError> {
    if let Some(pair) = rows.windows(2).find(|pair| pair[1].timestamp <= pair[0].timestamp) {
        return Err(SleepError::TimeOrder(format!(
            "row at {} does not follow {}",
            pair[1].timestamp.to_rfc3339(),
            pair[0].timestamp.to_rfc3339()
        )));
    }

    let channels: Vec<Channel> = rows
        .iter()
        .flat_map(|row| row.values.keys().cloned())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    if channels.is_empty() {
        return Err(SleepError::InsufficientData(
            "no samples left for the retained sensors".to_string(),
        ));
    }

    let times: Vec<i64> = rows.iter().map(SampleRow::timestamp_ms).collect();
    let mut columns = Vec::with_capacity(channels.len());
    for channel in &channels {
        let known: Vec<(usize, f64)> = rows
            .iter()
            .enumerate()
            .filter_map(|(idx, row)| row.get(channel).map(|v| (idx, v)))
            .collect();
        if known.len() < 2 {
            return Err(SleepError::InsufficientData(format!(
                "resample requires ≥2 samples for channel {channel}, got {}",
                known.len()
            )));
        }
        columns.push(fill_column(&times, &known));
    }

    Ok(FilledTable {
        timestamps: rows.iter().map(|row| row.timestamp).collect(),
        channels,
        columns,
    })
}

fn fill_column(times: &[i64], known: &[(usize, f64)]) -> Vec<f64> {
    let mut column = Vec::with_capacity(times.len());
    let mut next = 0;
    for (idx, &t) in times.iter().enumerate() {
        while next < known.len() && known[next].0 < idx {
            next += 1;
        }
        let value = match (next.checked_sub(1).map(|p| known[p]), known.get(next)) {
            (_, Some(&(k, v))) if k == idx => v,
            (Some((left_idx, left)), Some(&(right_idx, right))) => {
                let (t0, t1) = (times[left_idx], times[right_idx]);
                left + (right - left) * (t - t0) as f64 / (t1 - t0) as f64
            }
            (Some((_, left)), None) => left,
            (None, Some(&(_, right))) => right,
            (None, None) => f64::NAN,
        };
        column.push(value);
    }
    column
}

/// Linearly interpolate a filled table onto a uniform grid.
///
/// The grid starts at the first row and holds `floor(span · rate) + 1` points.
pub fn resample(table: &FilledTable, rate_hz: u32) -> Result<PreprocessedSeries, SleepError> {
    if rate_hz == 0 {
        return Err(SleepError::Config("resample rate must be > 0 Hz".to_string()));
    }
    let (Some(first), Some(last)) = (table.timestamps.first(), table.timestamps.last()) else {
        return Err(SleepError::InsufficientData(
            "resample requires ≥2 rows, got 0".to_string(),
        ));
    };
    if table.timestamps.len() < 2 {
        return Err(SleepError::InsufficientData(
            "resample requires ≥2 rows, got 1".to_string(),
        ));
    }

    let times: Vec<i64> = table.timestamps.iter().map(|t| t.timestamp_millis()).collect();
    let span_ms = (*last - *first).num_milliseconds();
    let n = usize::try_from(span_ms as i128 * rate_hz as i128 / 1000 + 1)
        .ok()
        .filter(|n| *n <= MAX_SERIES_SAMPLES)
        .ok_or_else(|| {
            SleepError::Config(format!(
                "resampling {span_ms} ms at {rate_hz} Hz would produce more than \
                 {MAX_SERIES_SAMPLES} samples per channel"
            ))
        })?;

    let origin = times[0];
    let columns = table
        .columns
        .iter()
        .map(|column| {
            let mut out = Vec::with_capacity(n);
            let mut seg = 0;
            for i in 0..n {
                let t = origin as f64 + i as f64 * 1000.0 / rate_hz as f64;
                while seg + 2 < times.len() && (times[seg + 1] as f64) <= t {
                    seg += 1;
                }
                let (t0, t1) = (times[seg] as f64, times[seg + 1] as f64);
                let frac = ((t - t0) / (t1 - t0)).clamp(0.0, 1.0);
                out.push(column[seg] + (column[seg + 1] - column[seg]) * frac);
            }
            out
        })
        .collect();

    PreprocessedSeries::new(*first, rate_hz, table.channels.clone(), columns)
}

/// First-order (RC) low-pass filter applied in place to every channel
pub fn low_pass(series: &mut PreprocessedSeries, cutoff_hz: f64) -> Result<(), SleepError> {
    let rate = series.rate_hz() as f64;
    let nyquist = rate / 2.0;
    if !(cutoff_hz.is_finite() && cutoff_hz > 0.0 && cutoff_hz < nyquist) {
        return Err(SleepError::Config(format!(
            "low-pass cutoff must be in (0, {nyquist}) Hz, got {cutoff_hz}"
        )));
    }

    let dt = 1.0 / rate;
    let rc = 1.0 / (2.0 * PI * cutoff_hz);
    let alpha = dt / (rc + dt);
    for (_, column) in series.columns_mut() {
        let mut previous = match column.first() {
            Some(v) => *v,
            None => continue,
        };
        for value in column.iter_mut().skip(1) {
            previous += alpha * (*value - previous);
            *value = previous;
        }
    }
    Ok(())
}

/// Center or standardize every channel in place
pub fn normalize_channels(series: &mut PreprocessedSeries, normalization: Normalization) {
    if normalization == Normalization::None {
        return;
    }
    for (channel, column) in series.columns_mut() {
        if column.is_empty() {
            continue;
        }
        let n = column.len() as f64;
        let mean = column.iter().sum::<f64>() / n;
        let std = (column.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt();
        let scale = match normalization {
            Normalization::Standardize if std > f64::EPSILON => std,
            Normalization::Standardize => {
                log::debug!("channel {channel} is constant; centering only");
                1.0
            }
            _ => 1.0,
        };
        for value in column.iter_mut() {
            *value = (*value - mean) / scale;
        }
    }
}
