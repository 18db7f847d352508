//! Sleep metrics
//!
//! Summary statistics of one run, derived from the detected periods and the
//! span covered by the predictions:
//! - Total sleep, period count and longest period
//! - Awakenings (periods − 1)
//! - Sleep-onset latency
//! - Sleep efficiency and wake after sleep onset

use chrono::{DateTime, TimeDelta, Utc};

use crate::error::SleepError;
use crate::types::{delta_to_seconds, PredictionSeries, SleepMetrics, SleepPeriod};

/// First and last prediction timestamps of a run
pub fn prediction_span(
    predictions: &PredictionSeries,
) -> Result<(DateTime<Utc>, DateTime<Utc>), SleepError> {
    predictions.span().ok_or_else(|| {
        SleepError::EmptyInput("no predictions to summarize".to_string())
    })
}

/// Compute metrics over the monitored span `[span_start, span_end]`
pub fn compute_sleep_metrics(
    periods: &[SleepPeriod],
    span_start: DateTime<Utc>,
    span_end: DateTime<Utc>,
) -> Result<SleepMetrics, SleepError> {
    if span_end < span_start {
        return Err(SleepError::TimeOrder(format!(
            "span ends at {} before it starts at {}",
            span_end.to_rfc3339(),
            span_start.to_rfc3339()
        )));
    }
    let span_s = delta_to_seconds(span_end - span_start);
    if span_s <= 0.0 {
        return Err(SleepError::EmptyInput(format!(
            "prediction span at {} has zero duration",
            span_start.to_rfc3339()
        )));
    }

    let total_sleep_s: f64 = periods.iter().map(SleepPeriod::duration_s).sum();
    let longest_period_s = periods
        .iter()
        .map(SleepPeriod::duration_s)
        .fold(0.0, f64::max);

    let sleep_onset_latency_s = match periods.first() {
        Some(first) => delta_to_seconds((first.start - span_start).max(TimeDelta::zero())),
        None => span_s,
    };

    let wake_after_sleep_onset_s = periods
        .windows(2)
        .map(|pair| delta_to_seconds((pair[1].start - pair[0].end).max(TimeDelta::zero())))
        .sum();

    Ok(SleepMetrics {
        span_start,
        span_end,
        span_s,
        total_sleep_s,
        period_count: periods.len(),
        awakenings: periods.len().saturating_sub(1),
        sleep_onset_latency_s,
        sleep_efficiency: (total_sleep_s / span_s).clamp(0.0, 1.0),
        longest_period_s,
        wake_after_sleep_onset_s,
    })
}
