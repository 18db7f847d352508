//! Period aggregation
//!
//! Collapses runs of consecutive sleep predictions into sleep periods. Each
//! prediction stands for the slot `[timestamp, timestamp + step_s)`, so a run
//! of N windows lasts `N · step_s`. Runs separated by even a single wake window
//! stay separate.

use chrono::{DateTime, Utc};

use crate::error::SleepError;
use crate::types::{seconds_to_delta, PredictionSeries, SleepPeriod};

/// Merge consecutive sleep windows into periods of at least `min_duration_s`
pub fn aggregate_periods(
    predictions: &PredictionSeries,
    step_s: f64,
    min_duration_s: f64,
) -> Result<Vec<SleepPeriod>, SleepError> {
    if !(step_s.is_finite() && step_s > 0.0) {
        return Err(SleepError::Config(format!(
            "step_s must be a positive number, got {step_s}"
        )));
    }
    if !(min_duration_s.is_finite() && min_duration_s >= 0.0) {
        return Err(SleepError::Config(format!(
            "min_duration_s must be >= 0, got {min_duration_s}"
        )));
    }

    let items = predictions.predictions();
    if let Some(pair) = items.windows(2).find(|pair| pair[1].timestamp <= pair[0].timestamp) {
        return Err(SleepError::TimeOrder(format!(
            "prediction at {} does not follow {}",
            pair[1].timestamp.to_rfc3339(),
            pair[0].timestamp.to_rfc3339()
        )));
    }

    let step = seconds_to_delta(step_s);
    let mut periods = Vec::new();
    let mut discarded = 0;
    let mut open: Option<(DateTime<Utc>, DateTime<Utc>)> = None;

    let mut close = |run: (DateTime<Utc>, DateTime<Utc>), next: Option<DateTime<Utc>>| {
        let (first, last) = run;
        let mut end = last + step;
        if let Some(next) = next {
            end = end.min(next);
        }
        let period = SleepPeriod { start: first, end };
        if period.duration_s() >= min_duration_s {
            periods.push(period);
        } else {
            discarded += 1;
        }
    };

    for prediction in items {
        match (prediction.asleep, open) {
            (true, Some((first, _))) => open = Some((first, prediction.timestamp)),
            (true, None) => open = Some((prediction.timestamp, prediction.timestamp)),
            (false, Some(run)) => {
                close(run, Some(prediction.timestamp));
                open = None;
            }
            (false, None) => {}
        }
    }
    if let Some(run) = open {
        close(run, None);
    }

    log::debug!(
        "{} sleep periods, {discarded} shorter than {min_duration_s} s discarded",
        periods.len()
    );
    Ok(periods)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeDelta, TimeZone};
    use pretty_assertions::assert_eq;

    fn t0() -> DateTime<Utc> {
        Utc.timestamp_millis_opt(1_690_000_000_000).unwrap()
    }

    fn series(labels: &[bool]) -> PredictionSeries {
        PredictionSeries::from_labels(
            labels
                .iter()
                .enumerate()
                .map(|(i, asleep)| (t0() + TimeDelta::seconds(5 * i as i64), *asleep)),
        )
    }

    #[test]
    fn test_eleven_windows_are_too_short() {
        let periods = aggregate_periods(&series(&[true; 11]), 5.0, 60.0).unwrap();
        assert!(periods.is_empty());
    }

    #[test]
    fn test_thirteen_windows_make_one_period() {
        let periods = aggregate_periods(&series(&[true; 13]), 5.0, 60.0).unwrap();
        assert_eq!(periods.len(), 1);
        assert_eq!(periods[0].start, t0());
        assert_eq!(periods[0].duration_s(), 65.0);
    }

    #[test]
    fn test_single_wake_window_is_not_bridged() {
        let mut labels = vec![true; 5];
        labels.push(false);
        labels.extend([true; 4]);
        let periods = aggregate_periods(&series(&labels), 5.0, 0.0).unwrap();

        assert_eq!(periods.len(), 2);
        assert_eq!(periods[0].end, t0() + TimeDelta::seconds(25));
        assert_eq!(periods[1].start, t0() + TimeDelta::seconds(30));
        assert!(periods[0].end <= periods[1].start);
    }

    #[test]
    fn test_period_ends_at_next_wake_window() {
        // Window centers 2 s apart with a 5 s step: the period stops at the wake window
        let series = PredictionSeries::from_labels(vec![
            (t0(), true),
            (t0() + TimeDelta::seconds(2), true),
            (t0() + TimeDelta::seconds(4), false),
        ]);
        let periods = aggregate_periods(&series, 5.0, 0.0).unwrap();
        assert_eq!(periods[0].end, t0() + TimeDelta::seconds(4));
    }

    #[test]
    fn test_invalid_arguments() {
        assert!(matches!(
            aggregate_periods(&series(&[true]), 0.0, 60.0),
            Err(SleepError::Config(_))
        ));
        assert!(matches!(
            aggregate_periods(&series(&[true]), 5.0, -1.0),
            Err(SleepError::Config(_))
        ));

        let unordered = PredictionSeries::from_labels(vec![
            (t0() + TimeDelta::seconds(5), true),
            (t0(), true),
        ]);
        assert!(matches!(
            aggregate_periods(&unordered, 5.0, 0.0),
            Err(SleepError::TimeOrder(_))
        ));
    }

    #[test]
    fn test_empty_series_has_no_periods() {
        let periods = aggregate_periods(&PredictionSeries::default(), 5.0, 60.0).unwrap();
        assert!(periods.is_empty());
    }
}
