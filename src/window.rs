//! Sliding windows over a preprocessed series
//!
//! Windows are produced lazily and borrow the series; iterating the same
//! slicer again yields the same windows. Trailing samples that cannot fill a
//! whole window are dropped.

use chrono::{DateTime, TimeDelta, Utc};
use std::ops::Range;

use crate::config::WindowConfig;
use crate::error::SleepError;
use crate::types::{Channel, PreprocessedSeries};

/// Window geometry bound to one series
#[derive(Debug, Clone, Copy)]
pub struct WindowSlicer<'a> {
    series: &'a PreprocessedSeries,
    window_len: usize,
    step_len: usize,
}

impl<'a> WindowSlicer<'a> {
    /// Validate the geometry against the series.
    ///
    /// Lengths in samples are `round(window_s · fs)` and `round(step_s · fs)`;
    /// both must be at least one, and `fs` must be the series rate.
    pub fn new(series: &'a PreprocessedSeries, config: &WindowConfig) -> Result<Self, SleepError> {
        if config.fs == 0 {
            return Err(SleepError::Config("fs must be > 0 Hz".to_string()));
        }
        if config.fs != series.rate_hz() {
            return Err(SleepError::Config(format!(
                "fs is {} Hz but the series is sampled at {} Hz",
                config.fs,
                series.rate_hz()
            )));
        }
        let window_len = samples_for("window_s", config.window_s, config.fs)?;
        let step_len = samples_for("step_s", config.step_s, config.fs)?;

        Ok(Self {
            series,
            window_len,
            step_len,
        })
    }

    pub fn window_len(&self) -> usize {
        self.window_len
    }

    pub fn step_len(&self) -> usize {
        self.step_len
    }

    /// Number of full windows, `floor((n − window_len) / step_len) + 1`
    pub fn len(&self) -> usize {
        let total = self.series.len();
        if total < self.window_len {
            0
        } else {
            (total - self.window_len) / self.step_len + 1
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> Windows<'a> {
        Windows {
            slicer: *self,
            next: 0,
            count: self.len(),
        }
    }

    fn window(&self, index: usize) -> Window<'a> {
        let first = index * self.step_len;
        let start = self.series.timestamp_at(first);
        let end = self.series.timestamp_at(first + self.window_len);
        Window {
            index,
            start,
            center: start + (end - start) / 2,
            end,
            range: first..first + self.window_len,
            series: self.series,
        }
    }
}

fn samples_for(name: &str, seconds: f64, fs: u32) -> Result<usize, SleepError> {
    if !(seconds.is_finite() && seconds > 0.0) {
        return Err(SleepError::Config(format!(
            "{name} must be a positive number, got {seconds}"
        )));
    }
    let samples = (seconds * fs as f64).round();
    if samples < 1.0 {
        return Err(SleepError::Config(format!(
            "{name} = {seconds} s is shorter than one sample at {fs} Hz"
        )));
    }
    Ok(samples as usize)
}

impl<'a> IntoIterator for WindowSlicer<'a> {
    type Item = Window<'a>;
    type IntoIter = Windows<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<'a> IntoIterator for &WindowSlicer<'a> {
    type Item = Window<'a>;
    type IntoIter = Windows<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator over the windows of a [`WindowSlicer`]
#[derive(Debug, Clone)]
pub struct Windows<'a> {
    slicer: WindowSlicer<'a>,
    next: usize,
    count: usize,
}

impl<'a> Iterator for Windows<'a> {
    type Item = Window<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.count {
            return None;
        }
        let window = self.slicer.window(self.next);
        self.next += 1;
        Some(window)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.count - self.next;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Windows<'_> {}

/// One fixed-length slice of the series
#[derive(Debug, Clone)]
pub struct Window<'a> {
    pub index: usize,
    pub start: DateTime<Utc>,
    /// `start + window duration / 2`
    pub center: DateTime<Utc>,
    /// Exclusive end, `start + window_len / fs`
    pub end: DateTime<Utc>,
    range: Range<usize>,
    series: &'a PreprocessedSeries,
}

impl<'a> Window<'a> {
    /// Sample indices covered in the series
    pub fn range(&self) -> Range<usize> {
        self.range.clone()
    }

    pub fn len(&self) -> usize {
        self.range.len()
    }

    pub fn is_empty(&self) -> bool {
        self.range.is_empty()
    }

    pub fn duration(&self) -> TimeDelta {
        self.end - self.start
    }

    pub fn channels(&self) -> &'a [Channel] {
        self.series.channels()
    }

    /// Samples of one channel inside this window
    pub fn channel(&self, channel: &Channel) -> Option<&'a [f64]> {
        self.series
            .channel(channel)
            .and_then(|column| column.get(self.range.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SensorKind;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn series(seconds: usize, rate: u32) -> PreprocessedSeries {
        let n = seconds * rate as usize;
        let start = Utc.timestamp_millis_opt(1_690_000_000_000).unwrap();
        let column = (0..n).map(|i| i as f64).collect();
        PreprocessedSeries::new(
            start,
            rate,
            vec![Channel::new(SensorKind::Accelerometer, "x")],
            vec![column],
        )
        .unwrap()
    }

    fn config(window_s: f64, step_s: f64, fs: u32) -> WindowConfig {
        WindowConfig {
            window_s,
            step_s,
            fs,
        }
    }

    #[test]
    fn test_two_minutes_at_50hz_gives_23_windows() {
        let series = series(120, 50);
        let slicer = WindowSlicer::new(&series, &config(10.0, 5.0, 50)).unwrap();

        assert_eq!(slicer.window_len(), 500);
        assert_eq!(slicer.step_len(), 250);
        assert_eq!(slicer.len(), 23);
        assert_eq!(slicer.iter().count(), 23);

        let last = slicer.iter().last().unwrap();
        assert_eq!(last.range(), 5500..6000);
    }

    #[test]
    fn test_center_is_start_plus_half_window() {
        let series = series(30, 50);
        let slicer = WindowSlicer::new(&series, &config(10.0, 5.0, 50)).unwrap();
        let second = slicer.iter().nth(1).unwrap();

        assert_eq!(second.start, series.start() + TimeDelta::seconds(5));
        assert_eq!(second.center, series.start() + TimeDelta::seconds(10));
        assert_eq!(second.end, series.start() + TimeDelta::seconds(15));
        let x = Channel::new(SensorKind::Accelerometer, "x");
        assert_eq!(second.channel(&x).unwrap()[0], 250.0);
    }

    #[test]
    fn test_slicer_is_restartable() {
        let series = series(60, 50);
        let slicer = WindowSlicer::new(&series, &config(10.0, 2.5, 50)).unwrap();

        let first: Vec<_> = slicer.iter().map(|w| (w.start, w.end, w.range())).collect();
        let second: Vec<_> = (&slicer).into_iter().map(|w| (w.start, w.end, w.range())).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_short_series_yields_no_windows() {
        let series = series(5, 50);
        let slicer = WindowSlicer::new(&series, &config(10.0, 5.0, 50)).unwrap();
        assert!(slicer.is_empty());
        assert_eq!(slicer.iter().next().map(|w| w.index), None);
    }

    #[test]
    fn test_invalid_geometry_is_config_error() {
        let series = series(60, 50);
        assert!(matches!(
            WindowSlicer::new(&series, &config(0.0, 5.0, 50)),
            Err(SleepError::Config(_))
        ));
        assert!(matches!(
            WindowSlicer::new(&series, &config(10.0, 0.001, 50)),
            Err(SleepError::Config(_))
        ));
        assert!(matches!(
            WindowSlicer::new(&series, &config(10.0, 5.0, 25)),
            Err(SleepError::Config(_))
        ));
    }

    proptest! {
        #[test]
        fn prop_window_count_and_monotonic_centers(
            seconds in 1usize..200,
            window_s in 0.5f64..30.0,
            step_s in 0.5f64..30.0,
        ) {
            let series = series(seconds, 10);
            let slicer = WindowSlicer::new(&series, &config(window_s, step_s, 10)).unwrap();
            let windows: Vec<_> = slicer.iter().collect();

            let total = series.len();
            let expected = if total < slicer.window_len() {
                0
            } else {
                (total - slicer.window_len()) / slicer.step_len() + 1
            };
            prop_assert_eq!(windows.len(), expected);
            prop_assert!(windows.iter().all(|w| w.range().end <= total));
            prop_assert!(windows.windows(2).all(|pair| pair[0].center < pair[1].center));
        }
    }
}
