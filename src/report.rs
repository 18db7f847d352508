//! Reporting collaborators
//!
//! The orchestrator hands its results to two narrow interfaces:
//! [`ResultExporter::export`] for periods and metrics, and
//! [`Visualizer::visualize`] for the per-window timeline. Nothing flows back
//! into the pipeline from either.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::error::SleepError;
use crate::features::GLOBAL_FEATURES;
use crate::types::{FeatureMatrix, PredictionSeries, SleepMetrics, SleepPeriod};
use crate::{PRODUCER_NAME, SLEEP_FLUX_VERSION};

pub const RESULTS_JSON: &str = "sleep_results.json";
pub const PERIODS_CSV: &str = "sleep_periods.csv";
pub const TIMELINE_CSV: &str = "timeline.csv";
pub const HYPNOGRAM_TXT: &str = "hypnogram.txt";

/// Windows per hypnogram line
const HYPNOGRAM_WIDTH: usize = 60;

/// Writes periods and metrics to a destination directory
pub trait ResultExporter {
    fn export(
        &self,
        periods: &[SleepPeriod],
        metrics: &SleepMetrics,
        destination: &Path,
    ) -> Result<(), SleepError>;
}

/// Renders the per-window timeline into a destination directory
pub trait Visualizer {
    fn visualize(
        &self,
        features: &FeatureMatrix,
        predictions: &PredictionSeries,
        destination: &Path,
    ) -> Result<(), SleepError>;
}

/// Producer metadata embedded in every report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportProducer {
    pub name: String,
    pub version: String,
    pub run_id: String,
}

/// One exported period
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodRecord {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub duration_s: f64,
}

impl From<&SleepPeriod> for PeriodRecord {
    fn from(period: &SleepPeriod) -> Self {
        Self {
            start: period.start,
            end: period.end,
            duration_s: period.duration_s(),
        }
    }
}

/// Content of `sleep_results.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SleepReport {
    pub producer: ReportProducer,
    pub generated_at: DateTime<Utc>,
    pub periods: Vec<PeriodRecord>,
    pub metrics: SleepMetrics,
}

/// Writes `sleep_results.json`
pub struct JsonExporter {
    run_id: String,
}

impl Default for JsonExporter {
    fn default() -> Self {
        Self::new()
    }
}

impl JsonExporter {
    /// Create an exporter with a fresh run id
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
        }
    }

    /// Create an exporter with a specific run id
    pub fn with_run_id(run_id: String) -> Self {
        Self { run_id }
    }

    pub fn report(&self, periods: &[SleepPeriod], metrics: &SleepMetrics) -> SleepReport {
        SleepReport {
            producer: ReportProducer {
                name: PRODUCER_NAME.to_string(),
                version: SLEEP_FLUX_VERSION.to_string(),
                run_id: self.run_id.clone(),
            },
            generated_at: Utc::now(),
            periods: periods.iter().map(PeriodRecord::from).collect(),
            metrics: metrics.clone(),
        }
    }
}

impl ResultExporter for JsonExporter {
    fn export(
        &self,
        periods: &[SleepPeriod],
        metrics: &SleepMetrics,
        destination: &Path,
    ) -> Result<(), SleepError> {
        let path = output_path(destination, RESULTS_JSON)?;
        let json = serde_json::to_string_pretty(&self.report(periods, metrics))?;
        fs::write(&path, json)?;
        log::info!("wrote {}", path.display());
        Ok(())
    }
}

/// Writes `sleep_periods.csv`, one row per period
pub struct CsvExporter;

impl ResultExporter for CsvExporter {
    fn export(
        &self,
        periods: &[SleepPeriod],
        _metrics: &SleepMetrics,
        destination: &Path,
    ) -> Result<(), SleepError> {
        let path = output_path(destination, PERIODS_CSV)?;
        let mut writer = csv::Writer::from_path(&path).map_err(csv_error)?;
        writer
            .write_record(["start", "end", "duration_s"])
            .map_err(csv_error)?;
        for period in periods {
            writer
                .write_record([
                    period.start.to_rfc3339(),
                    period.end.to_rfc3339(),
                    period.duration_s().to_string(),
                ])
                .map_err(csv_error)?;
        }
        writer.flush()?;
        log::info!("wrote {} ({} periods)", path.display(), periods.len());
        Ok(())
    }
}

/// Writes `timeline.csv` and a text hypnogram, `hypnogram.txt`
pub struct TimelineVisualizer;

impl Visualizer for TimelineVisualizer {
    fn visualize(
        &self,
        features: &FeatureMatrix,
        predictions: &PredictionSeries,
        destination: &Path,
    ) -> Result<(), SleepError> {
        if features.len() != predictions.len() {
            return Err(SleepError::Export(format!(
                "{} feature rows but {} predictions",
                features.len(),
                predictions.len()
            )));
        }

        let path = output_path(destination, TIMELINE_CSV)?;
        let mut writer = csv::Writer::from_path(&path).map_err(csv_error)?;
        let mut header = vec!["timestamp", "label", "score"];
        header.extend(GLOBAL_FEATURES.iter().copied().filter(|n| features.has_feature(n)));
        writer.write_record(&header).map_err(csv_error)?;

        for (row, prediction) in features.rows().iter().zip(predictions.predictions()) {
            let mut record = vec![
                prediction.timestamp.to_rfc3339(),
                label(prediction.asleep).to_string(),
                prediction.score.map(|s| s.to_string()).unwrap_or_default(),
            ];
            record.extend(
                header[3..]
                    .iter()
                    .map(|name| row.get(name).map(|v| v.to_string()).unwrap_or_default()),
            );
            writer.write_record(&record).map_err(csv_error)?;
        }
        writer.flush()?;

        let hypnogram_path = output_path(destination, HYPNOGRAM_TXT)?;
        fs::write(&hypnogram_path, hypnogram(predictions))?;
        log::info!(
            "wrote {} and {}",
            path.display(),
            hypnogram_path.display()
        );
        Ok(())
    }
}

fn label(asleep: bool) -> &'static str {
    if asleep {
        "sleep"
    } else {
        "wake"
    }
}

/// One character per window (`#` sleep, `.` wake), each line prefixed by the
/// time of its first window
pub fn hypnogram(predictions: &PredictionSeries) -> String {
    let mut out = String::new();
    for chunk in predictions.predictions().chunks(HYPNOGRAM_WIDTH) {
        out.push_str(&chunk[0].timestamp.format("%Y-%m-%d %H:%M:%S").to_string());
        out.push_str("  ");
        out.extend(chunk.iter().map(|p| if p.asleep { '#' } else { '.' }));
        out.push('\n');
    }
    out
}

fn output_path(destination: &Path, file_name: &str) -> Result<PathBuf, SleepError> {
    fs::create_dir_all(destination)?;
    Ok(destination.join(file_name))
}

fn csv_error(e: csv::Error) -> SleepError {
    SleepError::Export(format!("CSV write failed: {e}"))
}
