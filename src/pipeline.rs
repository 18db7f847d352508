//! Pipeline orchestration
//!
//! This module provides the public entry points of Sleep Flux. It sequences
//! the stages from raw packet files to sleep periods and metrics, wraps the
//! first stage error it meets with the failing stage, and hands results to
//! the reporting collaborators.

use std::path::Path;
use std::time::Instant;

use serde::Serialize;

use crate::aggregate::aggregate_periods;
use crate::classifier::{HeuristicClassifier, ModelClassifier, SleepClassifier, SleepScorer};
use crate::config::{ClassifierKind, PipelineConfig};
use crate::error::{SleepError, Stage, StageContext, StageFailure};
use crate::features::{build_feature_matrix, FeatureExtractor};
use crate::loader::load_path;
use crate::metrics::{compute_sleep_metrics, prediction_span};
use crate::preprocess::Preprocessor;
use crate::report::{CsvExporter, JsonExporter, ResultExporter, TimelineVisualizer, Visualizer};
use crate::types::{FeatureMatrix, PredictionSeries, SensorPacket, SleepMetrics, SleepPeriod};
use crate::unpack::Unpacker;
use crate::window::WindowSlicer;

/// Everything one run produces
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineOutput {
    pub periods: Vec<SleepPeriod>,
    pub metrics: SleepMetrics,
    pub features: FeatureMatrix,
    pub predictions: PredictionSeries,
}

/// Configured pipeline with its injected collaborators.
///
/// The pipeline holds no state between runs; the same value can process any
/// number of inputs.
pub struct SleepPipeline<'a> {
    config: PipelineConfig,
    scorer: Option<&'a dyn SleepScorer>,
    exporters: Vec<Box<dyn ResultExporter + 'a>>,
    visualizer: Option<Box<dyn Visualizer + 'a>>,
}

impl<'a> SleepPipeline<'a> {
    /// Create a pipeline writing JSON and CSV results plus a timeline
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            scorer: None,
            exporters: vec![Box::new(JsonExporter::new()), Box::new(CsvExporter)],
            visualizer: Some(Box::new(TimelineVisualizer)),
        }
    }

    /// Scoring function used when the model classifier is selected
    pub fn with_scorer(mut self, scorer: &'a dyn SleepScorer) -> Self {
        self.scorer = Some(scorer);
        self
    }

    /// Replace the result exporters
    pub fn with_exporters(mut self, exporters: Vec<Box<dyn ResultExporter + 'a>>) -> Self {
        self.exporters = exporters;
        self
    }

    /// Replace (or remove) the timeline visualizer
    pub fn with_visualizer(mut self, visualizer: Option<Box<dyn Visualizer + 'a>>) -> Self {
        self.visualizer = visualizer;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run stages 2-8 on packets already in memory
    pub fn detect(&self, packets: &[SensorPacket]) -> Result<PipelineOutput, StageFailure> {
        self.config
            .validate()
            .stage(Stage::Configure)
            .and_then(|()| self.process(packets))
            .map_err(log_failure)
    }

    /// Load `input`, detect sleep, then export and visualize into `out_dir`
    pub fn run(&self, input: &Path, out_dir: &Path) -> Result<PipelineOutput, StageFailure> {
        self.run_stages(input, out_dir).map_err(log_failure)
    }

    fn run_stages(&self, input: &Path, out_dir: &Path) -> Result<PipelineOutput, StageFailure> {
        let started = Instant::now();
        self.config.validate().stage(Stage::Configure)?;

        // Stage 1: Load packets
        let packets = load_path(input, self.config.input_format).stage(Stage::Load)?;
        log::info!("load: {} packets from {}", packets.len(), input.display());

        let output = self.process(&packets)?;

        // Hand results to the reporting collaborators
        for exporter in &self.exporters {
            exporter
                .export(&output.periods, &output.metrics, out_dir)
                .stage(Stage::Export)?;
        }
        if let Some(visualizer) = &self.visualizer {
            visualizer
                .visualize(&output.features, &output.predictions, out_dir)
                .stage(Stage::Visualize)?;
        }

        log::info!(
            "run finished in {:.2?}: {} periods, {:.0} s asleep",
            started.elapsed(),
            output.periods.len(),
            output.metrics.total_sleep_s
        );
        Ok(output)
    }

    fn process(&self, packets: &[SensorPacket]) -> Result<PipelineOutput, StageFailure> {
        let config = &self.config;

        // Stage 2: Unpack into one sorted table
        let rows = Unpacker::unpack(packets).stage(Stage::Unpack)?;
        log::info!("unpack: {} packets -> {} rows", packets.len(), rows.len());

        // Stage 3: Preprocess to a uniform series
        let series = Preprocessor::run(&rows, &config.preprocess, config.window.fs)
            .stage(Stage::Preprocess)?;
        log::info!(
            "preprocess: {} samples x {} channels ({:.1} s)",
            series.len(),
            series.channels().len(),
            series.duration_s()
        );

        // Stage 4: Slice windows
        let slicer = WindowSlicer::new(&series, &config.window).stage(Stage::Slice)?;
        log::info!(
            "slice: {} windows of {} samples, step {}",
            slicer.len(),
            slicer.window_len(),
            slicer.step_len()
        );

        // Stage 5: Extract features
        let features = FeatureExtractor::new(series.channels())
            .and_then(|extractor| build_feature_matrix(&slicer, &extractor))
            .stage(Stage::Extract)?;
        log::info!(
            "extract: {} rows x {} features",
            features.len(),
            features.names().len()
        );

        // Stage 6: Classify windows
        let predictions = self.classify(&features).stage(Stage::Classify)?;
        log::info!(
            "classify: {} of {} windows asleep",
            predictions.sleep_count(),
            predictions.len()
        );

        // Stage 7: Aggregate into periods
        let periods = aggregate_periods(
            &predictions,
            config.window.step_s,
            config.aggregation.min_duration_s,
        )
        .stage(Stage::Aggregate)?;
        log::info!("aggregate: {} sleep periods", periods.len());

        // Stage 8: Summary metrics
        let metrics = prediction_span(&predictions)
            .and_then(|(start, end)| compute_sleep_metrics(&periods, start, end))
            .stage(Stage::Metrics)?;
        log::info!(
            "metrics: efficiency {:.2}, latency {:.0} s, {} awakenings",
            metrics.sleep_efficiency,
            metrics.sleep_onset_latency_s,
            metrics.awakenings
        );

        Ok(PipelineOutput {
            periods,
            metrics,
            features,
            predictions,
        })
    }

    fn classify(&self, features: &FeatureMatrix) -> Result<PredictionSeries, SleepError> {
        let config = &self.config.classifier;
        match config.kind {
            ClassifierKind::Heuristic => {
                HeuristicClassifier::from_config(config)?.classify(features)
            }
            ClassifierKind::Model => {
                let scorer: Option<&dyn SleepScorer> = match (self.scorer, &config.logistic) {
                    (Some(scorer), _) => Some(scorer),
                    (None, Some(logistic)) => {
                        logistic.check_features(features.names())?;
                        Some(logistic as &dyn SleepScorer)
                    }
                    (None, None) => None,
                };
                ModelClassifier::new(scorer)
                    .with_threshold(config.score_threshold)?
                    .classify(features)
            }
        }
    }
}

fn log_failure(failure: StageFailure) -> StageFailure {
    log::error!("{failure}");
    failure
}

/// One-shot form of [`SleepPipeline::run`] with the default collaborators
pub fn run_pipeline(
    input: &Path,
    out_dir: &Path,
    config: &PipelineConfig,
    scorer: Option<&dyn SleepScorer>,
) -> Result<PipelineOutput, StageFailure> {
    let mut pipeline = SleepPipeline::new(config.clone());
    if let Some(scorer) = scorer {
        pipeline = pipeline.with_scorer(scorer);
    }
    pipeline.run(input, out_dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClassifierConfig;
    use crate::report::{HYPNOGRAM_TXT, PERIODS_CSV, RESULTS_JSON, TIMELINE_CSV};
    use crate::types::{FeatureVector, RawSample, SensorKind};
    use chrono::{DateTime, TimeDelta, TimeZone, Utc};
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;
    use std::fs;
    use tempfile::tempdir;

    const START: i64 = 1_690_000_000_000;

    fn t0() -> DateTime<Utc> {
        Utc.timestamp_millis_opt(START).unwrap()
    }

    /// One-second packets at 50 Hz: 2 min moving, 6 min still, 2 min moving
    fn night() -> Vec<SensorPacket> {
        let mut packets = Vec::new();
        for second in 0..600i64 {
            let moving = !(120..480).contains(&second);
            let mut acc = Vec::new();
            let mut gyro = Vec::new();
            for k in 0..50i64 {
                let i = (second * 50 + k) as f64;
                let t = Some(START + second * 1000 + k * 20);
                let (x, y) = if moving {
                    (5.0 * (0.9 * i).sin(), 5.0 * (1.3 * i).cos())
                } else {
                    (0.0, 0.0)
                };
                acc.push(RawSample {
                    t,
                    axes: [("x", x), ("y", y), ("z", 9.81)]
                        .iter()
                        .map(|(axis, v)| (axis.to_string(), *v))
                        .collect(),
                });
                gyro.push(RawSample {
                    t,
                    axes: [("x", x / 10.0), ("y", 0.0), ("z", 0.0)]
                        .iter()
                        .map(|(axis, v)| (axis.to_string(), *v))
                        .collect(),
                });
            }
            for (sensor, samples) in [(SensorKind::Accelerometer, acc), (SensorKind::Gyroscope, gyro)] {
                packets.push(SensorPacket {
                    device_id: "phone-01".to_string(),
                    timestamp_start: START + second * 1000,
                    sampling_rate: 50,
                    sensor,
                    samples,
                });
            }
        }
        packets
    }

    fn quiet_pipeline<'a>(config: PipelineConfig) -> SleepPipeline<'a> {
        SleepPipeline::new(config)
            .with_exporters(Vec::new())
            .with_visualizer(None)
    }

    #[test]
    fn test_detects_still_stretch_as_one_period() {
        let output = quiet_pipeline(PipelineConfig::default())
            .detect(&night())
            .unwrap();

        assert_eq!(output.features.len(), 119);
        assert_eq!(output.predictions.len(), 119);
        assert_eq!(
            output.periods,
            vec![SleepPeriod {
                start: t0() + TimeDelta::seconds(125),
                end: t0() + TimeDelta::seconds(480),
            }]
        );
        assert_eq!(output.metrics.awakenings, 0);
        assert_eq!(output.metrics.span_s, 590.0);
        assert_eq!(output.metrics.sleep_onset_latency_s, 120.0);
        assert!((output.metrics.sleep_efficiency - 355.0 / 590.0).abs() < 1e-9);
    }

    #[test]
    fn test_detect_is_deterministic() {
        let pipeline = quiet_pipeline(PipelineConfig::default());
        let packets = night();
        assert_eq!(pipeline.detect(&packets).unwrap(), pipeline.detect(&packets).unwrap());
    }

    #[test]
    fn test_model_classifier_with_injected_scorer() {
        let scorer = |f: &FeatureVector| {
            if f.get("activity_index").unwrap_or(1.0) < 0.1 {
                0.9
            } else {
                0.1
            }
        };
        let config = PipelineConfig {
            classifier: ClassifierConfig {
                kind: ClassifierKind::Model,
                ..ClassifierConfig::default()
            },
            ..PipelineConfig::default()
        };
        let output = quiet_pipeline(config).with_scorer(&scorer).detect(&night()).unwrap();

        assert_eq!(output.periods.len(), 1);
        assert_eq!(output.periods[0].start, t0() + TimeDelta::seconds(125));
        assert_eq!(output.predictions.predictions()[30].score, Some(0.9));
    }

    #[test]
    fn test_model_without_scorer_fails_in_classify_stage() {
        let config = PipelineConfig {
            classifier: ClassifierConfig {
                kind: ClassifierKind::Model,
                ..ClassifierConfig::default()
            },
            ..PipelineConfig::default()
        };
        let failure = quiet_pipeline(config).detect(&night()).unwrap_err();

        assert_eq!(failure.stage, Stage::Classify);
        assert!(matches!(failure.source, SleepError::ModelUnavailable(_)));
    }

    #[test]
    fn test_single_sample_reports_preprocess_failure() {
        let packet = SensorPacket {
            device_id: "phone-01".to_string(),
            timestamp_start: START,
            sampling_rate: 50,
            sensor: SensorKind::Accelerometer,
            samples: vec![RawSample {
                t: Some(START),
                axes: BTreeMap::from([("z".to_string(), 9.81)]),
            }],
        };
        let failure = quiet_pipeline(PipelineConfig::default())
            .detect(&[packet])
            .unwrap_err();

        assert_eq!(failure.stage, Stage::Preprocess);
        assert_eq!(
            failure.to_string(),
            "preprocess stage failed: Insufficient data: resample requires ≥2 samples for channel az, got 1"
        );
    }

    #[test]
    fn test_recording_shorter_than_a_window_has_nothing_to_summarize() {
        let packets: Vec<SensorPacket> = night().into_iter().take(10).collect();
        let failure = quiet_pipeline(PipelineConfig::default())
            .detect(&packets)
            .unwrap_err();

        assert_eq!(failure.stage, Stage::Metrics);
        assert!(matches!(failure.source, SleepError::EmptyInput(_)));
    }

    #[test]
    fn test_invalid_config_fails_before_any_stage() {
        let mut config = PipelineConfig::default();
        config.window.step_s = -5.0;
        let failure = quiet_pipeline(config).detect(&night()).unwrap_err();
        assert_eq!(failure.stage, Stage::Configure);
    }

    #[test]
    fn test_run_pipeline_writes_reports() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("night.jsonl");
        let lines: Vec<String> = night()
            .iter()
            .map(|p| serde_json::to_string(p).unwrap())
            .collect();
        fs::write(&input, lines.join("\n")).unwrap();

        let out_dir = dir.path().join("out");
        let output = run_pipeline(&input, &out_dir, &PipelineConfig::default(), None).unwrap();

        assert_eq!(output.periods.len(), 1);
        for file in [RESULTS_JSON, PERIODS_CSV, TIMELINE_CSV, HYPNOGRAM_TXT] {
            assert!(out_dir.join(file).exists(), "{file} missing");
        }
    }

    #[test]
    fn test_missing_input_fails_in_load_stage() {
        let dir = tempdir().unwrap();
        let failure = run_pipeline(
            &dir.path().join("absent.jsonl"),
            dir.path(),
            &PipelineConfig::default(),
            None,
        )
        .unwrap_err();
        assert_eq!(failure.stage, Stage::Load);
    }

    #[test]
    fn test_run_checks_config_before_loading() {
        let dir = tempdir().unwrap();
        let mut config = PipelineConfig::default();
        config.window.fs = 0;
        let failure = quiet_pipeline(config)
            .run(&dir.path().join("absent.jsonl"), dir.path())
            .unwrap_err();
        assert_eq!(failure.stage, Stage::Configure);
        assert!(matches!(failure.source, SleepError::Config(_)));
    }
}
