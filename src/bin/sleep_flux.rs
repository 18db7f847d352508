//! Sleep Flux CLI - Command-line interface for Sleep Flux
//!
//! Commands:
//! - detect: Run the full pipeline and write results to an output directory
//! - validate: Check that input files load and unpack cleanly
//! - config: Print the effective configuration as JSON

use clap::{Parser, Subcommand, ValueEnum};
use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use sleep_flux::config::ClassifierKind;
use sleep_flux::report::PeriodRecord;
use sleep_flux::unpack::Unpacker;
use sleep_flux::{
    load_path, InputFormat, PipelineConfig, PipelineOutput, SleepError, SleepMetrics,
    SleepPipeline, StageFailure, PRODUCER_NAME, SLEEP_FLUX_VERSION,
};

/// Sleep Flux - Deterministic sleep detection from phone sensor recordings
#[derive(Parser)]
#[command(name = "sleep-flux")]
#[command(version = SLEEP_FLUX_VERSION)]
#[command(about = "Detect sleep periods in phone accelerometer and gyroscope data", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Detect sleep periods and write results to an output directory
    Detect {
        /// Input file or directory of packet files
        #[arg(short, long)]
        input: PathBuf,

        /// Directory receiving results, periods and timeline
        #[arg(short, long)]
        output_dir: PathBuf,

        /// JSON configuration file; flags below override its values
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Force an input format instead of detecting it from extensions
        #[arg(long, value_parser = parse_input_format)]
        input_format: Option<InputFormat>,

        /// Window length in seconds
        #[arg(long)]
        window_s: Option<f64>,

        /// Step between window starts in seconds
        #[arg(long)]
        step_s: Option<f64>,

        /// Resampling rate in Hz
        #[arg(long)]
        fs: Option<u32>,

        /// Window classifier
        #[arg(long, value_enum)]
        classifier: Option<ClassifierArg>,

        /// Heuristic cutoff as feature=value (repeatable; replaces the defaults)
        #[arg(long = "threshold", value_parser = parse_threshold)]
        thresholds: Vec<(String, f64)>,

        /// Consecutive windows needed to change label
        #[arg(long)]
        hysteresis: Option<usize>,

        /// Minimum sleep period duration in seconds
        #[arg(long)]
        min_duration_s: Option<f64>,

        /// What to print on stdout once the run finishes
        #[arg(long, value_enum, default_value = "summary")]
        print: PrintFormat,
    },

    /// Check that input loads and unpacks into one ordered series
    Validate {
        /// Input file or directory of packet files
        #[arg(short, long)]
        input: PathBuf,

        /// Force an input format instead of detecting it from extensions
        #[arg(long, value_parser = parse_input_format)]
        input_format: Option<InputFormat>,

        /// Output validation report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the configuration as JSON (defaults unless a file is given)
    Config {
        /// Configuration file to validate and print
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ClassifierArg {
    /// Activity thresholds with hysteresis
    Heuristic,
    /// Scoring model from the configuration
    Model,
}

#[derive(Clone, Copy, ValueEnum)]
enum PrintFormat {
    /// Human-readable summary
    Summary,
    /// Periods and metrics as one JSON line
    Json,
    /// Pretty-printed JSON
    JsonPretty,
    /// Print nothing
    None,
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e))
                    .unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), SleepCliError> {
    match cli.command {
        Commands::Detect {
            input,
            output_dir,
            config,
            input_format,
            window_s,
            step_s,
            fs,
            classifier,
            thresholds,
            hysteresis,
            min_duration_s,
            print,
        } => {
            let mut config = load_config(config.as_deref())?;
            if input_format.is_some() {
                config.input_format = input_format;
            }
            if let Some(window_s) = window_s {
                config.window.window_s = window_s;
            }
            if let Some(step_s) = step_s {
                config.window.step_s = step_s;
            }
            if let Some(fs) = fs {
                config.window.fs = fs;
            }
            if let Some(classifier) = classifier {
                config.classifier.kind = match classifier {
                    ClassifierArg::Heuristic => ClassifierKind::Heuristic,
                    ClassifierArg::Model => ClassifierKind::Model,
                };
            }
            if !thresholds.is_empty() {
                config.classifier.thresholds = thresholds.into_iter().collect();
            }
            if let Some(hysteresis) = hysteresis {
                config.classifier.hysteresis = hysteresis;
            }
            if let Some(min_duration_s) = min_duration_s {
                config.aggregation.min_duration_s = min_duration_s;
            }
            cmd_detect(&input, &output_dir, config, print)
        }

        Commands::Validate {
            input,
            input_format,
            json,
        } => cmd_validate(&input, input_format, json),

        Commands::Config { config } => {
            let config = load_config(config.as_deref())?;
            println!("{}", config.to_json_pretty()?);
            Ok(())
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<PipelineConfig, SleepCliError> {
    match path {
        Some(path) => Ok(PipelineConfig::from_json_file(path)?),
        None => Ok(PipelineConfig::default()),
    }
}

fn cmd_detect(
    input: &Path,
    output_dir: &Path,
    config: PipelineConfig,
    print: PrintFormat,
) -> Result<(), SleepCliError> {
    let output = SleepPipeline::new(config).run(input, output_dir)?;

    match print {
        PrintFormat::Summary => print_summary(&output, output_dir),
        PrintFormat::Json => println!("{}", serde_json::to_string(&DetectReport::from(&output))?),
        PrintFormat::JsonPretty => {
            println!("{}", serde_json::to_string_pretty(&DetectReport::from(&output))?)
        }
        PrintFormat::None => {}
    }
    Ok(())
}

fn print_summary(output: &PipelineOutput, output_dir: &Path) {
    let metrics = &output.metrics;
    println!("Sleep Detection Report");
    println!("======================");
    println!("Windows:          {}", output.predictions.len());
    println!("Sleep periods:    {}", metrics.period_count);
    println!("Total sleep:      {}", format_duration(metrics.total_sleep_s));
    println!("Onset latency:    {}", format_duration(metrics.sleep_onset_latency_s));
    println!("Efficiency:       {:.1}%", metrics.sleep_efficiency * 100.0);
    println!("Awakenings:       {}", metrics.awakenings);

    if !output.periods.is_empty() {
        println!("\nPeriods:");
        for period in &output.periods {
            println!(
                "  - {} -> {} ({})",
                period.start.to_rfc3339(),
                period.end.to_rfc3339(),
                format_duration(period.duration_s())
            );
        }
    }
    println!("\nResults written to {}", output_dir.display());
}

fn format_duration(seconds: f64) -> String {
    let total = seconds.round() as i64;
    format!("{}h {:02}m {:02}s", total / 3600, (total % 3600) / 60, total % 60)
}

fn cmd_validate(
    input: &Path,
    input_format: Option<InputFormat>,
    json: bool,
) -> Result<(), SleepCliError> {
    let packets = load_path(input, input_format)?;
    let rows = Unpacker::unpack(&packets)?;

    let mut samples_per_sensor: BTreeMap<String, usize> = BTreeMap::new();
    let mut devices = BTreeSet::new();
    for packet in &packets {
        *samples_per_sensor
            .entry(packet.sensor.as_str().to_string())
            .or_default() += packet.samples.len();
        devices.insert(packet.device_id.clone());
    }

    let report = ValidationReport {
        packets: packets.len(),
        rows: rows.len(),
        devices: devices.into_iter().collect(),
        samples_per_sensor,
        first_timestamp: rows.first().map(|r| r.timestamp.to_rfc3339()),
        last_timestamp: rows.last().map(|r| r.timestamp.to_rfc3339()),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Validation Report");
        println!("=================");
        println!("Packets:   {}", report.packets);
        println!("Rows:      {}", report.rows);
        println!("Devices:   {}", report.devices.join(", "));
        println!(
            "Range:     {} -> {}",
            report.first_timestamp.as_deref().unwrap_or("-"),
            report.last_timestamp.as_deref().unwrap_or("-")
        );
        println!("\nSamples per sensor:");
        for (sensor, count) in &report.samples_per_sensor {
            println!("  - {sensor}: {count}");
        }
    }

    if report.rows == 0 {
        Err(SleepCliError::NoSamples)
    } else {
        Ok(())
    }
}

fn parse_input_format(name: &str) -> Result<InputFormat, String> {
    name.parse().map_err(|e: SleepError| e.to_string())
}

fn parse_threshold(arg: &str) -> Result<(String, f64), String> {
    let (name, value) = arg
        .split_once('=')
        .ok_or_else(|| format!("expected feature=value, got {arg:?}"))?;
    let value: f64 = value
        .trim()
        .parse()
        .map_err(|_| format!("threshold for {name} is not a number: {value:?}"))?;
    Ok((name.trim().to_string(), value))
}

// Error types

#[derive(Debug)]
enum SleepCliError {
    Io(io::Error),
    Json(serde_json::Error),
    Sleep(SleepError),
    Stage(StageFailure),
    NoSamples,
}

impl From<io::Error> for SleepCliError {
    fn from(e: io::Error) -> Self {
        SleepCliError::Io(e)
    }
}

impl From<serde_json::Error> for SleepCliError {
    fn from(e: serde_json::Error) -> Self {
        SleepCliError::Json(e)
    }
}

impl From<SleepError> for SleepCliError {
    fn from(e: SleepError) -> Self {
        SleepCliError::Sleep(e)
    }
}

impl From<StageFailure> for SleepCliError {
    fn from(e: StageFailure) -> Self {
        SleepCliError::Stage(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    stage: Option<String>,
    hint: Option<String>,
}

impl From<SleepCliError> for CliError {
    fn from(e: SleepCliError) -> Self {
        match e {
            SleepCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                stage: None,
                hint: Some("Check file paths and permissions".to_string()),
            },
            SleepCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                stage: None,
                hint: None,
            },
            SleepCliError::Sleep(e) => CliError {
                code: e.code().to_string(),
                hint: hint_for(&e),
                message: e.to_string(),
                stage: None,
            },
            SleepCliError::Stage(failure) => CliError {
                code: failure.source.code().to_string(),
                hint: hint_for(&failure.source),
                message: failure.to_string(),
                stage: Some(failure.stage.to_string()),
            },
            SleepCliError::NoSamples => CliError {
                code: "NO_SAMPLES".to_string(),
                message: "Input contains no samples".to_string(),
                stage: None,
                hint: Some("Ensure packets carry non-empty sample lists".to_string()),
            },
        }
    }
}

fn hint_for(error: &SleepError) -> Option<String> {
    let hint = match error {
        SleepError::Format(_) | SleepError::Schema(_) => {
            "Run 'sleep-flux validate' to check the input files"
        }
        SleepError::Config(_) => "Run 'sleep-flux config' to see the expected configuration",
        SleepError::InsufficientData(_) | SleepError::EmptyInput(_) => {
            "The recording may be shorter than one window"
        }
        SleepError::ModelUnavailable(_) => {
            "Add a classifier.logistic section to the configuration or use --classifier heuristic"
        }
        SleepError::Io(_) => "Check file paths and permissions",
        _ => return None,
    };
    Some(hint.to_string())
}

// Report types

#[derive(serde::Serialize)]
struct DetectReport<'a> {
    producer: &'static str,
    version: &'static str,
    periods: Vec<PeriodRecord>,
    metrics: &'a SleepMetrics,
}

impl<'a> From<&'a PipelineOutput> for DetectReport<'a> {
    fn from(output: &'a PipelineOutput) -> Self {
        Self {
            producer: PRODUCER_NAME,
            version: SLEEP_FLUX_VERSION,
            periods: output.periods.iter().map(PeriodRecord::from).collect(),
            metrics: &output.metrics,
        }
    }
}

#[derive(serde::Serialize)]
struct ValidationReport {
    packets: usize,
    rows: usize,
    devices: Vec<String>,
    samples_per_sensor: BTreeMap<String, usize>,
    first_timestamp: Option<String>,
    last_timestamp: Option<String>,
}
