//! Packet loaders
//!
//! This module turns raw files (JSON Lines, JSON or CSV) into structured
//! [`SensorPacket`]s. Field-name variants are normalized to canonical names;
//! no device or network access happens here, only bounded file reads.

mod delimited;
pub mod fields;
mod json;

pub use delimited::CsvLoader;
pub use json::{JsonArrayLoader, JsonLinesLoader};

use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use crate::error::SleepError;
use crate::types::SensorPacket;

/// Files larger than this are rejected instead of being read into memory
pub const MAX_INPUT_BYTES: u64 = 256 * 1024 * 1024;

/// Trait for input format parsers
pub trait PacketLoader {
    /// Parse file content into packets; `origin` names the source in errors
    fn parse(&self, content: &str, origin: &str) -> Result<Vec<SensorPacket>, SleepError>;
}

/// Supported input formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputFormat {
    /// One packet per line
    #[serde(alias = "jsonl", alias = "ndjson")]
    JsonLines,
    /// A JSON array of packets (or one packet object)
    Json,
    /// One sample per row
    Csv,
}

impl InputFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            InputFormat::JsonLines => "json_lines",
            InputFormat::Json => "json",
            InputFormat::Csv => "csv",
        }
    }

    /// Detect the format from a file extension
    pub fn detect(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "jsonl" | "ndjson" => Some(InputFormat::JsonLines),
            "json" => Some(InputFormat::Json),
            "csv" => Some(InputFormat::Csv),
            _ => None,
        }
    }

    /// Parse a format name (`jsonl`, `ndjson`, `json_lines`, `json`, `csv`)
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "jsonl" | "ndjson" | "json_lines" => Some(InputFormat::JsonLines),
            "json" => Some(InputFormat::Json),
            "csv" => Some(InputFormat::Csv),
            _ => None,
        }
    }

    pub fn loader(&self) -> &'static dyn PacketLoader {
        match self {
            InputFormat::JsonLines => &JsonLinesLoader,
            InputFormat::Json => &JsonArrayLoader,
            InputFormat::Csv => &CsvLoader,
        }
    }
}

impl std::str::FromStr for InputFormat {
    type Err = SleepError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_name(s).ok_or_else(|| {
            SleepError::Config(format!(
                "unknown input format {s:?}; expected jsonl, json or csv"
            ))
        })
    }
}

/// Parse in-memory content of a known format
pub fn parse_str(
    content: &str,
    format: InputFormat,
    origin: &str,
) -> Result<Vec<SensorPacket>, SleepError> {
    format.loader().parse(content, origin)
}

/// Load packets from a file or from every input file in a directory.
///
/// The format is detected from each file's extension unless `format` forces
/// one. In a directory, auto-detection skips files with unknown extensions
/// while a forced format applies to every regular, non-hidden file. Files are
/// read in lexicographic order.
pub fn load_path(path: &Path, format: Option<InputFormat>) -> Result<Vec<SensorPacket>, SleepError> {
    if !path.is_dir() {
        let format = format.or_else(|| InputFormat::detect(path)).ok_or_else(|| {
            SleepError::Format(format!(
                "cannot detect the format of {}; expected .jsonl, .ndjson, .json or .csv",
                path.display()
            ))
        })?;
        return load_file(path, format);
    }

    let mut files: Vec<PathBuf> = fs::read_dir(path)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file())
        .filter(|p| {
            !p.file_name()
                .and_then(|n| n.to_str())
                .map_or(true, |n| n.starts_with('.'))
        })
        .collect();
    files.sort();

    let mut packets = Vec::new();
    let mut loaded = 0;
    for file in files {
        let Some(file_format) = format.or_else(|| InputFormat::detect(&file)) else {
            log::warn!("skipping {}: unknown input format", file.display());
            continue;
        };
        packets.extend(load_file(&file, file_format)?);
        loaded += 1;
    }

    if loaded == 0 {
        return Err(SleepError::Format(format!(
            "no input files found in {}",
            path.display()
        )));
    }
    log::debug!("loaded {} packets from {loaded} files", packets.len());
    Ok(packets)
}

fn load_file(path: &Path, format: InputFormat) -> Result<Vec<SensorPacket>, SleepError> {
    let content = read_bounded(path)?;
    let packets = parse_str(&content, format, &path.display().to_string())?;
    log::debug!(
        "{}: {} packets ({})",
        path.display(),
        packets.len(),
        format.as_str()
    );
    Ok(packets)
}

fn read_bounded(path: &Path) -> Result<String, SleepError> {
    let file = fs::File::open(path)?;
    let size = file.metadata()?.len();
    if size > MAX_INPUT_BYTES {
        return Err(SleepError::Format(format!(
            "{} is {size} bytes, above the {MAX_INPUT_BYTES} byte input limit",
            path.display()
        )));
    }

    let mut content = String::with_capacity(size as usize);
    file.take(MAX_INPUT_BYTES)
        .read_to_string(&mut content)
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::InvalidData => {
                SleepError::Format(format!("{} is not valid UTF-8 text", path.display()))
            }
            _ => SleepError::Io(e),
        })?;
    Ok(content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    const JSONL: &str = r#"{"device_id": "phone-01", "timestamp_start": 1690000000000, "sampling_rate": 50, "sensor": "accelerometer", "samples": [{"t": 1690000000000, "x": 0.0, "y": 0.0, "z": 9.8}]}"#;

    const CSV: &str = "device_id,sampling_rate,sensor,t,x,y,z\nphone-01,50,gyroscope,1690000000000,0.0,0.0,0.0\n";

    #[test]
    fn test_detect_from_extension() {
        assert_eq!(InputFormat::detect(Path::new("a.JSONL")), Some(InputFormat::JsonLines));
        assert_eq!(InputFormat::detect(Path::new("a.ndjson")), Some(InputFormat::JsonLines));
        assert_eq!(InputFormat::detect(Path::new("a.json")), Some(InputFormat::Json));
        assert_eq!(InputFormat::detect(Path::new("a.csv")), Some(InputFormat::Csv));
        assert_eq!(InputFormat::detect(Path::new("a.txt")), None);
    }

    #[test]
    fn test_format_names_deserialize_with_aliases() {
        let format: InputFormat = serde_json::from_str("\"ndjson\"").unwrap();
        assert_eq!(format, InputFormat::JsonLines);
        let format: InputFormat = serde_json::from_str("\"csv\"").unwrap();
        assert_eq!(format, InputFormat::Csv);
        assert_eq!("JSON-Lines".parse::<InputFormat>().unwrap(), InputFormat::JsonLines);
        assert!("xml".parse::<InputFormat>().is_err());
    }

    #[test]
    fn test_load_single_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("night.jsonl");
        fs::write(&path, JSONL).unwrap();

        let packets = load_path(&path, None).unwrap();
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].device_id, "phone-01");
    }

    #[test]
    fn test_load_directory_in_name_order() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("b.csv"), CSV).unwrap();
        fs::write(dir.path().join("a.jsonl"), JSONL).unwrap();
        fs::write(dir.path().join("notes.txt"), "not sensor data").unwrap();

        let packets = load_path(dir.path(), None).unwrap();
        assert_eq!(packets.len(), 2);
        assert_eq!(packets[0].sensor.as_str(), "accelerometer");
        assert_eq!(packets[1].sensor.as_str(), "gyroscope");
    }

    #[test]
    fn test_forced_format_overrides_extension() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("export.txt");
        fs::write(&path, CSV).unwrap();

        assert!(matches!(load_path(&path, None), Err(SleepError::Format(_))));
        assert_eq!(load_path(&path, Some(InputFormat::Csv)).unwrap().len(), 1);
    }

    #[test]
    fn test_empty_directory_is_format_error() {
        let dir = tempdir().unwrap();
        assert!(matches!(load_path(dir.path(), None), Err(SleepError::Format(_))));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = tempdir().unwrap();
        let result = load_path(&dir.path().join("absent.jsonl"), None);
        assert!(matches!(result, Err(SleepError::Io(_))));
    }
}
