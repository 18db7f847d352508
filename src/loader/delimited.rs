//! CSV loader
//!
//! One row per sample. Columns naming the device, sampling rate and sensor are
//! required, as is a packet start column or a per-sample time column; every
//! other column is read as a numeric axis. Consecutive rows that share device,
//! start, rate and sensor form one packet.

use std::collections::BTreeMap;

use super::fields::{
    canonical_packet_field, is_sample_time_field, parse_timestamp, validate_rate, DEVICE_ID,
    SAMPLE_TIME, SAMPLING_RATE, SENSOR, TIMESTAMP_START,
};
use super::PacketLoader;
use crate::error::SleepError;
use crate::types::{RawSample, SensorKind, SensorPacket};

pub struct CsvLoader;

#[derive(Debug, Clone, PartialEq)]
enum Column {
    Device,
    Start,
    Rate,
    Sensor,
    Time,
    Axis(String),
}

impl Column {
    fn classify(header: &str) -> Self {
        if is_sample_time_field(header) {
            return Column::Time;
        }
        match canonical_packet_field(header) {
            Some(DEVICE_ID) => Column::Device,
            Some(TIMESTAMP_START) => Column::Start,
            Some(SAMPLING_RATE) => Column::Rate,
            Some(SENSOR) => Column::Sensor,
            _ => Column::Axis(header.trim().to_ascii_lowercase()),
        }
    }

    fn name(&self) -> &str {
        match self {
            Column::Device => DEVICE_ID,
            Column::Start => TIMESTAMP_START,
            Column::Rate => SAMPLING_RATE,
            Column::Sensor => SENSOR,
            Column::Time => SAMPLE_TIME,
            Column::Axis(name) => name,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct PacketKey {
    device_id: String,
    start: Option<i64>,
    rate: u32,
    sensor: SensorKind,
}

impl PacketLoader for CsvLoader {
    fn parse(&self, content: &str, origin: &str) -> Result<Vec<SensorPacket>, SleepError> {
        let mut reader = ::csv::ReaderBuilder::new()
            .trim(::csv::Trim::All)
            .from_reader(content.as_bytes());

        let headers = reader
            .headers()
            .map_err(|e| SleepError::Format(format!("{origin}: unreadable CSV header: {e}")))?
            .clone();
        let columns: Vec<Column> = headers.iter().map(Column::classify).collect();
        check_columns(&columns, origin)?;

        let mut packets: Vec<SensorPacket> = Vec::new();
        let mut current: Option<PacketKey> = None;

        for record in reader.records() {
            let record =
                record.map_err(|e| SleepError::Format(format!("{origin}: invalid CSV: {e}")))?;
            let line = record.position().map_or(0, |p| p.line());
            let row_origin = format!("{origin}:{line}");

            let mut device_id = None;
            let mut start = None;
            let mut rate = None;
            let mut sensor = None;
            let mut t = None;
            let mut axes = BTreeMap::new();

            for (column, cell) in columns.iter().zip(record.iter()) {
                if cell.is_empty() {
                    continue;
                }
                match column {
                    Column::Device => device_id = Some(cell.to_string()),
                    Column::Sensor => sensor = Some(SensorKind::parse(cell)),
                    Column::Start => start = Some(timestamp_cell(cell, column, &row_origin)?),
                    Column::Time => t = Some(timestamp_cell(cell, column, &row_origin)?),
                    Column::Rate => rate = Some(number_cell(cell, column, &row_origin)?),
                    Column::Axis(name) => {
                        axes.insert(name.clone(), number_cell(cell, column, &row_origin)?);
                    }
                }
            }

            let key = PacketKey {
                device_id: device_id.ok_or_else(|| missing_cell(DEVICE_ID, &row_origin))?,
                start,
                rate: validate_rate(
                    Some(rate.ok_or_else(|| missing_cell(SAMPLING_RATE, &row_origin))?),
                    &row_origin,
                )?,
                sensor: sensor.ok_or_else(|| missing_cell(SENSOR, &row_origin))?,
            };
            if key.start.is_none() && t.is_none() {
                return Err(SleepError::Schema(format!(
                    "{row_origin}: row needs a {TIMESTAMP_START} or a {SAMPLE_TIME} value"
                )));
            }

            let sample = RawSample { t, axes };
            if current.as_ref() == Some(&key) {
                if let Some(packet) = packets.last_mut() {
                    packet.samples.push(sample);
                    continue;
                }
            }
            packets.push(SensorPacket {
                device_id: key.device_id.clone(),
                // Without a start column every `t` is absolute; a zero start keeps
                // small values from being read as offsets twice
                timestamp_start: key.start.unwrap_or(0),
                sampling_rate: key.rate,
                sensor: key.sensor.clone(),
                samples: vec![sample],
            });
            current = Some(key);
        }

        Ok(packets)
    }
}

fn check_columns(columns: &[Column], origin: &str) -> Result<(), SleepError> {
    for (idx, column) in columns.iter().enumerate() {
        if columns[..idx].contains(column) {
            return Err(SleepError::Schema(format!(
                "{origin}: column {} given more than once",
                column.name()
            )));
        }
    }

    let required = [Column::Device, Column::Rate, Column::Sensor];
    let mut missing: Vec<&str> = required
        .iter()
        .filter(|c| !columns.contains(c))
        .map(|c| c.name())
        .collect();
    if !columns.contains(&Column::Start) && !columns.contains(&Column::Time) {
        missing.push("timestamp_start or t");
    }
    if !missing.is_empty() {
        return Err(SleepError::Schema(format!(
            "{origin}: missing required column(s) {}",
            missing.join(", ")
        )));
    }
    Ok(())
}

fn number_cell(cell: &str, column: &Column, origin: &str) -> Result<f64, SleepError> {
    cell.parse::<f64>().map_err(|_| {
        SleepError::Format(format!(
            "{origin}: column {} holds {cell:?}, expected a number",
            column.name()
        ))
    })
}

fn timestamp_cell(cell: &str, column: &Column, origin: &str) -> Result<i64, SleepError> {
    parse_timestamp(cell).ok_or_else(|| {
        SleepError::Format(format!(
            "{origin}: column {} holds {cell:?}, expected epoch milliseconds or RFC 3339",
            column.name()
        ))
    })
}

fn missing_cell(field: &str, origin: &str) -> SleepError {
    SleepError::Schema(format!("{origin}: empty {field} cell"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unpack::Unpacker;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_rows_group_into_packets() {
        let content = "\
device_id,start,rate,sensor,t,x,y,z
phone-01,1690000000000,50,accelerometer,1690000000000,0.01,-0.02,9.80
phone-01,1690000000000,50,accelerometer,1690000000020,0.02,-0.01,9.81
phone-01,1690000000000,50,gyroscope,1690000000000,0.001,0.0,
phone-01,1690000000040,50,accelerometer,1690000000040,0.00,0.00,9.79
";
        let packets = CsvLoader.parse(content, "night.csv").unwrap();

        assert_eq!(packets.len(), 3);
        assert_eq!(packets[0].samples.len(), 2);
        assert_eq!(packets[1].sensor, SensorKind::Gyroscope);
        assert!(!packets[1].samples[0].axes.contains_key("z"));
        assert_eq!(packets[2].timestamp_start, 1_690_000_000_040);
    }

    #[test]
    fn test_sample_times_without_start_column_are_absolute() {
        let content = "device,hz,kind,timestamp,x\nphone,10,acc,1000,0.5\nphone,10,acc,1100,0.6\n";
        let packets = CsvLoader.parse(content, "a.csv").unwrap();
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].timestamp_start, 0);
        assert_eq!(packets[0].samples[1].t, Some(1100));
    }

    #[test]
    fn test_alternating_sensors_keep_their_sample_times() {
        let content = "\
device_id,rate,sensor,t,x
phone,50,acc,1000,0.1
phone,50,gyro,1000,0.01
phone,50,acc,1020,0.2
phone,50,gyro,1020,0.02
";
        let packets = CsvLoader.parse(content, "a.csv").unwrap();
        assert_eq!(packets.len(), 4);

        let rows = Unpacker::unpack(&packets).unwrap();
        let times: Vec<i64> = rows.iter().map(|r| r.timestamp_ms()).collect();
        assert_eq!(times, vec![1000, 1020]);
    }

    #[test]
    fn test_missing_columns_are_schema_errors() {
        let err = CsvLoader.parse("device_id,x\nphone,1.0\n", "a.csv").unwrap_err();
        match err {
            SleepError::Schema(msg) => {
                assert!(msg.contains("sampling_rate"));
                assert!(msg.contains("sensor"));
            }
            other => panic!("expected schema error, got {other:?}"),
        }
    }

    #[test]
    fn test_non_numeric_axis_is_format_error() {
        let content = "device_id,rate,sensor,t,x\nphone,50,acc,1000,abc\n";
        match CsvLoader.parse(content, "a.csv").unwrap_err() {
            SleepError::Format(msg) => assert!(msg.starts_with("a.csv:2"), "{msg}"),
            other => panic!("expected format error, got {other:?}"),
        }
    }

    #[test]
    fn test_ragged_rows_are_format_errors() {
        let content = "device_id,rate,sensor,t,x\nphone,50,acc,1000\n";
        assert!(matches!(
            CsvLoader.parse(content, "a.csv"),
            Err(SleepError::Format(_))
        ));
    }
}
