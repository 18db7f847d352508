//! Field-name normalization shared by every input format
//!
//! Phones and export tools disagree on key names (`rate` vs `sampling_rate`,
//! `device` vs `device_id`, ...). Every loader maps its keys through these
//! tables before building a [`SensorPacket`].

use chrono::DateTime;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::error::SleepError;
use crate::types::{RawSample, SensorKind, SensorPacket};

pub const DEVICE_ID: &str = "device_id";
pub const TIMESTAMP_START: &str = "timestamp_start";
pub const SAMPLING_RATE: &str = "sampling_rate";
pub const SENSOR: &str = "sensor";
pub const SAMPLES: &str = "samples";
pub const SAMPLE_TIME: &str = "t";

/// Keys every JSON packet must carry (after normalization)
pub const REQUIRED_PACKET_FIELDS: [&str; 5] =
    [DEVICE_ID, TIMESTAMP_START, SAMPLING_RATE, SENSOR, SAMPLES];

const PACKET_FIELD_ALIASES: &[(&str, &[&str])] = &[
    (DEVICE_ID, &["device_id", "device", "deviceid", "device_name"]),
    (
        TIMESTAMP_START,
        &[
            "timestamp_start",
            "timestampstart",
            "start",
            "start_ts",
            "ts_start",
            "start_time",
            "timestamp",
        ],
    ),
    (
        SAMPLING_RATE,
        &["sampling_rate", "samplingrate", "rate", "fs", "hz", "sample_rate"],
    ),
    (SENSOR, &["sensor", "sensor_kind", "sensor_type", "kind", "type"]),
    (SAMPLES, &["samples", "data", "values"]),
];

const SAMPLE_TIME_ALIASES: &[&str] = &["t", "ts", "time", "timestamp"];

fn fold(key: &str) -> String {
    key.trim().to_ascii_lowercase().replace(['-', ' '], "_")
}

/// Canonical name of a packet-level key, if it is a known variant
pub fn canonical_packet_field(key: &str) -> Option<&'static str> {
    let folded = fold(key);
    PACKET_FIELD_ALIASES
        .iter()
        .find(|(_, aliases)| aliases.contains(&folded.as_str()))
        .map(|(canonical, _)| *canonical)
}

/// Whether a sample-level key names the sample timestamp
pub fn is_sample_time_field(key: &str) -> bool {
    SAMPLE_TIME_ALIASES.contains(&fold(key).as_str())
}

/// Build a packet from one decoded JSON value
pub fn packet_from_json(value: Value, origin: &str) -> Result<SensorPacket, SleepError> {
    let Value::Object(object) = value else {
        return Err(SleepError::Format(format!(
            "{origin}: expected a JSON object for a packet, got {}",
            json_type_name(&value)
        )));
    };

    let mut fields: Map<String, Value> = Map::new();
    for (key, value) in object {
        let name = match canonical_packet_field(&key) {
            Some(canonical) => canonical.to_string(),
            None => {
                log::debug!("{origin}: ignoring unknown packet field {key:?}");
                continue;
            }
        };
        if fields.contains_key(&name) {
            return Err(SleepError::Schema(format!(
                "{origin}: field {name} given more than once (last as {key:?})"
            )));
        }
        fields.insert(name, value);
    }

    let missing: Vec<&str> = REQUIRED_PACKET_FIELDS
        .iter()
        .copied()
        .filter(|f| fields.get(*f).map_or(true, Value::is_null))
        .collect();
    if !missing.is_empty() {
        return Err(SleepError::Schema(format!(
            "{origin}: missing required field(s) {}",
            missing.join(", ")
        )));
    }

    let device_id = match &fields[DEVICE_ID] {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        other => {
            return Err(SleepError::Schema(format!(
                "{origin}: {DEVICE_ID} must be a string, got {}",
                json_type_name(other)
            )))
        }
    };
    let timestamp_start = timestamp_from_json(&fields[TIMESTAMP_START], TIMESTAMP_START, origin)?;
    let sampling_rate = rate_from_json(&fields[SAMPLING_RATE], origin)?;
    let sensor = match &fields[SENSOR] {
        Value::String(s) if !s.trim().is_empty() => SensorKind::parse(s),
        other => {
            return Err(SleepError::Schema(format!(
                "{origin}: {SENSOR} must be a non-empty string, got {}",
                json_type_name(other)
            )))
        }
    };

    let Value::Array(raw_samples) = &fields[SAMPLES] else {
        return Err(SleepError::Schema(format!(
            "{origin}: {SAMPLES} must be an array, got {}",
            json_type_name(&fields[SAMPLES])
        )));
    };
    let samples = raw_samples
        .iter()
        .enumerate()
        .map(|(idx, s)| sample_from_json(s, &format!("{origin} sample {idx}")))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(SensorPacket {
        device_id,
        timestamp_start,
        sampling_rate,
        sensor,
        samples,
    })
}

fn sample_from_json(value: &Value, origin: &str) -> Result<RawSample, SleepError> {
    let Value::Object(object) = value else {
        return Err(SleepError::Schema(format!(
            "{origin}: expected an object, got {}",
            json_type_name(value)
        )));
    };

    let mut t = None;
    let mut axes = BTreeMap::new();
    for (key, value) in object {
        if is_sample_time_field(key) {
            if t.is_some() {
                return Err(SleepError::Schema(format!(
                    "{origin}: sample timestamp given more than once"
                )));
            }
            t = Some(timestamp_from_json(value, key, origin)?);
            continue;
        }
        match value {
            Value::Number(n) => {
                let v = n.as_f64().ok_or_else(|| {
                    SleepError::Schema(format!("{origin}: axis {key} is not representable"))
                })?;
                axes.insert(fold(key), v);
            }
            Value::Null => {}
            other => {
                return Err(SleepError::Schema(format!(
                    "{origin}: axis {key} must be numeric, got {}",
                    json_type_name(other)
                )))
            }
        }
    }

    Ok(RawSample { t, axes })
}

/// Epoch milliseconds from an integer, a float or an RFC 3339 string
fn timestamp_from_json(value: &Value, field: &str, origin: &str) -> Result<i64, SleepError> {
    match value {
        Value::Number(n) => {
            if let Some(ms) = n.as_i64() {
                Ok(ms)
            } else if let Some(ms) = n.as_f64().filter(|v| v.is_finite()) {
                Ok(ms.round() as i64)
            } else {
                Err(SleepError::Schema(format!(
                    "{origin}: {field} is not a valid timestamp"
                )))
            }
        }
        Value::String(s) => parse_timestamp(s).ok_or_else(|| {
            SleepError::Schema(format!(
                "{origin}: {field} {s:?} is neither epoch milliseconds nor RFC 3339"
            ))
        }),
        other => Err(SleepError::Schema(format!(
            "{origin}: {field} must be a timestamp, got {}",
            json_type_name(other)
        ))),
    }
}

fn rate_from_json(value: &Value, origin: &str) -> Result<u32, SleepError> {
    let rate = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    validate_rate(rate, origin)
}

/// Parse a textual timestamp: epoch milliseconds or RFC 3339
pub fn parse_timestamp(text: &str) -> Option<i64> {
    let text = text.trim();
    if let Ok(ms) = text.parse::<i64>() {
        return Some(ms);
    }
    if let Ok(ms) = text.parse::<f64>() {
        return ms.is_finite().then(|| ms.round() as i64);
    }
    DateTime::parse_from_rfc3339(text)
        .ok()
        .map(|dt| dt.timestamp_millis())
}

/// Sampling rates must be positive whole hertz
pub fn validate_rate(rate: Option<f64>, origin: &str) -> Result<u32, SleepError> {
    match rate {
        Some(r) if r.is_finite() && r >= 1.0 && r.fract() == 0.0 && r <= u32::MAX as f64 => {
            Ok(r as u32)
        }
        Some(r) => Err(SleepError::Schema(format!(
            "{origin}: {SAMPLING_RATE} must be a positive integer (Hz), got {r}"
        ))),
        None => Err(SleepError::Schema(format!(
            "{origin}: {SAMPLING_RATE} must be a positive integer (Hz)"
        ))),
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_canonical_packet_field_variants() {
        assert_eq!(canonical_packet_field("rate"), Some(SAMPLING_RATE));
        assert_eq!(canonical_packet_field("Sampling-Rate"), Some(SAMPLING_RATE));
        assert_eq!(canonical_packet_field("deviceId"), Some(DEVICE_ID));
        assert_eq!(canonical_packet_field("timestamp"), Some(TIMESTAMP_START));
        assert_eq!(canonical_packet_field("battery"), None);
        assert!(is_sample_time_field("ts"));
        assert!(!is_sample_time_field("x"));
    }

    #[test]
    fn test_packet_from_json_normalizes_names() {
        let packet = packet_from_json(
            json!({
                "device": "phone-01",
                "start": 1690000000000_i64,
                "rate": 50,
                "kind": "acc",
                "data": [{"ts": 1690000000001_i64, "x": 0.01, "y": -0.02, "z": 9.8}]
            }),
            "line 1",
        )
        .unwrap();

        assert_eq!(packet.device_id, "phone-01");
        assert_eq!(packet.timestamp_start, 1_690_000_000_000);
        assert_eq!(packet.sampling_rate, 50);
        assert_eq!(packet.sensor, SensorKind::Accelerometer);
        assert_eq!(packet.samples[0].t, Some(1_690_000_000_001));
        assert_eq!(packet.samples[0].axes["z"], 9.8);
    }

    #[test]
    fn test_missing_fields_are_schema_errors() {
        let err = packet_from_json(json!({"device_id": "p", "sensor": "acc", "samples": []}), "line 3")
            .unwrap_err();
        match err {
            SleepError::Schema(msg) => {
                assert!(msg.contains("timestamp_start"));
                assert!(msg.contains("sampling_rate"));
                assert!(msg.starts_with("line 3"));
            }
            other => panic!("expected schema error, got {other:?}"),
        }
    }

    #[test]
    fn test_zero_rate_is_schema_error() {
        let err = packet_from_json(
            json!({"device_id": "p", "timestamp_start": 0, "sampling_rate": 0, "sensor": "acc", "samples": []}),
            "line 1",
        )
        .unwrap_err();
        assert!(matches!(err, SleepError::Schema(_)));
    }

    #[test]
    fn test_duplicate_alias_is_schema_error() {
        let err = packet_from_json(
            json!({"device_id": "p", "timestamp_start": 0, "rate": 50, "fs": 50, "sensor": "acc", "samples": []}),
            "line 1",
        )
        .unwrap_err();
        assert!(matches!(err, SleepError::Schema(_)));
    }

    #[test]
    fn test_non_object_is_format_error() {
        let err = packet_from_json(json!([1, 2, 3]), "line 1").unwrap_err();
        assert!(matches!(err, SleepError::Format(_)));
    }

    #[test]
    fn test_rfc3339_start_is_accepted() {
        assert_eq!(parse_timestamp("1970-01-01T00:00:01Z"), Some(1000));
        assert_eq!(parse_timestamp("1690000000000"), Some(1_690_000_000_000));
        assert_eq!(parse_timestamp("yesterday"), None);
    }
}
