//! JSON Lines and JSON array loaders

use serde_json::Value;

use super::fields::packet_from_json;
use super::PacketLoader;
use crate::error::SleepError;
use crate::types::SensorPacket;

/// One packet per line; blank lines are skipped
pub struct JsonLinesLoader;

impl PacketLoader for JsonLinesLoader {
    fn parse(&self, content: &str, origin: &str) -> Result<Vec<SensorPacket>, SleepError> {
        let mut packets = Vec::new();
        for (line_num, line) in content.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let line_origin = format!("{origin}:{}", line_num + 1);
            let value: Value = serde_json::from_str(trimmed).map_err(|e| {
                SleepError::Format(format!("{line_origin}: invalid JSON: {e}"))
            })?;
            packets.push(packet_from_json(value, &line_origin)?);
        }
        Ok(packets)
    }
}

/// A whole-file JSON array of packets, or a single packet object
pub struct JsonArrayLoader;

impl PacketLoader for JsonArrayLoader {
    fn parse(&self, content: &str, origin: &str) -> Result<Vec<SensorPacket>, SleepError> {
        let value: Value = serde_json::from_str(content)
            .map_err(|e| SleepError::Format(format!("{origin}: invalid JSON: {e}")))?;

        match value {
            Value::Array(items) => items
                .into_iter()
                .enumerate()
                .map(|(idx, item)| packet_from_json(item, &format!("{origin}[{idx}]")))
                .collect(),
            object @ Value::Object(_) => Ok(vec![packet_from_json(object, origin)?]),
            _ => Err(SleepError::Format(format!(
                "{origin}: expected a packet object or an array of packets"
            ))),
        }
    }
}
