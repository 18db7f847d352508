//! Time-series unpacker
//!
//! Flattens sensor packets into one chronologically sorted table with a single
//! row per distinct millisecond. Packets whose time ranges overlap are merged
//! channel by channel.

use chrono::DateTime;
use std::collections::BTreeMap;

use crate::error::SleepError;
use crate::types::{Channel, SampleRow, SensorPacket};

/// How far (ms) a sample may step backwards before the packet is rejected
pub const TIME_ORDER_TOLERANCE_MS: i64 = 2;

/// Sample times below this (ms) are offsets from the packet start
pub const RELATIVE_TIME_LIMIT_MS: i64 = 100_000_000_000;

/// Unpacker for converting packets into a unified sample table
pub struct Unpacker;

impl Unpacker {
    /// Unpack packets into a sorted, merged row sequence
    pub fn unpack(packets: &[SensorPacket]) -> Result<Vec<SampleRow>, SleepError> {
        let total: usize = packets.iter().map(|p| p.samples.len()).sum();
        let mut rows = Vec::with_capacity(total);

        for (packet_idx, packet) in packets.iter().enumerate() {
            if packet.sampling_rate == 0 {
                return Err(SleepError::Schema(format!(
                    "packet {packet_idx} from {} has sampling_rate 0",
                    packet.device_id
                )));
            }

            let mut latest: Option<i64> = None;
            for (idx, sample) in packet.samples.iter().enumerate() {
                let ms = sample_time_ms(packet, idx, sample.t).ok_or_else(|| {
                    SleepError::Schema(format!(
                        "packet {packet_idx} sample {idx}: timestamp out of range"
                    ))
                })?;

                if let Some(prev) = latest {
                    if ms < prev - TIME_ORDER_TOLERANCE_MS {
                        return Err(SleepError::TimeOrder(format!(
                            "packet {packet_idx} ({} {}) sample {idx} at {ms} ms is {} ms before the previous sample",
                            packet.device_id,
                            packet.sensor,
                            prev - ms
                        )));
                    }
                    if ms < prev {
                        log::warn!(
                            "packet {packet_idx} sample {idx}: {} ms clock jitter tolerated",
                            prev - ms
                        );
                    }
                }
                latest = Some(latest.map_or(ms, |prev| prev.max(ms)));

                let timestamp = DateTime::from_timestamp_millis(ms).ok_or_else(|| {
                    SleepError::Schema(format!(
                        "packet {packet_idx} sample {idx}: {ms} ms is not a representable time"
                    ))
                })?;

                let mut values = BTreeMap::new();
                for (axis, value) in &sample.axes {
                    if !value.is_finite() {
                        log::warn!(
                            "packet {packet_idx} sample {idx}: non-finite {axis} treated as missing"
                        );
                        continue;
                    }
                    values.insert(Channel::new(packet.sensor.clone(), axis.as_str()), *value);
                }

                rows.push(SampleRow {
                    timestamp,
                    sensors: vec![packet.sensor.clone()],
                    values,
                });
            }
        }

        let merged = Self::merge_rows(rows);
        log::debug!(
            "unpacked {} packets ({total} samples) into {} rows",
            packets.len(),
            merged.len()
        );
        Ok(merged)
    }

    /// Sort rows by timestamp and merge rows sharing a timestamp.
    ///
    /// A channel given by several rows at the same instant takes the mean of
    /// their values. Applying this to already merged rows returns them unchanged.
    pub fn merge_rows(mut rows: Vec<SampleRow>) -> Vec<SampleRow> {
        rows.sort_by_key(|row| row.timestamp);

        let mut merged: Vec<SampleRow> = Vec::with_capacity(rows.len());
        let mut iter = rows.into_iter().peekable();
        while let Some(first) = iter.next() {
            if iter.peek().map_or(true, |next| next.timestamp != first.timestamp) {
                merged.push(first);
                continue;
            }

            let timestamp = first.timestamp;
            let mut sensors = first.sensors;
            let mut sums: BTreeMap<Channel, (f64, u32)> = first
                .values
                .into_iter()
                .map(|(channel, value)| (channel, (value, 1)))
                .collect();

            while let Some(row) = iter.next_if(|row| row.timestamp == timestamp) {
                sensors.extend(row.sensors);
                for (channel, value) in row.values {
                    let entry = sums.entry(channel).or_insert((0.0, 0));
                    entry.0 += value;
                    entry.1 += 1;
                }
            }
            sensors.sort();
            sensors.dedup();

            merged.push(SampleRow {
                timestamp,
                sensors,
                values: sums
                    .into_iter()
                    .map(|(channel, (sum, count))| (channel, sum / count as f64))
                    .collect(),
            });
        }
        merged
    }
}

/// Absolute epoch milliseconds of one sample
fn sample_time_ms(packet: &SensorPacket, idx: usize, t: Option<i64>) -> Option<i64> {
    match t {
        Some(t) if t.unsigned_abs() < RELATIVE_TIME_LIMIT_MS.unsigned_abs() => {
            packet.timestamp_start.checked_add(t)
        }
        Some(t) => Some(t),
        None => {
            let offset = (idx as i64).checked_mul(1000)? / packet.sampling_rate as i64;
            packet.timestamp_start.checked_add(offset)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{RawSample, SensorKind};
    use pretty_assertions::assert_eq;

    const START: i64 = 1_690_000_000_000;

    fn sample(t: Option<i64>, axes: &[(&str, f64)]) -> RawSample {
        RawSample {
            t,
            axes: axes.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
        }
    }

    fn packet(sensor: SensorKind, samples: Vec<RawSample>) -> SensorPacket {
        SensorPacket {
            device_id: "phone-01".to_string(),
            timestamp_start: START,
            sampling_rate: 50,
            sensor,
            samples,
        }
    }

    #[test]
    fn test_overlapping_packets_merge_by_timestamp() {
        let acc = packet(
            SensorKind::Accelerometer,
            vec![
                sample(Some(START), &[("x", 0.1), ("z", 9.8)]),
                sample(Some(START + 20), &[("x", 0.2), ("z", 9.7)]),
            ],
        );
        let gyro = packet(
            SensorKind::Gyroscope,
            vec![
                sample(Some(START + 20), &[("x", 0.01)]),
                sample(Some(START + 40), &[("x", 0.02)]),
            ],
        );

        let rows = Unpacker::unpack(&[gyro, acc]).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[1].timestamp_ms(), START + 20);
        assert_eq!(
            rows[1].sensors,
            vec![SensorKind::Accelerometer, SensorKind::Gyroscope]
        );
        assert_eq!(rows[1].get(&Channel::new(SensorKind::Accelerometer, "x")), Some(0.2));
        assert_eq!(rows[1].get(&Channel::new(SensorKind::Gyroscope, "x")), Some(0.01));
        assert_eq!(rows[2].get(&Channel::new(SensorKind::Accelerometer, "x")), None);
    }

    #[test]
    fn test_relative_and_missing_times() {
        let acc = packet(
            SensorKind::Accelerometer,
            vec![sample(Some(0), &[("x", 1.0)]), sample(Some(20), &[("x", 2.0)])],
        );
        let gyro = packet(
            SensorKind::Gyroscope,
            vec![sample(None, &[("x", 1.0)]), sample(None, &[("x", 2.0)])],
        );

        let rows = Unpacker::unpack(&[acc, gyro]).unwrap();
        let times: Vec<i64> = rows.iter().map(SampleRow::timestamp_ms).collect();
        assert_eq!(times, vec![START, START + 20]);
    }

    #[test]
    fn test_same_channel_same_instant_is_averaged() {
        let a = packet(SensorKind::Accelerometer, vec![sample(Some(START), &[("x", 1.0)])]);
        let b = packet(SensorKind::Accelerometer, vec![sample(Some(START), &[("x", 3.0)])]);

        let rows = Unpacker::unpack(&[a, b]).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get(&Channel::new(SensorKind::Accelerometer, "x")), Some(2.0));
        assert_eq!(rows[0].sensors, vec![SensorKind::Accelerometer]);
    }

    #[test]
    fn test_small_backwards_step_is_tolerated() {
        let acc = packet(
            SensorKind::Accelerometer,
            vec![
                sample(Some(START + 20), &[("x", 1.0)]),
                sample(Some(START + 18), &[("x", 2.0)]),
            ],
        );
        let rows = Unpacker::unpack(&[acc]).unwrap();
        assert_eq!(rows[0].timestamp_ms(), START + 18);
    }

    #[test]
    fn test_large_backwards_step_is_time_order_error() {
        let acc = packet(
            SensorKind::Accelerometer,
            vec![
                sample(Some(START + 100), &[("x", 1.0)]),
                sample(Some(START + 40), &[("x", 2.0)]),
            ],
        );
        match Unpacker::unpack(&[acc]) {
            Err(SleepError::TimeOrder(msg)) => assert!(msg.contains("sample 1"), "{msg}"),
            other => panic!("expected time order error, got {other:?}"),
        }
    }

    #[test]
    fn test_extreme_sample_time_is_an_error_not_a_panic() {
        let acc = packet(SensorKind::Accelerometer, vec![sample(Some(i64::MIN), &[("x", 1.0)])]);
        assert!(matches!(Unpacker::unpack(&[acc]), Err(SleepError::Schema(_))));
    }

    #[test]
    fn test_merge_rows_is_idempotent() {
        let acc = packet(
            SensorKind::Accelerometer,
            (0..10)
                .map(|i| sample(Some(START + i * 20), &[("x", i as f64), ("y", 0.5)]))
                .collect(),
        );
        let gyro = packet(
            SensorKind::Gyroscope,
            (0..10)
                .map(|i| sample(Some(START + i * 30), &[("x", -(i as f64))]))
                .collect(),
        );

        let once = Unpacker::unpack(&[acc, gyro]).unwrap();
        let twice = Unpacker::merge_rows(once.clone());
        assert_eq!(twice, once);
    }
}
