//! Device status snapshot written to `/status.json`

use alloc::string::String;
use serde::Serialize;

use crate::calendar::format_timestamp;
use crate::queue::{Operation, OperationQueue};

pub const STATUS_PATH: &str = "/status.json";

pub const FIRMWARE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Live values gathered by the board
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceReadings {
    pub link_up: bool,
    pub ir_detected: bool,
    pub dispensing: bool,
    /// Percent
    pub sanitizer_level: f32,
    /// Percent
    pub moisture: f32,
    pub weather: String,
    pub ip: String,
}

/// The dashboard's view of the device. `wifi` carries the network link
/// state whatever the medium.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    /// `YYYY-MM-DD HH:MM:SS` UTC, or `N/A` before time sync
    pub timestamp: String,
    pub wifi: bool,
    pub ir_sensor: bool,
    pub dispensing: bool,
    pub sanitizer_level: f32,
    pub moisture_sensor: f32,
    pub weather: String,
    pub ip: String,
    pub status: &'static str,
    pub firmware: &'static str,
}

impl StatusSnapshot {
    pub fn new(readings: DeviceReadings, unix_secs: Option<u64>) -> Self {
        let timestamp = match unix_secs {
            Some(secs) => String::from(format_timestamp(secs).as_str()),
            None => String::from("N/A"),
        };
        Self {
            timestamp,
            wifi: readings.link_up,
            ir_sensor: readings.ir_detected,
            dispensing: readings.dispensing,
            sanitizer_level: readings.sanitizer_level,
            moisture_sensor: readings.moisture,
            weather: readings.weather,
            ip: readings.ip,
            status: "OK",
            firmware: FIRMWARE_VERSION,
        }
    }

    /// Enqueue a PUT of this snapshot
    pub fn publish(&self, queue: &mut OperationQueue, now_ms: u64) -> bool {
        match serde_json::to_string(self) {
            Ok(json) => queue.enqueue(Operation::put(STATUS_PATH, json), now_ms),
            Err(_) => {
                error!("Failed to serialize status");
                false
            }
        }
    }
}

/// Capacitive soil sensor: 12-bit ADC reading (wet reads low) to percent
pub fn moisture_percent(raw: u16) -> f32 {
    let raw = raw.min(ADC_FULL_SCALE) as f32;
    100.0 - raw * 100.0 / ADC_FULL_SCALE as f32
}

const ADC_FULL_SCALE: u16 = 4095;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::OperationKind;

    fn readings() -> DeviceReadings {
        DeviceReadings {
            link_up: true,
            ir_detected: false,
            dispensing: true,
            sanitizer_level: 80.0,
            moisture: 12.5,
            weather: String::from("72.5°F, clear sky"),
            ip: String::from("192.168.1.50"),
        }
    }

    #[test]
    fn test_snapshot_json() {
        let snapshot = StatusSnapshot::new(readings(), Some(1_704_067_200));
        let json = serde_json::to_string(&snapshot).unwrap();
        assert_eq!(
            json,
            alloc::format!(
                r#"{{"timestamp":"2024-01-01 00:00:00","wifi":true,"irSensor":false,"dispensing":true,"sanitizerLevel":80.0,"moistureSensor":12.5,"weather":"72.5°F, clear sky","ip":"192.168.1.50","status":"OK","firmware":"{}"}}"#,
                FIRMWARE_VERSION
            )
        );
    }

    #[test]
    fn test_moisture_percent() {
        assert_eq!(moisture_percent(0), 100.0);
        assert_eq!(moisture_percent(4095), 0.0);
        assert_eq!(moisture_percent(u16::MAX), 0.0);
        assert!((moisture_percent(2048) - 49.98).abs() < 0.01);
    }

    #[test]
    fn test_unsynced_timestamp() {
        let snapshot = StatusSnapshot::new(DeviceReadings::default(), None);
        assert_eq!(snapshot.timestamp, "N/A");
    }

    #[test]
    fn test_publish_enqueues_put() {
        let mut queue = OperationQueue::new();
        let snapshot = StatusSnapshot::new(readings(), None);
        assert!(snapshot.publish(&mut queue, 3));

        let op = &queue.iter().next().unwrap().operation;
        assert_eq!(op.kind, OperationKind::Put);
        assert_eq!(op.path, STATUS_PATH);
    }
}
