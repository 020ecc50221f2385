use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub type DeviceId = i64;
pub type PositionId = i64;

/// A single observation reported for a device.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    pub id: PositionId,
    pub device_id: DeviceId,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub course: Option<f64>, // Degrees, absent when the tracker did not report one
    #[serde(default)]
    pub fix_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub attributes: serde_json::Map<String, serde_json::Value>,
}

impl Position {
    pub fn new(id: PositionId, device_id: DeviceId, latitude: f64, longitude: f64) -> Self {
        Self {
            id,
            device_id,
            latitude,
            longitude,
            course: None,
            fix_time: None,
            attributes: serde_json::Map::new(),
        }
    }

    pub fn with_course(mut self, course: f64) -> Self {
        self.course = Some(course);
        self
    }

    /// Heading used for cache keys and marker rotation. Missing course reads as 0.
    pub fn heading(&self) -> f64 {
        self.course.unwrap_or(0.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    Online,
    Offline,
    #[default]
    #[serde(other)]
    Unknown,
}

impl DeviceStatus {
    pub fn is_online(&self) -> bool {
        matches!(self, DeviceStatus::Online)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Device {
    pub id: DeviceId,
    pub name: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub status: DeviceStatus,
}

impl Device {
    pub fn new(id: DeviceId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            category: None,
            status: DeviceStatus::Unknown,
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_status(mut self, status: DeviceStatus) -> Self {
        self.status = status;
        self
    }
}

/// Device lookup table supplied by the host, keyed by device id.
pub type DeviceTable = HashMap<DeviceId, Device>;

/// Visible map rectangle in decimal degrees.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ViewportBounds {
    pub north: f64,
    pub south: f64,
    pub east: f64,
    pub west: f64,
}

impl ViewportBounds {
    pub fn new(north: f64, south: f64, east: f64, west: f64) -> Self {
        Self {
            north,
            south,
            east,
            west,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position_json_uses_camel_case() {
        let json = r#"{"id": 11, "deviceId": 7, "latitude": 12.5, "longitude": 56.25, "course": 90.0}"#;
        let position: Position = serde_json::from_str(json).unwrap();

        assert_eq!(position.device_id, 7);
        assert_eq!(position.heading(), 90.0);
        assert!(position.attributes.is_empty());
    }

    #[test]
    fn test_missing_course_reads_as_zero() {
        let position = Position::new(1, 2, 0.0, 0.0);
        assert_eq!(position.heading(), 0.0);
    }

    #[test]
    fn test_only_literal_online_is_online() {
        let online: Device = serde_json::from_str(r#"{"id": 1, "name": "a", "status": "online"}"#).unwrap();
        let offline: Device = serde_json::from_str(r#"{"id": 2, "name": "b", "status": "offline"}"#).unwrap();
        let odd: Device = serde_json::from_str(r#"{"id": 3, "name": "c", "status": "ONLINE"}"#).unwrap();
        let missing: Device = serde_json::from_str(r#"{"id": 4, "name": "d"}"#).unwrap();

        assert!(online.status.is_online());
        assert!(!offline.status.is_online());
        assert!(!odd.status.is_online());
        assert!(!missing.status.is_online());
    }
}
