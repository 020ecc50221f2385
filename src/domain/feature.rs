use serde::{Deserialize, Serialize};

use super::position::{Device, DeviceId, Position, PositionId};

/// Device categories that have a dedicated marker icon. Anything else is drawn
/// with the `default` icon.
pub const ICON_CATEGORIES: &[&str] = &[
    "animal",
    "bicycle",
    "boat",
    "bus",
    "car",
    "camper",
    "crane",
    "helicopter",
    "motorcycle",
    "offroad",
    "person",
    "pickup",
    "plane",
    "scooter",
    "ship",
    "tractor",
    "trailer",
    "train",
    "tram",
    "truck",
    "van",
];

pub fn map_icon_key(category: Option<&str>) -> &'static str {
    category
        .and_then(|c| ICON_CATEGORIES.iter().find(|known| **known == c))
        .copied()
        .unwrap_or("default")
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MarkerColor {
    Success,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum Geometry {
    Point { coordinates: [f64; 2] }, // [longitude, latitude]
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FeatureProperties {
    pub id: PositionId,
    pub device_id: DeviceId,
    pub name: String,
    pub category: String,
    pub color: MarkerColor,
    pub rotation: f64,
    pub direction: bool,
}

/// Point feature handed to the map layer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename = "Feature")]
pub struct Feature {
    pub geometry: Geometry,
    pub properties: FeatureProperties,
}

impl Feature {
    pub fn for_position(
        position: &Position,
        device: &Device,
        selected_position_id: Option<PositionId>,
    ) -> Self {
        let heading = position.heading();
        Self {
            geometry: Geometry::Point {
                coordinates: [position.longitude, position.latitude],
            },
            properties: FeatureProperties {
                id: position.id,
                device_id: position.device_id,
                name: device.name.clone(),
                category: map_icon_key(device.category.as_deref()).to_string(),
                color: if device.status.is_online() {
                    MarkerColor::Success
                } else {
                    MarkerColor::Error
                },
                rotation: heading,
                direction: selected_position_id == Some(position.id) && heading != 0.0,
            },
        }
    }

    pub fn device_id(&self) -> DeviceId {
        self.properties.device_id
    }
}

/// Identity of a rendered marker: device, rounded coordinates, selection and
/// whole-degree heading. Positions that produce the same key share one cached
/// feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FeatureKey {
    pub device_id: DeviceId,
    pub latitude: i64,
    pub longitude: i64,
    pub selected_position_id: Option<PositionId>,
    pub heading: i32,
}
