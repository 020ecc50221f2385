use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::feature::Feature;
use super::position::{DeviceId, DeviceTable, Position, PositionId, ViewportBounds};

/// One processing cycle: the full position snapshot plus everything needed to
/// turn it into features.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProcessRequest {
    pub positions: Vec<Position>,
    #[serde(with = "device_list")]
    pub devices: DeviceTable,
    #[serde(default)]
    pub selected_device_id: Option<DeviceId>,
    #[serde(default)]
    pub selected_position_id: Option<PositionId>,
    #[serde(default)]
    pub bounds: Option<ViewportBounds>,
    pub precision: u32,
    #[serde(default)]
    pub skip_progressive_load: bool,
}

impl ProcessRequest {
    pub fn new(positions: Vec<Position>, devices: DeviceTable, precision: u32) -> Self {
        Self {
            positions,
            devices,
            selected_device_id: None,
            selected_position_id: None,
            bounds: None,
            precision,
            skip_progressive_load: false,
        }
    }
}

/// Devices travel as a JSON array and are indexed by id on arrival.
mod device_list {
    use crate::domain::position::{Device, DeviceTable};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(devices: &DeviceTable, serializer: S) -> Result<S::Ok, S::Error> {
        let mut list: Vec<&Device> = devices.values().collect();
        list.sort_by_key(|d| d.id);
        list.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DeviceTable, D::Error> {
        let list = Vec::<Device>::deserialize(deserializer)?;
        Ok(list.into_iter().map(|d| (d.id, d)).collect())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerRequest {
    ProcessPositions(ProcessRequest),
    ClearCache,
}

/// Diagnostic counters attached to every delivery.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Stats {
    pub total: usize,
    pub visible: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changed: Option<usize>,
    pub cached: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerResponse {
    FeaturesReady {
        features: Vec<Arc<Feature>>,
        stats: Stats,
    },
    #[serde(rename_all = "camelCase")]
    FeaturesChunk {
        features: Vec<Arc<Feature>>,
        progress: u8,
        is_first_chunk: bool,
        is_viewport: bool,
        stats: Stats,
    },
    ProcessingComplete {
        stats: Stats,
    },
    ProcessingFailed {
        message: String,
    },
}

impl WorkerResponse {
    /// Whether this delivery ends its cycle.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, WorkerResponse::FeaturesChunk { .. })
    }

    pub fn stats(&self) -> Option<Stats> {
        match self {
            WorkerResponse::FeaturesReady { stats, .. }
            | WorkerResponse::FeaturesChunk { stats, .. }
            | WorkerResponse::ProcessingComplete { stats } => Some(*stats),
            WorkerResponse::ProcessingFailed { .. } => None,
        }
    }
}
