use std::collections::{HashMap, HashSet};
use tracing::debug;

use crate::domain::coordinate::round_scaled;
use crate::domain::position::{DeviceId, Position};
use crate::services::error_handling::{PipelineError, PipelineResult};

/// Last rounded coordinates seen for a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerEntry {
    pub latitude: i64,
    pub longitude: i64,
}

impl LedgerEntry {
    pub fn for_position(position: &Position, precision: u32) -> PipelineResult<Self> {
        Ok(Self {
            latitude: rounded(position, "latitude", position.latitude, precision)?,
            longitude: rounded(position, "longitude", position.longitude, precision)?,
        })
    }
}

fn rounded(position: &Position, field: &'static str, value: f64, precision: u32) -> PipelineResult<i64> {
    round_scaled(value, precision).ok_or(PipelineError::InvalidCoordinate {
        device_id: position.device_id,
        field,
        value,
    })
}

/// Per-device ledger of the latest observed position.
#[derive(Debug, Default)]
pub struct ChangeLedger {
    entries: HashMap<DeviceId, LedgerEntry>,
}

impl ChangeLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the positions whose rounded coordinates differ from the ledger,
    /// in input order. Every position updates the ledger and devices missing
    /// from `positions` are forgotten.
    ///
    /// Fails on the first position with a coordinate that cannot be rounded;
    /// entries written before it are kept.
    pub fn detect_changes(&mut self, positions: &[Position], precision: u32) -> PipelineResult<Vec<Position>> {
        let mut changed = Vec::new();
        let mut present = HashSet::with_capacity(positions.len());

        for position in positions {
            let entry = LedgerEntry::for_position(position, precision)?;
            present.insert(position.device_id);

            if self.entries.insert(position.device_id, entry) != Some(entry) {
                changed.push(position.clone());
            }
        }

        let before = self.entries.len();
        self.entries.retain(|device_id, _| present.contains(device_id));
        let pruned = before - self.entries.len();
        if pruned > 0 {
            debug!(pruned = pruned, "Dropped ledger entries for absent devices");
        }

        Ok(changed)
    }

    pub fn get(&self, device_id: DeviceId) -> Option<&LedgerEntry> {
        self.entries.get(&device_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
