use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

use crate::domain::coordinate::round_heading;
use crate::domain::feature::{Feature, FeatureKey};
use crate::domain::position::{Device, DeviceId, DeviceTable, Position, PositionId};
use crate::services::change_detector::LedgerEntry;
use crate::services::error_handling::PipelineResult;

pub const DEFAULT_EVICTION_THRESHOLD: usize = 2500;

/// Everything a build needs to know about the current cycle.
#[derive(Debug, Clone, Copy)]
pub struct BuildScope<'a> {
    pub devices: &'a DeviceTable,
    pub selected_device_id: Option<DeviceId>,
    pub selected_position_id: Option<PositionId>,
    pub precision: u32,
    /// Devices whose position changed this cycle.
    pub changed: &'a HashSet<DeviceId>,
    /// Full snapshot of the cycle; defines which keys survive eviction.
    pub snapshot: &'a [Position],
}

impl BuildScope<'_> {
    fn renders(&self, position: &Position) -> Option<&Device> {
        if self.selected_device_id == Some(position.device_id) {
            return None;
        }
        self.devices.get(&position.device_id)
    }

    fn key_for(&self, position: &Position) -> PipelineResult<FeatureKey> {
        let rounded = LedgerEntry::for_position(position, self.precision)?;
        Ok(FeatureKey {
            device_id: position.device_id,
            latitude: rounded.latitude,
            longitude: rounded.longitude,
            selected_position_id: self.selected_position_id,
            heading: round_heading(position.heading()),
        })
    }
}

/// Memoized map features keyed by rounded marker state.
#[derive(Debug)]
pub struct FeatureCache {
    entries: HashMap<FeatureKey, Arc<Feature>>,
    eviction_threshold: usize,
}

impl Default for FeatureCache {
    fn default() -> Self {
        Self::new(DEFAULT_EVICTION_THRESHOLD)
    }
}

impl FeatureCache {
    pub fn new(eviction_threshold: usize) -> Self {
        Self {
            entries: HashMap::new(),
            eviction_threshold,
        }
    }

    /// Build or reuse one feature per renderable position of `batch`.
    ///
    /// Positions of unknown devices and of the selected device are skipped.
    pub fn build_features(
        &mut self,
        batch: &[Position],
        scope: &BuildScope<'_>,
    ) -> PipelineResult<Vec<Arc<Feature>>> {
        self.invalidate(batch, scope);

        let mut features = Vec::with_capacity(batch.len());
        let mut misses = 0usize;

        for position in batch {
            let Some(device) = scope.renders(position) else {
                continue;
            };

            let key = scope.key_for(position)?;
            let feature = self.entries.entry(key).or_insert_with(|| {
                misses += 1;
                Arc::new(Feature::for_position(
                    position,
                    device,
                    scope.selected_position_id,
                ))
            });
            features.push(Arc::clone(feature));
        }

        debug!(
            built = misses,
            reused = features.len() - misses,
            cached = self.entries.len(),
            "Built feature batch"
        );

        if self.entries.len() > self.eviction_threshold {
            self.evict_inactive(scope)?;
        }

        Ok(features)
    }

    /// Drop entries of the selected device and of changed devices in `batch`.
    fn invalidate(&mut self, batch: &[Position], scope: &BuildScope<'_>) {
        let stale: HashSet<DeviceId> = batch
            .iter()
            .map(|position| position.device_id)
            .filter(|device_id| scope.changed.contains(device_id))
            .chain(scope.selected_device_id)
            .collect();

        if !stale.is_empty() {
            self.entries
                .retain(|key, _| !stale.contains(&key.device_id));
        }
    }

    /// Full sweep: keep only keys the current snapshot can still reference.
    fn evict_inactive(&mut self, scope: &BuildScope<'_>) -> PipelineResult<()> {
        let mut active = HashSet::with_capacity(scope.snapshot.len());
        for position in scope.snapshot {
            if scope.renders(position).is_some() {
                active.insert(scope.key_for(position)?);
            }
        }

        let before = self.entries.len();
        self.entries.retain(|key, _| active.contains(key));

        debug!(
            evicted = before - self.entries.len(),
            remaining = self.entries.len(),
            threshold = self.eviction_threshold,
            "Evicted inactive features"
        );
        Ok(())
    }

    pub fn contains_device(&self, device_id: DeviceId) -> bool {
        self.entries.keys().any(|key| key.device_id == device_id)
    }

    pub fn device_ids(&self) -> HashSet<DeviceId> {
        self.entries.keys().map(|key| key.device_id).collect()
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
