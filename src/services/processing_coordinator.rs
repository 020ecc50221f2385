use std::collections::HashSet;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::config::PipelineConfig;
use crate::domain::coordinate::MAX_PRECISION;
use crate::domain::feature::Feature;
use crate::domain::messages::{ProcessRequest, Stats, WorkerResponse};
use crate::domain::position::{DeviceId, Position};
use crate::services::change_detector::ChangeLedger;
use crate::services::chunk_scheduler::{ChunkScheduler, ProcessingRun, RunStep};
use crate::services::error_handling::{PerformanceMonitor, PipelineError, PipelineResult};
use crate::services::feature_cache::{BuildScope, FeatureCache};
use crate::services::spatial_filter;

/// Owns all per-worker pipeline state: the change ledger, the feature cache
/// and the pending chunked run.
#[derive(Debug)]
pub struct ProcessingContext {
    ledger: ChangeLedger,
    cache: FeatureCache,
    scheduler: ChunkScheduler,
    viewport_padding: f64,
    slow_build_warn_ms: u64,
}

impl Default for ProcessingContext {
    fn default() -> Self {
        Self::new(&PipelineConfig::default())
    }
}

impl ProcessingContext {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            ledger: ChangeLedger::new(),
            cache: FeatureCache::new(config.eviction_threshold),
            scheduler: ChunkScheduler::new(config.chunk_size, config.chunk_delay())
                .with_slow_build_warning(config.slow_build_warn_ms),
            viewport_padding: config.viewport_padding,
            slow_build_warn_ms: config.slow_build_warn_ms,
        }
    }

    /// Handle one processing request.
    ///
    /// Any pending chunked run is superseded first. Returns either a single
    /// `FeaturesReady` or the first chunk of a newly started run; the rest of
    /// that run is produced by [`ProcessingContext::run_due_chunk`].
    pub fn process(
        &mut self,
        request_id: u64,
        request: ProcessRequest,
    ) -> PipelineResult<Vec<WorkerResponse>> {
        if let Some(superseded) = self.scheduler.cancel() {
            debug!(superseded = superseded, request_id = request_id, "New request replaces pending run");
        }

        if request.precision > MAX_PRECISION {
            return Err(PipelineError::PrecisionOutOfRange {
                precision: request.precision,
                max: MAX_PRECISION,
            });
        }

        if request.skip_progressive_load {
            return self.process_all(request);
        }

        let (inside, outside) = spatial_filter::partition(
            &request.positions,
            request.bounds.as_ref(),
            self.viewport_padding,
        );
        let visible = inside.len();
        let mut ordered = inside;
        ordered.extend(outside);

        let changed = changed_ids(&self.ledger.detect_changes(&ordered, request.precision)?);

        if ordered.len() <= self.scheduler.chunk_size() {
            let features = self.build(&ordered, &request, &changed)?;
            return Ok(vec![WorkerResponse::FeaturesReady {
                features,
                stats: Stats {
                    total: ordered.len(),
                    visible,
                    processed: None,
                    changed: Some(changed.len()),
                    cached: self.cache.len(),
                },
            }]);
        }

        let ProcessRequest {
            devices,
            selected_device_id,
            selected_position_id,
            precision,
            ..
        } = request;
        self.scheduler.start(ProcessingRun::new(
            request_id,
            ordered,
            visible,
            changed,
            devices,
            selected_device_id,
            selected_position_id,
            precision,
        ));

        match self.scheduler.next_chunk(&mut self.cache) {
            Some(step) => step.result,
            None => Ok(Vec::new()),
        }
    }

    /// Single pass over the whole snapshot, no viewport ordering or chunking.
    fn process_all(&mut self, request: ProcessRequest) -> PipelineResult<Vec<WorkerResponse>> {
        let changed = changed_ids(
            &self
                .ledger
                .detect_changes(&request.positions, request.precision)?,
        );
        let features = self.build(&request.positions, &request, &changed)?;
        let total = request.positions.len();

        info!(
            total = total,
            changed = changed.len(),
            features = features.len(),
            "Processed snapshot without progressive loading"
        );

        Ok(vec![WorkerResponse::FeaturesReady {
            features,
            stats: Stats {
                total,
                visible: total,
                processed: None,
                changed: Some(changed.len()),
                cached: self.cache.len(),
            },
        }])
    }

    fn build(
        &mut self,
        positions: &[Position],
        request: &ProcessRequest,
        changed: &HashSet<DeviceId>,
    ) -> PipelineResult<Vec<Arc<Feature>>> {
        let _monitor = PerformanceMonitor::new("build_features", self.slow_build_warn_ms);
        let scope = BuildScope {
            devices: &request.devices,
            selected_device_id: request.selected_device_id,
            selected_position_id: request.selected_position_id,
            precision: request.precision,
            changed,
            snapshot: positions,
        };
        self.cache.build_features(positions, &scope)
    }

    /// Run the pending chunk if there is one.
    pub fn run_due_chunk(&mut self) -> Option<RunStep> {
        self.scheduler.next_chunk(&mut self.cache)
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.scheduler.next_deadline()
    }

    pub fn has_pending_run(&self) -> bool {
        self.scheduler.is_pending()
    }

    /// Forget every device and cached feature. A pending run keeps going.
    pub fn clear(&mut self) {
        info!(
            ledger = self.ledger.len(),
            cached = self.cache.len(),
            "Clearing feature cache and change ledger"
        );
        self.ledger.clear();
        self.cache.clear();
    }

    pub fn ledger(&self) -> &ChangeLedger {
        &self.ledger
    }

    pub fn cache(&self) -> &FeatureCache {
        &self.cache
    }
}

fn changed_ids(changed: &[Position]) -> HashSet<DeviceId> {
    changed.iter().map(|position| position.device_id).collect()
}
