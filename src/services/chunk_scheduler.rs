use std::collections::HashSet;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::domain::messages::{Stats, WorkerResponse};
use crate::domain::position::{DeviceId, DeviceTable, Position, PositionId};
use crate::services::error_handling::{PerformanceMonitor, PipelineResult};
use crate::services::feature_cache::{BuildScope, FeatureCache};

pub const DEFAULT_CHUNK_SIZE: usize = 500;
pub const DEFAULT_CHUNK_DELAY: Duration = Duration::from_millis(16);

/// One in-flight chunked execution over a viewport-first position list.
#[derive(Debug)]
pub struct ProcessingRun {
    request_id: u64,
    generation: u64,
    ordered: Vec<Position>,
    visible: usize,
    changed: HashSet<DeviceId>,
    devices: DeviceTable,
    selected_device_id: Option<DeviceId>,
    selected_position_id: Option<PositionId>,
    precision: u32,
    cursor: usize,
    next_due: Instant,
}

impl ProcessingRun {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        request_id: u64,
        ordered: Vec<Position>,
        visible: usize,
        changed: HashSet<DeviceId>,
        devices: DeviceTable,
        selected_device_id: Option<DeviceId>,
        selected_position_id: Option<PositionId>,
        precision: u32,
    ) -> Self {
        Self {
            request_id,
            generation: 0,
            ordered,
            visible,
            changed,
            devices,
            selected_device_id,
            selected_position_id,
            precision,
            cursor: 0,
            next_due: Instant::now(),
        }
    }

    pub fn total(&self) -> usize {
        self.ordered.len()
    }

    fn is_finished(&self) -> bool {
        self.cursor >= self.ordered.len()
    }

    fn stats(&self, cache: &FeatureCache) -> Stats {
        Stats {
            total: self.ordered.len(),
            visible: self.visible,
            processed: Some(self.cursor),
            changed: None,
            cached: cache.len(),
        }
    }
}

/// Result of running one chunk of the pending run.
#[derive(Debug)]
pub struct RunStep {
    pub request_id: u64,
    pub result: PipelineResult<Vec<WorkerResponse>>,
}

/// Cooperative single-flight scheduler: at most one run is pending, and each
/// call to [`ChunkScheduler::next_chunk`] processes exactly one slice of it.
#[derive(Debug)]
pub struct ChunkScheduler {
    chunk_size: usize,
    chunk_delay: Duration,
    slow_build_warn_ms: u64,
    generation: u64,
    pending: Option<ProcessingRun>,
}

impl Default for ChunkScheduler {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE, DEFAULT_CHUNK_DELAY)
    }
}

impl ChunkScheduler {
    pub fn new(chunk_size: usize, chunk_delay: Duration) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            chunk_delay,
            slow_build_warn_ms: chunk_delay.as_millis() as u64,
            generation: 0,
            pending: None,
        }
    }

    pub fn with_slow_build_warning(mut self, threshold_ms: u64) -> Self {
        self.slow_build_warn_ms = threshold_ms;
        self
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// When the pending run's next chunk is due, if any.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.as_ref().map(|run| run.next_due)
    }

    /// Make `run` the pending run, due immediately. Any previous run is
    /// dropped and will never be resumed.
    pub fn start(&mut self, mut run: ProcessingRun) -> u64 {
        self.cancel();
        self.generation += 1;
        run.generation = self.generation;
        run.next_due = Instant::now();

        info!(
            request_id = run.request_id,
            generation = run.generation,
            total = run.total(),
            visible = run.visible,
            changed = run.changed.len(),
            "Starting chunked run"
        );
        self.pending = Some(run);
        self.generation
    }

    /// Drop the pending run. Returns its request id.
    pub fn cancel(&mut self) -> Option<u64> {
        let run = self.pending.take()?;
        debug!(
            request_id = run.request_id,
            generation = run.generation,
            cursor = run.cursor,
            total = run.total(),
            "Superseded chunked run"
        );
        Some(run.request_id)
    }

    /// Process the next slice of the pending run.
    ///
    /// Returns the chunk delivery, followed by the completion delivery when the
    /// slice reached the end of the run. A failed slice ends the run.
    pub fn next_chunk(&mut self, cache: &mut FeatureCache) -> Option<RunStep> {
        let mut run = self.pending.take()?;
        let request_id = run.request_id;

        let result = self.process_slice(&mut run, cache);
        if result.is_ok() && !run.is_finished() {
            run.next_due = Instant::now() + self.chunk_delay;
            self.pending = Some(run);
        } else if result.is_ok() {
            info!(
                request_id = request_id,
                generation = run.generation,
                total = run.total(),
                cached = cache.len(),
                "Chunked run complete"
            );
        }

        Some(RunStep { request_id, result })
    }

    fn process_slice(
        &self,
        run: &mut ProcessingRun,
        cache: &mut FeatureCache,
    ) -> PipelineResult<Vec<WorkerResponse>> {
        let start = run.cursor;
        let end = (start + self.chunk_size).min(run.ordered.len());

        let features = {
            let _monitor = PerformanceMonitor::new("build_chunk", self.slow_build_warn_ms);
            let scope = BuildScope {
                devices: &run.devices,
                selected_device_id: run.selected_device_id,
                selected_position_id: run.selected_position_id,
                precision: run.precision,
                changed: &run.changed,
                snapshot: &run.ordered,
            };
            cache.build_features(&run.ordered[start..end], &scope)?
        };

        run.cursor = end;
        let total = run.total();
        let progress = ((run.cursor as f64 / total as f64) * 100.0).round() as u8;

        debug!(
            request_id = run.request_id,
            start = start,
            end = end,
            progress = progress,
            features = features.len(),
            "Delivering chunk"
        );

        let mut responses = vec![WorkerResponse::FeaturesChunk {
            features,
            progress,
            is_first_chunk: start == 0,
            is_viewport: run.cursor <= run.visible,
            stats: run.stats(cache),
        }];

        if run.is_finished() {
            responses.push(WorkerResponse::ProcessingComplete {
                stats: run.stats(cache),
            });
        }

        Ok(responses)
    }
}
