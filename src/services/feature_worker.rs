use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::PipelineConfig;
use crate::domain::feature::Feature;
use crate::domain::messages::{ProcessRequest, Stats, WorkerRequest, WorkerResponse};
use crate::services::error_handling::{LogHelper, PipelineError, PipelineResult};
use crate::services::processing_coordinator::ProcessingContext;

pub type RequestId = u64;

/// Invoked once when a request's features are fully delivered.
pub type CompletionCallback = Box<dyn FnOnce(&FeatureSnapshot) + Send + 'static>;

/// A message crossing the host/worker boundary, tagged with the request it
/// belongs to.
#[derive(Debug, Clone)]
pub struct Envelope<T> {
    pub request_id: RequestId,
    pub message: T,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum SnapshotStatus {
    #[default]
    Idle,
    Loading {
        progress: u8,
    },
    Ready,
    Failed {
        message: String,
    },
}

/// What subscribers see: the latest feature set and its statistics.
#[derive(Debug, Clone, Default)]
pub struct FeatureSnapshot {
    pub request_id: Option<RequestId>,
    pub features: Vec<Arc<Feature>>,
    pub stats: Stats,
    pub status: SnapshotStatus,
}

impl FeatureSnapshot {
    fn apply(&mut self, request_id: RequestId, message: &WorkerResponse) {
        self.request_id = Some(request_id);
        match message {
            WorkerResponse::FeaturesReady { features, stats } => {
                self.features = features.clone();
                self.stats = *stats;
                self.status = SnapshotStatus::Ready;
            }
            WorkerResponse::FeaturesChunk {
                features,
                progress,
                is_first_chunk,
                stats,
                ..
            } => {
                if *is_first_chunk {
                    self.features = features.clone();
                } else {
                    self.features.extend(features.iter().cloned());
                }
                self.stats = *stats;
                self.status = SnapshotStatus::Loading {
                    progress: *progress,
                };
            }
            WorkerResponse::ProcessingComplete { stats } => {
                self.stats = *stats;
                self.status = SnapshotStatus::Ready;
            }
            // Keep the last good features on screen.
            WorkerResponse::ProcessingFailed { message } => {
                self.status = SnapshotStatus::Failed {
                    message: message.clone(),
                };
            }
        }
    }

    /// Whether the request this snapshot belongs to has finished.
    pub fn is_settled(&self) -> bool {
        matches!(
            self.status,
            SnapshotStatus::Ready | SnapshotStatus::Failed { .. }
        )
    }
}

/// Sending side of the request channel. Ids are handed out under the same
/// lock as the send, so the worker receives requests in id order.
struct RequestQueue {
    sender: mpsc::Sender<Envelope<WorkerRequest>>,
    next_id: RequestId,
}

type PendingCallbacks = Arc<Mutex<HashMap<RequestId, CompletionCallback>>>;

/// Host-side handle to the background feature worker.
///
/// Must be created inside a Tokio runtime. Dropping the handle stops the
/// worker; no deliveries happen after that.
pub struct FeatureWorker {
    requests: AsyncMutex<RequestQueue>,
    state: watch::Receiver<FeatureSnapshot>,
    callbacks: PendingCallbacks,
    worker: JoinHandle<()>,
    relay: JoinHandle<()>,
}

impl FeatureWorker {
    pub fn spawn(config: &PipelineConfig) -> Self {
        let capacity = config.channel_capacity.max(1);
        let (request_tx, request_rx) = mpsc::channel(capacity);
        let (delivery_tx, delivery_rx) = mpsc::channel(capacity);
        let (state_tx, state_rx) = watch::channel(FeatureSnapshot::default());
        let callbacks: PendingCallbacks = Arc::new(Mutex::new(HashMap::new()));

        let context = ProcessingContext::new(config);
        let worker = tokio::spawn(run_worker(context, request_rx, delivery_tx));
        let relay = tokio::spawn(run_relay(delivery_rx, state_tx, callbacks.clone()));

        info!(
            chunk_size = config.chunk_size,
            chunk_delay_ms = config.chunk_delay_ms,
            eviction_threshold = config.eviction_threshold,
            "Feature worker started"
        );

        Self {
            requests: AsyncMutex::new(RequestQueue {
                sender: request_tx,
                next_id: 1,
            }),
            state: state_rx,
            callbacks,
            worker,
            relay,
        }
    }

    /// Queue a processing cycle. `on_complete` runs once this request's
    /// features are fully delivered; it is dropped without running if the
    /// request fails or is superseded.
    pub async fn process_positions(
        &self,
        request: ProcessRequest,
        on_complete: Option<CompletionCallback>,
    ) -> PipelineResult<RequestId> {
        self.enqueue(WorkerRequest::ProcessPositions(request), on_complete)
            .await
    }

    /// Forget all cached features and ledger entries before the next cycle.
    pub async fn clear_cache(&self) -> PipelineResult<()> {
        self.enqueue(WorkerRequest::ClearCache, None).await?;
        Ok(())
    }

    async fn enqueue(
        &self,
        message: WorkerRequest,
        on_complete: Option<CompletionCallback>,
    ) -> PipelineResult<RequestId> {
        let mut queue = self.requests.lock().await;
        let request_id = queue.next_id;
        queue.next_id += 1;

        if let Some(callback) = on_complete {
            self.callbacks.lock().insert(request_id, callback);
        }

        let envelope = Envelope {
            request_id,
            message,
        };
        if queue.sender.send(envelope).await.is_err() {
            self.callbacks.lock().remove(&request_id);
            return Err(PipelineError::WorkerUnavailable);
        }

        Ok(request_id)
    }

    pub fn subscribe(&self) -> watch::Receiver<FeatureSnapshot> {
        self.state.clone()
    }

    pub fn snapshot(&self) -> FeatureSnapshot {
        self.state.borrow().clone()
    }

    /// Wait until `request_id` (or a later request) has settled.
    pub async fn wait_for(&self, request_id: RequestId) -> PipelineResult<FeatureSnapshot> {
        let mut state = self.state.clone();
        let snapshot = state
            .wait_for(|snapshot| {
                snapshot.request_id.is_some_and(|id| id >= request_id) && snapshot.is_settled()
            })
            .await
            .map_err(|_| PipelineError::WorkerUnavailable)?
            .clone();
        Ok(snapshot)
    }

    /// Stop the worker and the delivery relay.
    pub async fn shutdown(mut self) {
        self.worker.abort();
        self.relay.abort();
        let _ = (&mut self.worker).await;
        let _ = (&mut self.relay).await;
        self.callbacks.lock().clear();
        info!("Feature worker stopped");
    }
}

impl Drop for FeatureWorker {
    fn drop(&mut self) {
        self.worker.abort();
        self.relay.abort();
    }
}

async fn run_worker(
    mut context: ProcessingContext,
    mut requests: mpsc::Receiver<Envelope<WorkerRequest>>,
    deliveries: mpsc::Sender<Envelope<WorkerResponse>>,
) {
    loop {
        let deadline = context.next_deadline();

        tokio::select! {
            // A newer request always wins over the next chunk of an older run.
            biased;

            envelope = requests.recv() => {
                let Some(Envelope { request_id, message }) = envelope else {
                    break;
                };
                match message {
                    WorkerRequest::ProcessPositions(request) => {
                        let result = context.process(request_id, request);
                        if !deliver(&deliveries, request_id, result).await {
                            break;
                        }
                    }
                    WorkerRequest::ClearCache => context.clear(),
                }
            }

            _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                if let Some(step) = context.run_due_chunk() {
                    if !deliver(&deliveries, step.request_id, step.result).await {
                        break;
                    }
                }
            }
        }
    }

    debug!("Feature worker loop exited");
}

/// Returns false once the relay is gone.
async fn deliver(
    deliveries: &mpsc::Sender<Envelope<WorkerResponse>>,
    request_id: RequestId,
    result: PipelineResult<Vec<WorkerResponse>>,
) -> bool {
    let messages = match result {
        Ok(messages) => messages,
        Err(error) => {
            LogHelper::log_cycle_failure(request_id, &error);
            vec![WorkerResponse::ProcessingFailed {
                message: error.to_string(),
            }]
        }
    };

    for message in messages {
        if deliveries
            .send(Envelope {
                request_id,
                message,
            })
            .await
            .is_err()
        {
            return false;
        }
    }
    true
}

async fn run_relay(
    mut deliveries: mpsc::Receiver<Envelope<WorkerResponse>>,
    state: watch::Sender<FeatureSnapshot>,
    callbacks: PendingCallbacks,
) {
    while let Some(Envelope {
        request_id,
        message,
    }) = deliveries.recv().await
    {
        state.send_modify(|snapshot| snapshot.apply(request_id, &message));

        if !message.is_terminal() {
            continue;
        }

        // Requests up to this one are finished or superseded.
        let callback = {
            let mut pending = callbacks.lock();
            let callback = pending.remove(&request_id);
            pending.retain(|id, _| *id > request_id);
            callback
        };

        match (&message, callback) {
            (WorkerResponse::ProcessingFailed { message }, _) => {
                warn!(request_id = request_id, error = %message, "Keeping previous features after failed cycle");
            }
            (_, Some(callback)) => {
                let snapshot = state.borrow().clone();
                callback(&snapshot);
            }
            (_, None) => {}
        }
    }

    debug!("Feature relay exited");
}
