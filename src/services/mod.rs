pub mod change_detector;
pub mod chunk_scheduler;
pub mod error_handling;
pub mod feature_cache;
pub mod feature_worker;
pub mod processing_coordinator;
pub mod spatial_filter;

pub use change_detector::ChangeLedger;
pub use chunk_scheduler::{ChunkScheduler, ProcessingRun};
pub use error_handling::{PipelineError, PipelineResult};
pub use feature_cache::{BuildScope, FeatureCache};
pub use feature_worker::{FeatureSnapshot, FeatureWorker, SnapshotStatus};
pub use processing_coordinator::ProcessingContext;
