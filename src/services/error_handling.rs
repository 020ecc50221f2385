use std::time::Instant;
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::domain::position::DeviceId;

/// Errors raised by the feature pipeline
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    #[error("Invalid {field} for device {device_id}: {value}")]
    InvalidCoordinate {
        device_id: DeviceId,
        field: &'static str,
        value: f64,
    },

    #[error("Rounding precision {precision} is out of range (maximum: {max})")]
    PrecisionOutOfRange { precision: u32, max: u32 },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Feature worker is not running")]
    WorkerUnavailable,
}

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;

/// Structured logging helpers
pub struct LogHelper;

impl LogHelper {
    pub fn log_cycle_failure(request_id: u64, error: &PipelineError) {
        error!(
            request_id = request_id,
            error = %error,
            "Processing cycle failed"
        );
    }

    pub fn log_performance_warning(operation: &str, duration_ms: u64, threshold_ms: u64) {
        if duration_ms > threshold_ms {
            warn!(
                operation = %operation,
                duration_ms = duration_ms,
                threshold_ms = threshold_ms,
                "Operation exceeded performance threshold"
            );
        }
    }
}

/// Warns on drop when the guarded operation ran past its budget.
pub struct PerformanceMonitor {
    operation: &'static str,
    start: Instant,
    threshold_ms: u64,
}

impl PerformanceMonitor {
    pub fn new(operation: &'static str, threshold_ms: u64) -> Self {
        Self {
            operation,
            start: Instant::now(),
            threshold_ms,
        }
    }
}

impl Drop for PerformanceMonitor {
    fn drop(&mut self) {
        let duration_ms = self.start.elapsed().as_millis() as u64;
        LogHelper::log_performance_warning(self.operation, duration_ms, self.threshold_ms);

        debug!(
            operation = %self.operation,
            duration_ms = duration_ms,
            "Operation completed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let error = PipelineError::InvalidCoordinate {
            device_id: 7,
            field: "latitude",
            value: f64::NAN,
        };
        assert!(error.to_string().contains("latitude"));
        assert!(error.to_string().contains("device 7"));

        let error = PipelineError::PrecisionOutOfRange {
            precision: 20,
            max: 12,
        };
        assert!(error.to_string().contains("maximum: 12"));
    }

    #[test]
    fn test_performance_monitor_drops_cleanly() {
        let monitor = PerformanceMonitor::new("build_features", 0);
        drop(monitor);
    }
}
