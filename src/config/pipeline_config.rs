use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::domain::coordinate::MAX_PRECISION;
use crate::services::error_handling::{PipelineError, PipelineResult};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    /// Positions per chunk; snapshots at or below this size are processed in one shot
    pub chunk_size: usize,

    /// Pause between chunks of a run (one frame)
    pub chunk_delay_ms: u64,

    /// Fraction of each viewport axis added on every side before partitioning
    pub viewport_padding: f64,

    /// Cache size above which inactive features are swept
    pub eviction_threshold: usize,

    /// Coordinate rounding used when a cycle does not specify one
    pub default_precision: u32,

    /// Capacity of the request and delivery channels
    pub channel_capacity: usize,

    /// Feature builds slower than this are logged as warnings
    pub slow_build_warn_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            chunk_size: 500,
            chunk_delay_ms: 16,
            viewport_padding: 0.5,
            eviction_threshold: 2500,
            default_precision: 5,
            channel_capacity: 64,
            slow_build_warn_ms: 16,
        }
    }
}

impl PipelineConfig {
    /// Load configuration from the user config directory, writing the
    /// defaults there on first use.
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            let default_config = Self::default();
            default_config.save_to(&config_path)?;
            Ok(default_config)
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        info!(path = %path.display(), "Configuration saved");
        Ok(())
    }

    /// Get the configuration file path
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;

        Ok(config_dir.join("fleetmap").join("pipeline.toml"))
    }

    pub fn validate(&self) -> PipelineResult<()> {
        let fail = |message: &str| -> PipelineResult<()> {
            Err(PipelineError::Configuration {
                message: message.to_string(),
            })
        };

        if self.chunk_size == 0 {
            return fail("chunk_size must be at least 1");
        }
        if self.channel_capacity == 0 {
            return fail("channel_capacity must be at least 1");
        }
        if !self.viewport_padding.is_finite() || self.viewport_padding < 0.0 {
            return fail("viewport_padding must be a non-negative number");
        }
        if self.default_precision > MAX_PRECISION {
            return Err(PipelineError::PrecisionOutOfRange {
                precision: self.default_precision,
                max: MAX_PRECISION,
            });
        }
        Ok(())
    }

    pub fn chunk_delay(&self) -> Duration {
        Duration::from_millis(self.chunk_delay_ms)
    }
}
