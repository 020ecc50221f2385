use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use fleetmap::config::PipelineConfig;
use fleetmap::domain::messages::ProcessRequest;
use fleetmap::domain::position::{Device, DeviceId, Position, PositionId, ViewportBounds};
use fleetmap::services::{FeatureWorker, SnapshotStatus};

/// Replay recorded position snapshots through the map feature pipeline
#[derive(Parser, Debug)]
#[command(name = "fleetmap", version)]
struct Args {
    /// JSON file holding an array of processing cycles
    snapshots: PathBuf,

    /// Pipeline config file (defaults to the user config directory)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the rounding precision of every cycle
    #[arg(long)]
    precision: Option<u32>,

    /// Process each cycle in one shot instead of viewport-first chunks
    #[arg(long)]
    skip_progressive: bool,

    /// Clear the feature cache before every cycle
    #[arg(long)]
    cold: bool,

    /// Print the features of the last cycle as a GeoJSON feature collection
    #[arg(long)]
    geojson: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Cycle {
    positions: Vec<Position>,
    devices: Vec<Device>,
    #[serde(default)]
    selected_device_id: Option<DeviceId>,
    #[serde(default)]
    selected_position_id: Option<PositionId>,
    #[serde(default)]
    bounds: Option<ViewportBounds>,
    #[serde(default)]
    precision: Option<u32>,
}

impl Cycle {
    fn into_request(self, args: &Args, config: &PipelineConfig) -> ProcessRequest {
        let precision = args
            .precision
            .or(self.precision)
            .unwrap_or(config.default_precision);
        let devices = self.devices.into_iter().map(|d| (d.id, d)).collect();

        let mut request = ProcessRequest::new(self.positions, devices, precision);
        request.selected_device_id = self.selected_device_id;
        request.selected_position_id = self.selected_position_id;
        request.bounds = self.bounds;
        request.skip_progressive_load = args.skip_progressive;
        request
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => PipelineConfig::load_from(path)?,
        None => PipelineConfig::load()?,
    };

    let content = std::fs::read_to_string(&args.snapshots)
        .with_context(|| format!("Failed to read {}", args.snapshots.display()))?;
    let cycles: Vec<Cycle> = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse {}", args.snapshots.display()))?;

    info!(cycles = cycles.len(), "Replaying snapshots");

    let worker = FeatureWorker::spawn(&config);
    let mut last = None;

    for (index, cycle) in cycles.into_iter().enumerate() {
        if args.cold {
            worker.clear_cache().await?;
        }

        let request = cycle.into_request(&args, &config);
        let request_id = worker.process_positions(request, None).await?;
        let snapshot = worker.wait_for(request_id).await?;

        match &snapshot.status {
            SnapshotStatus::Failed { message } => {
                warn!(cycle = index, error = %message, "Cycle failed");
            }
            _ => {
                info!(
                    cycle = index,
                    total = snapshot.stats.total,
                    visible = snapshot.stats.visible,
                    changed = ?snapshot.stats.changed,
                    cached = snapshot.stats.cached,
                    features = snapshot.features.len(),
                    "Cycle complete"
                );
            }
        }
        last = Some(snapshot);
    }

    if args.geojson {
        if let Some(snapshot) = last {
            let collection = serde_json::json!({
                "type": "FeatureCollection",
                "features": snapshot.features,
            });
            println!("{}", serde_json::to_string_pretty(&collection)?);
        }
    }

    worker.shutdown().await;
    Ok(())
}
