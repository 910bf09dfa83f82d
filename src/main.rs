//! Run a full measurement sequence against the simulated rig.
//!
//! Real vendor drivers live behind the same capability traits; this binary
//! wires the simulated stage and camera so a sequence can be exercised end
//! to end without hardware attached. Logging is controlled with `RUST_LOG`.

use anyhow::{Context, Result};
use clap::Parser;
use polarscope::hardware::mock::{SimCamera, SimCameraModel, SimStage};
use polarscope::preview::LivePreview;
use polarscope::{ScanConfiguration, SequenceRunner};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(version, about = "Crossed-Nicols sequencer (simulated rig)")]
struct Args {
    /// Path to the sequence configuration YAML.
    config: PathBuf,

    /// Reuse cached fit logs from this directory instead of re-scanning.
    #[arg(long)]
    cached_fits: Option<PathBuf>,

    /// Extinction angle of the simulated rig at polarizer zero, degrees.
    #[arg(long, default_value_t = 172.5)]
    extinction: f64,

    /// Uniform noise amplitude of the simulated camera.
    #[arg(long, default_value_t = 0.0)]
    noise: f64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let mut config = ScanConfiguration::load(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    if let Some(dir) = args.cached_fits {
        config.cn_info = Some(dir);
    }

    let stage = Arc::new(SimStage::new());
    let model = SimCameraModel {
        extinction_deg: args.extinction,
        noise: args.noise,
        reference_exposure_ms: config.camera.scan_time,
        ..SimCameraModel::default()
    };
    let camera = Arc::new(SimCamera::with_dimensions(stage.clone(), model, 128, 128));

    let mut runner = SequenceRunner::new(config, stage, camera.clone())?;

    // Live preview pauses automatically whenever the runner holds the
    // capture gate for a motion-synchronized section.
    let preview = LivePreview::spawn(
        camera,
        runner.capture_gate(),
        8,
        Duration::from_millis(33),
    );

    let outcome = runner.run().await;
    preview.stop().await;
    outcome?;
    Ok(())
}
