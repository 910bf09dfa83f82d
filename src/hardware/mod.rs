//! Hardware capability traits.
//!
//! The sequencing core never talks to vendor SDKs directly; it depends on two
//! narrow capabilities, implemented per device:
//!
//! - [`RotationStage`]: start an absolute move on one axis and report the
//!   busy flag.
//! - [`FrameSource`]: deliver a 16-bit intensity frame and control exposure.
//!
//! Simulated implementations live in [`mock`]; deterministic enough for tests
//! and the simulation binary. Real drivers implement the same traits behind a
//! serial/GPIB transport.

pub mod mock;

use crate::error::{AppResult, PolarError};
use crate::frame::Frame;
use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;
use tokio::time::{sleep, Instant};

/// Stage axes of the two-axis rotation controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Axis {
    Polarizer,
    Analyzer,
}

impl Axis {
    /// Axis number on the controller wire protocol.
    pub fn wire_id(self) -> u8 {
        match self {
            Axis::Polarizer => 1,
            Axis::Analyzer => 2,
        }
    }
}

/// Capability: motorized rotation stage with a busy flag.
#[async_trait]
pub trait RotationStage: Send + Sync {
    /// Start an absolute move. Returns once the command is accepted; use
    /// [`wait_settled`] to block until motion completes.
    async fn move_abs(&self, axis: Axis, degrees: f64) -> Result<()>;

    /// Whether any axis is still moving.
    async fn is_busy(&self) -> Result<bool>;
}

/// Capability: camera that delivers 16-bit intensity frames.
#[async_trait]
pub trait FrameSource: Send + Sync {
    /// Capture one frame. With `discard_stale` set the source drains one
    /// buffered frame first and returns the next fresh one (hardware
    /// settling after a trigger-mode or exposure change).
    async fn capture(&self, discard_stale: bool) -> Result<Frame>;

    /// Change the exposure time in milliseconds.
    async fn set_exposure_ms(&self, exposure_ms: f64) -> Result<()>;

    /// Current exposure time in milliseconds.
    async fn exposure_ms(&self) -> f64;
}

/// Initial busy-flag poll interval.
const POLL_INITIAL: Duration = Duration::from_millis(200);
/// Poll interval ceiling.
const POLL_MAX: Duration = Duration::from_secs(1);

/// Block until the stage reports idle.
///
/// Polls the busy flag with exponential backoff (200 ms doubling to 1 s) and
/// fails with [`PolarError::Timeout`] once `timeout` elapses. An unresponsive
/// stage therefore aborts the run instead of hanging it.
pub async fn wait_settled<S: RotationStage + ?Sized>(
    stage: &S,
    operation: &str,
    timeout: Duration,
) -> AppResult<()> {
    let started = Instant::now();
    let mut interval = POLL_INITIAL;
    loop {
        match stage.is_busy().await {
            Ok(false) => return Ok(()),
            Ok(true) => {}
            Err(err) => return Err(PolarError::Hardware(err)),
        }
        if started.elapsed() >= timeout {
            return Err(PolarError::Timeout {
                operation: operation.to_string(),
                timeout,
            });
        }
        sleep(interval).await;
        interval = (interval * 2).min(POLL_MAX);
    }
}
