//! Custom error types for the sequencing core.
//!
//! `PolarError` consolidates the failure modes of a run:
//!
//! - **`Configuration`**: semantic errors in the scan configuration (bad ROI
//!   bounds, non-positive step, ...). Raised during validation, before any
//!   hardware motion.
//! - **`Hardware`**: stage or camera communication failures. Always fatal for
//!   the run; there is no retry. Unattended continuation after a hardware
//!   fault is unsafe in this domain, so the operator must restart (optionally
//!   from cached fit logs).
//! - **`Timeout`**: a hardware polling loop exceeded its deadline. The
//!   original rig busy-waited forever on an unresponsive stage; bounded
//!   polling surfaces that condition instead.
//! - **`FitDegenerate`**: the crossed-Nicols fit failed to converge or
//!   produced non-finite parameters. Fatal for that polarizer angle; the raw
//!   sweep samples are still persisted for offline diagnosis.
//!
//! I/O, YAML and image encoding errors convert via `#[from]` so call sites
//! can use the `?` operator throughout.

use std::time::Duration;
use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, PolarError>;

#[derive(Error, Debug)]
pub enum PolarError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Hardware communication error: {0}")]
    Hardware(#[source] anyhow::Error),

    #[error("Timed out after {timeout:?} waiting for {operation}")]
    Timeout {
        operation: String,
        timeout: Duration,
    },

    #[error("Degenerate crossed-Nicols fit: {0}")]
    FitDegenerate(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Scan log error: {0}")]
    ScanLog(#[from] serde_yaml::Error),

    #[error("Image encoding error: {0}")]
    Image(#[from] image::ImageError),
}
