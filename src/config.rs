//! Scan configuration loading and validation.
//!
//! A run is described by a single YAML document:
//!
//! ```yaml
//! capture:
//!   scan_num: 4            # frames averaged per scan point
//!   domain_capture_num: 16 # frames averaged per domain image
//! camera:
//!   roi: [500, 1000, 1000, 1500]  # row_start, row_end, col_start, col_end
//!   intensity: 3000               # target mean intensity for domain images
//!   scan_time: 300                # scan exposure, milliseconds
//! analyzer:
//!   angle: 3.15            # domain-capture offset from extinction, degrees
//! polarizer:
//!   angle_start: 0
//!   angle_end: 10
//!   step: 10
//! cn_info: null            # optional: directory of cached fit logs
//! output_folder: ./outputs/output
//! log_folder: ./outputs/log
//! ```
//!
//! The configuration is immutable once loaded. `validate` runs before any
//! hardware motion and reports the first violation as
//! [`PolarError::Configuration`].

use crate::error::{AppResult, PolarError};
use crate::frame::Roi;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Frame counts for averaging.
#[derive(Debug, Clone, Deserialize)]
pub struct CaptureSettings {
    /// Frames averaged at each crossed-Nicols scan point.
    pub scan_num: u32,
    /// Frames averaged for each domain image (before adaptive scaling).
    pub domain_capture_num: u32,
}

/// Camera settings for the crossed-Nicols scan.
#[derive(Debug, Clone, Deserialize)]
pub struct CameraSettings {
    /// Region of interest: `[row_start, row_end, col_start, col_end]`.
    pub roi: [u32; 4],
    /// Target mean intensity for domain images.
    pub intensity: f64,
    /// Exposure time used during the crossed-Nicols scan, milliseconds.
    pub scan_time: f64,
}

/// Analyzer offset used for domain capture.
#[derive(Debug, Clone, Deserialize)]
pub struct AnalyzerSettings {
    /// Angular offset from the extinction angle, degrees.
    pub angle: f64,
}

/// Polarizer sweep bounds.
#[derive(Debug, Clone, Deserialize)]
pub struct PolarizerSweep {
    pub angle_start: f64,
    pub angle_end: f64,
    pub step: f64,
}

/// Immutable measurement configuration for one sequence run.
#[derive(Debug, Clone, Deserialize)]
pub struct ScanConfiguration {
    pub capture: CaptureSettings,
    pub camera: CameraSettings,
    pub analyzer: AnalyzerSettings,
    pub polarizer: PolarizerSweep,
    /// When set, fit results are loaded from this directory instead of
    /// re-running the crossed-Nicols scan.
    #[serde(default)]
    pub cn_info: Option<PathBuf>,
    pub output_folder: PathBuf,
    pub log_folder: PathBuf,
}

impl ScanConfiguration {
    /// Load and validate a configuration from a YAML file.
    pub fn load(path: &Path) -> AppResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml(&text)
    }

    /// Parse and validate a configuration from YAML text.
    ///
    /// Parse failures (malformed YAML, missing or mistyped fields) are
    /// configuration errors, not scan-log errors.
    pub fn from_yaml(text: &str) -> AppResult<Self> {
        let config: Self = serde_yaml::from_str(text)
            .map_err(|err| PolarError::Configuration(format!("malformed document: {err}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Check semantic constraints that the YAML schema cannot express.
    pub fn validate(&self) -> AppResult<()> {
        if self.capture.scan_num < 1 {
            return Err(PolarError::Configuration(
                "capture.scan_num must be at least 1".into(),
            ));
        }
        if self.capture.domain_capture_num < 1 {
            return Err(PolarError::Configuration(
                "capture.domain_capture_num must be at least 1".into(),
            ));
        }
        // Validates ordering of the ROI bounds.
        self.roi()?;
        if self.camera.intensity <= 0.0 {
            return Err(PolarError::Configuration(
                "camera.intensity must be positive".into(),
            ));
        }
        if self.camera.scan_time <= 0.0 {
            return Err(PolarError::Configuration(
                "camera.scan_time must be positive".into(),
            ));
        }
        if self.polarizer.step <= 0.0 {
            return Err(PolarError::Configuration(
                "polarizer.step must be positive".into(),
            ));
        }
        if self.polarizer.angle_start > self.polarizer.angle_end {
            return Err(PolarError::Configuration(format!(
                "polarizer.angle_start ({}) exceeds angle_end ({})",
                self.polarizer.angle_start, self.polarizer.angle_end
            )));
        }
        Ok(())
    }

    /// Region of interest used for intensity averaging.
    pub fn roi(&self) -> AppResult<Roi> {
        let [row_start, row_end, col_start, col_end] = self.camera.roi;
        Roi::new(
            row_start as usize,
            row_end as usize,
            col_start as usize,
            col_end as usize,
        )
    }
}
