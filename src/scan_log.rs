//! Persisted scan logs and cached fit results.
//!
//! Each crossed-Nicols sweep writes one YAML file per polarizer angle,
//! `<angle>_scan_info.yaml`, holding the raw averaged samples and (when the
//! fit converged) the fitted parameters. A later run can point `cn_info` at
//! the log directory to reuse the fits instead of re-scanning.

use crate::error::{AppResult, PolarError};
use crate::fit::FitResult;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// One averaged-intensity measurement at one analyzer angle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScanSample {
    pub angle: f64,
    pub intensity: f64,
}

/// Angles closer than this are treated as the same scan point.
const ANGLE_EPS: f64 = 1e-9;

/// Accumulates sweep samples ordered by angle.
///
/// Duplicate angles fold into a running mean keyed by angle rather than
/// appearing twice, so a log always holds unique angles with the cumulative
/// mean of every capture at that angle.
#[derive(Debug, Default)]
pub struct ScanRecorder {
    samples: Vec<(ScanSample, u64)>,
}

impl ScanRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, angle: f64, intensity: f64) {
        match self
            .samples
            .iter_mut()
            .find(|(s, _)| (s.angle - angle).abs() < ANGLE_EPS)
        {
            Some((sample, count)) => {
                let n = *count as f64;
                sample.intensity = (sample.intensity * n + intensity) / (n + 1.0);
                *count += 1;
            }
            None => {
                let at = self
                    .samples
                    .partition_point(|(s, _)| s.angle < angle);
                self.samples.insert(at, (ScanSample { angle, intensity }, 1));
            }
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn angles(&self) -> Vec<f64> {
        self.samples.iter().map(|(s, _)| s.angle).collect()
    }

    pub fn intensities(&self) -> Vec<f64> {
        self.samples.iter().map(|(s, _)| s.intensity).collect()
    }

    /// Freeze the recorder into a persistable log.
    pub fn into_log(self, fit: Option<&FitResult>) -> ScanLog {
        ScanLog {
            angles: self.samples.iter().map(|(s, _)| s.angle).collect(),
            intensities: self.samples.iter().map(|(s, _)| s.intensity).collect(),
            fit_params: fit.map(|f| [f.slope, f.vertex_angle, f.intensity_floor]),
        }
    }
}

/// Persisted record of one crossed-Nicols sweep.
///
/// `fit_params` is `[slope, vertex_angle, intensity_floor]`; absent when the
/// fit degenerated (the raw samples are still written for offline diagnosis).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanLog {
    pub angles: Vec<f64>,
    pub intensities: Vec<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fit_params: Option<[f64; 3]>,
}

impl ScanLog {
    /// Log file name for a polarizer angle.
    pub fn file_name(polarizer_angle: f64) -> String {
        format!("{}_scan_info.yaml", angle_label(polarizer_angle))
    }

    /// Write the log under `log_dir`, keyed by the polarizer angle.
    pub fn save(&self, log_dir: &Path, polarizer_angle: f64) -> AppResult<PathBuf> {
        let path = log_dir.join(Self::file_name(polarizer_angle));
        let text = serde_yaml::to_string(self)?;
        std::fs::write(&path, text)?;
        Ok(path)
    }

    /// Load the log for a polarizer angle from `log_dir`.
    pub fn load(log_dir: &Path, polarizer_angle: f64) -> AppResult<Self> {
        let path = log_dir.join(Self::file_name(polarizer_angle));
        let text = std::fs::read_to_string(&path)?;
        Ok(serde_yaml::from_str(&text)?)
    }

    /// Fitted parameters, when the sweep's fit converged.
    pub fn fit_result(&self) -> AppResult<FitResult> {
        match self.fit_params {
            Some([slope, vertex_angle, intensity_floor]) => Ok(FitResult {
                slope,
                vertex_angle,
                intensity_floor,
            }),
            None => Err(PolarError::FitDegenerate(
                "scan log holds no fit parameters".into(),
            )),
        }
    }
}

/// Render an angle for file naming; integral angles drop the decimal point.
pub fn angle_label(angle: f64) -> String {
    if angle.fract() == 0.0 && angle.abs() < i64::MAX as f64 {
        format!("{}", angle as i64)
    } else {
        format!("{angle}")
    }
}
