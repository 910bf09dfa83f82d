//! Simulated hardware implementations.
//!
//! Provides deterministic stand-ins for the rotation controller and the CCD
//! camera so the full sequencing stack can run without a rig attached.
//!
//! - `SimStage` - two-axis rotation stage with a scripted busy flag
//! - `SimCamera` - camera whose intensity follows a quadratic of the analyzer
//!   angle around a configurable extinction angle, scaled linearly by
//!   exposure time
//!
//! All operations use async-safe primitives; no blocking sleeps.

use super::{Axis, FrameSource, RotationStage};
use crate::frame::Frame;
use anyhow::Result;
use async_trait::async_trait;
use rand::Rng;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Simulated two-axis rotation stage.
///
/// Moves complete instantly but the busy flag stays raised for a configured
/// number of polls, so callers still exercise the settle loop.
pub struct SimStage {
    positions: RwLock<[f64; 2]>,
    busy_polls: AtomicU32,
    settle_polls: u32,
}

impl SimStage {
    pub fn new() -> Self {
        Self::with_settle_polls(2)
    }

    /// `settle_polls` busy readings are reported after every move.
    pub fn with_settle_polls(settle_polls: u32) -> Self {
        Self {
            positions: RwLock::new([0.0; 2]),
            busy_polls: AtomicU32::new(0),
            settle_polls,
        }
    }

    /// Current commanded position of an axis, degrees.
    pub async fn position(&self, axis: Axis) -> f64 {
        self.positions.read().await[Self::index(axis)]
    }

    fn index(axis: Axis) -> usize {
        match axis {
            Axis::Polarizer => 0,
            Axis::Analyzer => 1,
        }
    }
}

impl Default for SimStage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RotationStage for SimStage {
    async fn move_abs(&self, axis: Axis, degrees: f64) -> Result<()> {
        self.positions.write().await[Self::index(axis)] = degrees;
        self.busy_polls.store(self.settle_polls, Ordering::SeqCst);
        Ok(())
    }

    async fn is_busy(&self) -> Result<bool> {
        let was_busy = self
            .busy_polls
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        Ok(was_busy)
    }
}

/// Optical response model for [`SimCamera`].
///
/// Transmitted intensity follows `floor + curvature * (analyzer - extinction)^2`
/// at the reference exposure, scaled linearly with exposure time.
#[derive(Debug, Clone, Copy)]
pub struct SimCameraModel {
    /// Analyzer angle of minimum transmission, degrees.
    pub extinction_deg: f64,
    /// Quadratic curvature, intensity units per degree squared.
    pub curvature: f64,
    /// Intensity floor at extinction.
    pub floor: f64,
    /// Exposure at which the model is calibrated, milliseconds.
    pub reference_exposure_ms: f64,
    /// Uniform noise amplitude added per frame; zero for deterministic tests.
    pub noise: f64,
}

impl Default for SimCameraModel {
    fn default() -> Self {
        Self {
            extinction_deg: 172.5,
            curvature: 50.0,
            floor: 500.0,
            reference_exposure_ms: 300.0,
            noise: 0.0,
        }
    }
}

/// Simulated CCD camera coupled to a [`SimStage`].
pub struct SimCamera {
    stage: Arc<SimStage>,
    model: SimCameraModel,
    rows: usize,
    cols: usize,
    exposure_ms: RwLock<f64>,
}

impl SimCamera {
    pub fn new(stage: Arc<SimStage>, model: SimCameraModel) -> Self {
        Self::with_dimensions(stage, model, 64, 64)
    }

    pub fn with_dimensions(
        stage: Arc<SimStage>,
        model: SimCameraModel,
        rows: usize,
        cols: usize,
    ) -> Self {
        let exposure = model.reference_exposure_ms;
        Self {
            stage,
            model,
            rows,
            cols,
            exposure_ms: RwLock::new(exposure),
        }
    }

    async fn intensity(&self) -> f64 {
        let analyzer = self.stage.position(Axis::Analyzer).await;
        let delta = analyzer - self.model.extinction_deg;
        let at_reference = self.model.floor + self.model.curvature * delta * delta;
        let exposure = *self.exposure_ms.read().await;
        at_reference * exposure / self.model.reference_exposure_ms
    }
}

#[async_trait]
impl FrameSource for SimCamera {
    async fn capture(&self, _discard_stale: bool) -> Result<Frame> {
        let intensity = self.intensity().await;
        let noise = self.model.noise;
        let mut rng = rand::thread_rng();
        let frame = Frame::from_fn(self.rows, self.cols, |_, _| {
            let jitter = if noise > 0.0 {
                rng.gen_range(-noise..=noise)
            } else {
                0.0
            };
            (intensity + jitter).round().clamp(0.0, f64::from(i16::MAX)) as i16
        });
        Ok(frame)
    }

    async fn set_exposure_ms(&self, exposure_ms: f64) -> Result<()> {
        *self.exposure_ms.write().await = exposure_ms;
        Ok(())
    }

    async fn exposure_ms(&self) -> f64 {
        *self.exposure_ms.read().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn stage_reports_busy_then_settles() {
        let stage = SimStage::new();
        stage.move_abs(Axis::Analyzer, 45.0).await.unwrap();
        assert!(stage.is_busy().await.unwrap());
        assert!(stage.is_busy().await.unwrap());
        assert!(!stage.is_busy().await.unwrap());
        assert_eq!(stage.position(Axis::Analyzer).await, 45.0);
        // The other axis is untouched.
        assert_eq!(stage.position(Axis::Polarizer).await, 0.0);
    }

    #[tokio::test]
    async fn camera_intensity_is_quadratic_in_analyzer_angle() {
        let stage = Arc::new(SimStage::with_settle_polls(0));
        let camera = SimCamera::new(stage.clone(), SimCameraModel::default());

        stage.move_abs(Axis::Analyzer, 172.5).await.unwrap();
        let at_extinction = camera.capture(false).await.unwrap().mean();

        stage.move_abs(Axis::Analyzer, 174.5).await.unwrap();
        let off_extinction = camera.capture(false).await.unwrap().mean();

        assert_eq!(at_extinction, 500.0);
        // floor + curvature * 2^2 = 500 + 200
        assert_eq!(off_extinction, 700.0);
    }

    #[tokio::test]
    async fn camera_intensity_scales_with_exposure() {
        let stage = Arc::new(SimStage::with_settle_polls(0));
        let camera = SimCamera::new(stage.clone(), SimCameraModel::default());
        stage.move_abs(Axis::Analyzer, 172.5).await.unwrap();

        camera.set_exposure_ms(600.0).await.unwrap();
        let doubled = camera.capture(false).await.unwrap().mean();
        assert_eq!(doubled, 1000.0);
    }
}
