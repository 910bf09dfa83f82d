//! Polarizer-sweep sequence orchestration.
//!
//! For each polarizer angle the runner locates the extinction angle (fresh
//! crossed-Nicols scan, or a cached fit), adapts the camera exposure toward
//! the target intensity, captures a crossed-Nicols reference image at the
//! vertex plus domain images at symmetric offsets, persists everything, and
//! advances.
//!
//! The sequencing loop is strictly synchronous: every stage move blocks until
//! the hardware reports idle and every capture blocks until the frame
//! arrives. Any hardware failure aborts the whole run; the operator restarts,
//! optionally pointing `cn_info` at the previous run's logs to skip
//! re-locating extinction angles already found.

use crate::averager::FrameAverager;
use crate::config::ScanConfiguration;
use crate::error::{AppResult, PolarError};
use crate::exposure;
use crate::fit::FitResult;
use crate::hardware::{wait_settled, Axis, FrameSource, RotationStage};
use crate::locator::ExtinctionLocator;
use crate::preview::CaptureGate;
use crate::scan_log::{angle_label, ScanLog};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Analyzer angle of extinction at polarizer zero, degrees. Rig geometry:
/// the extinction estimate for polarizer angle `p` is `173 - p`.
pub const CROSSED_NICOLS_BASE_DEG: f64 = 173.0;

/// Default deadline for a single stage move to settle.
pub const DEFAULT_SETTLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Phases of one polarizer-angle iteration, for observability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    AtPolarizerAngle,
    LocatingExtinction,
    ExposureAdapted,
    CapturingReference,
    CapturingPositiveOffset,
    CapturingNegativeOffset,
    Advancing,
}

/// Mutable run state. Owned exclusively by the runner; no concurrent
/// writers.
#[derive(Debug)]
pub struct RunState {
    /// Advances monotonically by the polarizer step each outer iteration;
    /// terminal once it exceeds the sweep end.
    pub current_polarizer_angle: f64,
    /// Fit for the current iteration; replaced each time.
    pub fit: Option<FitResult>,
}

/// Drives the full measurement sequence over a sweep of polarizer angles.
pub struct SequenceRunner {
    config: ScanConfiguration,
    stage: Arc<dyn RotationStage>,
    camera: Arc<dyn FrameSource>,
    averager: FrameAverager,
    locator: ExtinctionLocator,
    gate: CaptureGate,
    settle_timeout: Duration,
    state: RunState,
}

impl SequenceRunner {
    /// Build a runner. Configuration is validated here, before any hardware
    /// motion.
    pub fn new(
        config: ScanConfiguration,
        stage: Arc<dyn RotationStage>,
        camera: Arc<dyn FrameSource>,
    ) -> AppResult<Self> {
        config.validate()?;
        let averager = FrameAverager::new(camera.clone());
        let locator =
            ExtinctionLocator::new(stage.clone(), camera.clone(), DEFAULT_SETTLE_TIMEOUT);
        let state = RunState {
            current_polarizer_angle: config.polarizer.angle_start,
            fit: None,
        };
        Ok(Self {
            config,
            stage,
            camera,
            averager,
            locator,
            gate: CaptureGate::new(),
            settle_timeout: DEFAULT_SETTLE_TIMEOUT,
            state,
        })
    }

    /// Gate shared with the live-preview producer; the runner holds a permit
    /// across every motion-synchronized capture section.
    pub fn capture_gate(&self) -> CaptureGate {
        self.gate.clone()
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    /// Run the sweep to completion.
    ///
    /// The loop exits once the polarizer angle strictly exceeds the sweep
    /// end; the angle may overshoot the end by up to one step.
    pub async fn run(&mut self) -> AppResult<()> {
        std::fs::create_dir_all(&self.config.output_folder)?;
        std::fs::create_dir_all(&self.config.log_folder)?;

        while self.state.current_polarizer_angle <= self.config.polarizer.angle_end {
            self.run_iteration().await?;
            self.phase(Phase::Advancing);
            self.state.current_polarizer_angle += self.config.polarizer.step;
        }
        info!("sweep complete");
        Ok(())
    }

    async fn run_iteration(&mut self) -> AppResult<()> {
        let polarizer_angle = self.state.current_polarizer_angle;
        info!(polarizer = polarizer_angle, "measuring polarizer angle");

        // Exclusive capture access for the whole motion-synchronized section.
        let _permit = self.gate.acquire().await;

        self.phase(Phase::AtPolarizerAngle);
        self.stage
            .move_abs(Axis::Polarizer, polarizer_angle)
            .await
            .map_err(PolarError::Hardware)?;
        wait_settled(
            self.stage.as_ref(),
            "polarizer move",
            self.settle_timeout,
        )
        .await?;

        self.phase(Phase::LocatingExtinction);
        let fit = match &self.config.cn_info {
            Some(cache_dir) => {
                let fit = ScanLog::load(cache_dir, polarizer_angle)?.fit_result()?;
                info!(vertex = fit.vertex_angle, "loaded cached fit");
                fit
            }
            None => {
                let center = CROSSED_NICOLS_BASE_DEG - polarizer_angle;
                self.locator
                    .locate(center, polarizer_angle, &self.config)
                    .await?
            }
        };
        self.state.fit = Some(fit);

        self.phase(Phase::ExposureAdapted);
        let exposure_ms = exposure::adapt(
            &fit,
            self.config.analyzer.angle,
            self.config.camera.intensity,
            self.config.camera.scan_time,
        );
        self.camera
            .set_exposure_ms(exposure_ms)
            .await
            .map_err(PolarError::Hardware)?;

        self.phase(Phase::CapturingReference);
        self.capture_image(fit.vertex_angle, "cn", polarizer_angle)
            .await?;

        self.phase(Phase::CapturingPositiveOffset);
        self.capture_image(
            fit.vertex_angle + self.config.analyzer.angle,
            "pos",
            polarizer_angle,
        )
        .await?;

        self.phase(Phase::CapturingNegativeOffset);
        let mut negative = fit.vertex_angle - self.config.analyzer.angle;
        if negative <= 0.0 {
            negative += 360.0;
        }
        self.capture_image(negative, "neg", polarizer_angle).await?;

        Ok(())
    }

    /// Move the analyzer, capture an adaptive average, and persist it as
    /// `<category>_<polarizer angle>.tif`.
    async fn capture_image(
        &self,
        analyzer_angle: f64,
        category: &str,
        polarizer_angle: f64,
    ) -> AppResult<PathBuf> {
        self.stage
            .move_abs(Axis::Analyzer, analyzer_angle)
            .await
            .map_err(PolarError::Hardware)?;
        wait_settled(self.stage.as_ref(), "analyzer move", self.settle_timeout).await?;

        let image = self
            .averager
            .average(self.config.capture.domain_capture_num, true)
            .await?;

        let path = self
            .config
            .output_folder
            .join(format!("{category}_{}.tif", angle_label(polarizer_angle)));
        image.save_tiff(&path)?;
        info!(path = %path.display(), "saved image");
        Ok(path)
    }

    fn phase(&self, phase: Phase) {
        tracing::debug!(?phase, polarizer = self.state.current_polarizer_angle, "phase");
    }
}
