//! Crossed-Nicols sweep and extinction-angle fit.
//!
//! A fixed-width angular window straddles the estimated extinction angle;
//! the analyzer steps across it while the camera averages frames at the scan
//! exposure, and a quadratic fit of the averaged ROI intensities locates the
//! extinction angle precisely.

use crate::averager::FrameAverager;
use crate::config::ScanConfiguration;
use crate::error::{AppResult, PolarError};
use crate::fit::{fit_quadratic, FitResult};
use crate::hardware::{wait_settled, Axis, FrameSource, RotationStage};
use crate::scan_log::ScanRecorder;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Full width of the scan window, degrees.
pub const SCAN_WINDOW_DEG: f64 = 4.0;
/// Angular step between scan points, degrees.
pub const SCAN_STEP_DEG: f64 = 0.2;

/// Locates the extinction angle for the current polarizer position.
pub struct ExtinctionLocator {
    stage: Arc<dyn RotationStage>,
    camera: Arc<dyn FrameSource>,
    averager: FrameAverager,
    settle_timeout: Duration,
}

impl ExtinctionLocator {
    pub fn new(
        stage: Arc<dyn RotationStage>,
        camera: Arc<dyn FrameSource>,
        settle_timeout: Duration,
    ) -> Self {
        let averager = FrameAverager::new(camera.clone());
        Self {
            stage,
            camera,
            averager,
            settle_timeout,
        }
    }

    /// Sweep the analyzer around `center_estimate`, fit, and persist the log
    /// keyed by `polarizer_angle`.
    ///
    /// The window start wraps into (0, 360]. On a degenerate fit the raw
    /// samples are still written before the error propagates.
    pub async fn locate(
        &self,
        center_estimate: f64,
        polarizer_angle: f64,
        config: &ScanConfiguration,
    ) -> AppResult<FitResult> {
        let mut start = center_estimate - SCAN_WINDOW_DEG / 2.0;
        if start <= 0.0 {
            start += 360.0;
        }
        let roi = config.roi()?;
        let steps = (SCAN_WINDOW_DEG / SCAN_STEP_DEG).round() as usize;

        self.camera
            .set_exposure_ms(config.camera.scan_time)
            .await
            .map_err(PolarError::Hardware)?;

        info!(
            polarizer = polarizer_angle,
            window_start = start,
            "starting crossed-Nicols scan"
        );

        let mut recorder = ScanRecorder::new();
        for k in 0..steps {
            let angle = start + k as f64 * SCAN_STEP_DEG;
            self.stage
                .move_abs(Axis::Analyzer, angle)
                .await
                .map_err(PolarError::Hardware)?;
            wait_settled(self.stage.as_ref(), "analyzer scan step", self.settle_timeout).await?;

            let image = self.averager.average(config.capture.scan_num, false).await?;
            let intensity = image.roi_mean(&roi)?;
            debug!(angle, intensity, "scan point");
            recorder.record(angle, intensity);
        }

        match fit_quadratic(&recorder.angles(), &recorder.intensities(), start) {
            Ok(fit) => {
                recorder
                    .into_log(Some(&fit))
                    .save(&config.log_folder, polarizer_angle)?;
                info!(
                    vertex = fit.vertex_angle,
                    floor = fit.intensity_floor,
                    slope = fit.slope,
                    "crossed-Nicols fit complete"
                );
                Ok(fit)
            }
            Err(err) => {
                // Keep the raw sweep for offline diagnosis.
                recorder
                    .into_log(None)
                    .save(&config.log_folder, polarizer_angle)?;
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScanConfiguration;
    use crate::hardware::mock::{SimCamera, SimCameraModel, SimStage};
    use crate::scan_log::ScanLog;

    fn test_config(log_dir: &std::path::Path) -> ScanConfiguration {
        let yaml = format!(
            r#"
capture:
  scan_num: 2
  domain_capture_num: 4
camera:
  roi: [8, 56, 8, 56]
  intensity: 3000
  scan_time: 300
analyzer:
  angle: 3.15
polarizer:
  angle_start: 0
  angle_end: 0
  step: 10
output_folder: {dir}
log_folder: {dir}
"#,
            dir = log_dir.display()
        );
        ScanConfiguration::from_yaml(&yaml).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn locates_simulated_extinction_angle() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());

        let stage = Arc::new(SimStage::new());
        let camera = Arc::new(SimCamera::new(stage.clone(), SimCameraModel::default()));
        let locator = ExtinctionLocator::new(
            stage.clone(),
            camera.clone(),
            Duration::from_secs(30),
        );

        // Model extinction sits at 172.5; estimate within half a window.
        let fit = locator.locate(173.0, 0.0, &config).await.unwrap();
        assert!(
            (fit.vertex_angle - 172.5).abs() < 0.1,
            "vertex {}",
            fit.vertex_angle
        );
        assert!(fit.slope > 0.0);

        // Scan exposure was applied before the sweep.
        assert_eq!(camera.exposure_ms().await, 300.0);

        // Log persisted and loadable through the cached-fit path.
        let log = ScanLog::load(dir.path(), 0.0).unwrap();
        assert_eq!(log.angles.len(), 20);
        let cached = log.fit_result().unwrap();
        assert_eq!(cached.vertex_angle, fit.vertex_angle);
    }

    #[tokio::test(start_paused = true)]
    async fn roi_larger_than_the_sensor_fails_fast() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path());
        // Sensor is 64x64; this ROI reads past it.
        config.camera.roi = [8, 200, 8, 200];

        let stage = Arc::new(SimStage::new());
        let camera = Arc::new(SimCamera::new(stage.clone(), SimCameraModel::default()));
        let locator = ExtinctionLocator::new(stage, camera, Duration::from_secs(30));

        let err = locator.locate(173.0, 0.0, &config).await.unwrap_err();
        assert!(
            matches!(err, crate::error::PolarError::Configuration(_)),
            "got {err:?}"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn window_start_wraps_below_zero() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());

        let stage = Arc::new(SimStage::new());
        let model = SimCameraModel {
            extinction_deg: 359.0,
            ..SimCameraModel::default()
        };
        let camera = Arc::new(SimCamera::new(stage.clone(), model));
        let locator = ExtinctionLocator::new(stage, camera, Duration::from_secs(30));

        // center 1.0 -> raw start -1.0 -> wrapped to 359.0
        let fit = locator.locate(1.0, 0.0, &config).await.unwrap();
        let log = ScanLog::load(dir.path(), 0.0).unwrap();
        assert!((log.angles[0] - 359.0).abs() < 1e-9);
        assert!((fit.vertex_angle - 359.0).abs() < 0.1);
    }
}
