//! Discrete line search and Newton refinement for extinction angles.
//!
//! Two complementary procedures over physical stage moves:
//!
//! - [`ExtinctionSearch::line_search`]: coarse 1-degree hill descent of the
//!   transmitted intensity. A probe one degree up decides the descent
//!   direction against a noise threshold, then the stage steps monotonically
//!   until intensity stops decreasing.
//! - [`ExtinctionSearch::newton_refine`]: sub-degree refinement using
//!   finite-difference derivatives and Newton steps.
//!
//! Both assume the intensity-vs-angle curve is unimodal in the probe
//! neighborhood. There is no bounds checking against a global angular
//! domain, so a non-unimodal response can walk the stage arbitrarily far;
//! known limitation of the method, not guarded here.

use crate::averager::FrameAverager;
use crate::error::{AppResult, PolarError};
use crate::hardware::{wait_settled, Axis, FrameSource, RotationStage};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Intensity change below this is treated as noise.
pub const DEFAULT_NOISE_THRESHOLD: f64 = 0.5;
/// Newton iteration stops when the step magnitude drops below this.
const NEWTON_STEP_TOLERANCE_DEG: f64 = 0.05;
/// Newton iterations before the refinement is declared stuck.
const NEWTON_MAX_ITERATIONS: u32 = 32;

/// One optimization target: a stage axis plus its current best angle.
pub struct SearchTarget {
    pub stage: Arc<dyn RotationStage>,
    pub axis: Axis,
    pub angle: f64,
}

/// Intensity minimizer over rotation-stage moves.
pub struct ExtinctionSearch {
    averager: FrameAverager,
    settle_timeout: Duration,
    threshold: f64,
    probe_frames: u32,
}

impl ExtinctionSearch {
    pub fn new(camera: Arc<dyn FrameSource>, settle_timeout: Duration) -> Self {
        Self {
            averager: FrameAverager::new(camera),
            settle_timeout,
            threshold: DEFAULT_NOISE_THRESHOLD,
            probe_frames: 4,
        }
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    /// Whole-frame mean of a short frame average.
    async fn measure(&self) -> AppResult<f64> {
        let frame = self.averager.average(self.probe_frames, false).await?;
        Ok(frame.mean())
    }

    async fn move_settled(
        &self,
        stage: &dyn RotationStage,
        axis: Axis,
        angle: f64,
    ) -> AppResult<()> {
        stage
            .move_abs(axis, angle)
            .await
            .map_err(PolarError::Hardware)?;
        wait_settled(stage, "search step", self.settle_timeout).await
    }

    /// Coarse descent in 1-degree steps from `start_angle`.
    ///
    /// Returns the final stage angle and whether any descending step was
    /// taken. When the +1 degree probe lands within the noise threshold of
    /// the baseline the position is already at or near the minimum and the
    /// search stops immediately with `improved = false`.
    ///
    /// When the probe overshoots (intensity rose), the stage is repositioned
    /// to `start_angle` and descent proceeds downward from there; the
    /// tracked angle follows the physical reposition.
    pub async fn line_search(
        &self,
        stage: &dyn RotationStage,
        axis: Axis,
        start_angle: f64,
    ) -> AppResult<(f64, bool)> {
        self.move_settled(stage, axis, start_angle).await?;
        let mut min_intensity = self.measure().await?;

        let mut angle = start_angle + 1.0;
        self.move_settled(stage, axis, angle).await?;
        let probe = self.measure().await?;

        let mut direction = if min_intensity < probe - self.threshold {
            // Overshot past the minimum; fall back and descend the other way.
            angle = start_angle;
            self.move_settled(stage, axis, angle).await?;
            -1.0
        } else if probe < min_intensity - self.threshold {
            min_intensity = probe;
            1.0
        } else {
            0.0
        };

        let mut improved = false;
        while direction != 0.0 {
            angle += direction;
            self.move_settled(stage, axis, angle).await?;
            let intensity = self.measure().await?;
            debug!(angle, intensity, "line search step");

            if intensity > min_intensity - self.threshold {
                direction = 0.0;
            } else {
                min_intensity = intensity;
                improved = true;
            }
        }

        Ok((angle, improved))
    }

    /// Newton refinement below the 1-degree step size.
    ///
    /// First and second derivatives come from finite differences at +0.1 and
    /// +0.2 degrees; iteration stops once the Newton step magnitude falls
    /// below 0.05 degrees. Returns the final `(intensity, angle)`.
    pub async fn newton_refine(
        &self,
        stage: &dyn RotationStage,
        axis: Axis,
        start_angle: f64,
    ) -> AppResult<(f64, f64)> {
        let mut angle = start_angle;
        self.move_settled(stage, axis, angle).await?;
        let mut baseline = self.measure().await?;

        for _ in 0..NEWTON_MAX_ITERATIONS {
            let previous = angle;

            self.move_settled(stage, axis, angle + 0.1).await?;
            let intensity1 = self.measure().await?;
            self.move_settled(stage, axis, angle + 0.2).await?;
            let intensity2 = self.measure().await?;

            let first = (intensity1 - baseline) / 0.1;
            let second = (intensity2 - 2.0 * intensity1 + baseline) / 0.01;
            if second.abs() < f64::EPSILON {
                return Err(PolarError::FitDegenerate(
                    "vanishing curvature in Newton refinement".into(),
                ));
            }

            angle -= first / second;
            self.move_settled(stage, axis, angle).await?;
            baseline = self.measure().await?;
            debug!(angle, intensity = baseline, "newton step");

            if (previous - angle).abs() < NEWTON_STEP_TOLERANCE_DEG {
                return Ok((baseline, angle));
            }
        }

        Err(PolarError::FitDegenerate(
            "Newton refinement did not converge".into(),
        ))
    }

    /// Alternately line-search several stages (analyzer, quarter-wave plate)
    /// until a full pass improves none of them.
    pub async fn alternate(&self, targets: &mut [SearchTarget]) -> AppResult<()> {
        loop {
            let mut any_improved = false;
            for target in targets.iter_mut() {
                let (angle, improved) = self
                    .line_search(target.stage.as_ref(), target.axis, target.angle)
                    .await?;
                target.angle = angle;
                any_improved |= improved;
            }
            if !any_improved {
                info!("alternating search settled");
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Frame;
    use crate::hardware::mock::{SimCamera, SimCameraModel, SimStage};
    use anyhow::Result;
    use async_trait::async_trait;
    use tokio::sync::RwLock;

    fn rig(extinction_deg: f64) -> (Arc<SimStage>, Arc<SimCamera>) {
        let stage = Arc::new(SimStage::new());
        let model = SimCameraModel {
            extinction_deg,
            curvature: 10.0,
            floor: 100.0,
            ..SimCameraModel::default()
        };
        let camera = Arc::new(SimCamera::new(stage.clone(), model));
        (stage, camera)
    }

    #[tokio::test(start_paused = true)]
    async fn descends_to_minimum_from_below() {
        let (stage, camera) = rig(170.0);
        let search = ExtinctionSearch::new(camera, Duration::from_secs(30));

        let (angle, improved) = search
            .line_search(stage.as_ref(), Axis::Analyzer, 165.0)
            .await
            .unwrap();
        assert!(improved);
        // The search overshoots the minimum by at most one step.
        assert!((angle - 170.0).abs() <= 1.0, "angle {angle}");
    }

    #[tokio::test(start_paused = true)]
    async fn descends_to_minimum_from_above() {
        let (stage, camera) = rig(170.0);
        let search = ExtinctionSearch::new(camera, Duration::from_secs(30));

        let (angle, improved) = search
            .line_search(stage.as_ref(), Axis::Analyzer, 174.0)
            .await
            .unwrap();
        assert!(improved);
        assert!((angle - 170.0).abs() <= 1.0, "angle {angle}");
    }

    #[tokio::test(start_paused = true)]
    async fn reports_no_improvement_at_minimum() {
        let (stage, camera) = rig(170.0);
        // Curvature 10: intensity at 171 is 110 vs 100 at the vertex, well
        // above the default threshold, so the probe decides direction -1 and
        // the first descending step fails to improve.
        let search = ExtinctionSearch::new(camera, Duration::from_secs(30));

        let (angle, improved) = search
            .line_search(stage.as_ref(), Axis::Analyzer, 170.0)
            .await
            .unwrap();
        assert!(!improved);
        assert!((angle - 170.0).abs() <= 1.0, "angle {angle}");
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_searches_stay_at_minimum() {
        let (stage, camera) = rig(170.0);
        let search = ExtinctionSearch::new(camera, Duration::from_secs(30));

        let (first, _) = search
            .line_search(stage.as_ref(), Axis::Analyzer, 163.0)
            .await
            .unwrap();
        assert!((first - 170.0).abs() <= 1.0, "angle {first}");
        let (second, _) = search
            .line_search(stage.as_ref(), Axis::Analyzer, first)
            .await
            .unwrap();
        assert!((second - 170.0).abs() <= 1.0, "angle {second}");
        // A further pass from a point one step away finds nothing lower.
        let (third, improved) = search
            .line_search(stage.as_ref(), Axis::Analyzer, second)
            .await
            .unwrap();
        assert!((third - 170.0).abs() <= 1.0, "angle {third}");
        assert!(!improved);
    }

    #[tokio::test(start_paused = true)]
    async fn newton_refine_converges_below_step_size() {
        // Steep curvature keeps the finite differences well above the
        // camera's integer quantization.
        let stage = Arc::new(SimStage::new());
        let model = SimCameraModel {
            extinction_deg: 170.3,
            curvature: 1000.0,
            floor: 100.0,
            ..SimCameraModel::default()
        };
        let camera = Arc::new(SimCamera::new(stage.clone(), model));
        let search = ExtinctionSearch::new(camera, Duration::from_secs(30));

        let (intensity, angle) = search
            .newton_refine(stage.as_ref(), Axis::Analyzer, 170.0)
            .await
            .unwrap();
        assert!((angle - 170.3).abs() < 0.1, "angle {angle}");
        assert!(intensity < 105.0, "intensity {intensity}");
    }

    /// Camera reading two independent stages, for the alternating search.
    struct TwoAxisCamera {
        analyzer: Arc<SimStage>,
        waveplate: Arc<SimStage>,
        exposure_ms: RwLock<f64>,
    }

    #[async_trait]
    impl crate::hardware::FrameSource for TwoAxisCamera {
        async fn capture(&self, _discard_stale: bool) -> Result<Frame> {
            let a = self.analyzer.position(Axis::Analyzer).await - 167.0;
            let q = self.waveplate.position(Axis::Analyzer).await - 310.0;
            let value = 50.0 + 8.0 * a * a + 8.0 * q * q;
            Ok(Frame::constant(8, 8, value.round() as i16))
        }

        async fn set_exposure_ms(&self, exposure_ms: f64) -> Result<()> {
            *self.exposure_ms.write().await = exposure_ms;
            Ok(())
        }

        async fn exposure_ms(&self) -> f64 {
            *self.exposure_ms.read().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn alternating_search_settles_both_stages() {
        let analyzer = Arc::new(SimStage::new());
        let waveplate = Arc::new(SimStage::new());
        let camera = Arc::new(TwoAxisCamera {
            analyzer: analyzer.clone(),
            waveplate: waveplate.clone(),
            exposure_ms: RwLock::new(300.0),
        });
        let search = ExtinctionSearch::new(camera, Duration::from_secs(30));

        let mut targets = [
            SearchTarget {
                stage: analyzer.clone(),
                axis: Axis::Analyzer,
                angle: 163.0,
            },
            SearchTarget {
                stage: waveplate.clone(),
                axis: Axis::Analyzer,
                angle: 314.0,
            },
        ];
        search.alternate(&mut targets).await.unwrap();

        assert!((targets[0].angle - 167.0).abs() <= 1.0);
        assert!((targets[1].angle - 310.0).abs() <= 1.0);
    }
}
