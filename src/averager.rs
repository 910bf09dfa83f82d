//! Multi-frame averaging with an adaptive frame-count policy.

use crate::error::{AppResult, PolarError};
use crate::frame::Frame;
use crate::hardware::FrameSource;
use anyhow::anyhow;
use std::sync::Arc;
use tracing::debug;

/// Exposure below which four times as many frames are averaged.
const QUAD_FRAMES_BELOW_MS: f64 = 2000.0;
/// Exposure below which twice as many frames are averaged.
const DOUBLE_FRAMES_BELOW_MS: f64 = 4000.0;

/// Averages camera frames into a single image.
///
/// The first capture asks the source to discard one stale buffered frame
/// (hardware settling) and seeds the running mean; `frame_count` frames
/// accumulate in total. The mean is kept in `f64` per pixel,
/// `mean_{i+1} = (mean_i * i + frame) / (i + 1)`, and the result truncates to
/// `i16` as the camera's native depth.
///
/// With `adaptive` set, the effective frame count scales up at short
/// exposures (x4 below 2 s, x2 below 4 s) to keep photon-noise-limited SNR
/// roughly constant as exposure shortens.
///
/// A capture failure propagates immediately; there are no retries.
pub struct FrameAverager {
    camera: Arc<dyn FrameSource>,
}

impl FrameAverager {
    pub fn new(camera: Arc<dyn FrameSource>) -> Self {
        Self { camera }
    }

    pub async fn average(&self, frame_count: u32, adaptive: bool) -> AppResult<Frame> {
        let mut count = u64::from(frame_count.max(1));
        if adaptive {
            let exposure = self.camera.exposure_ms().await;
            if exposure < QUAD_FRAMES_BELOW_MS {
                count *= 4;
            } else if exposure < DOUBLE_FRAMES_BELOW_MS {
                count *= 2;
            }
        }
        debug!(frames = count, adaptive, "averaging frames");

        let first = self
            .camera
            .capture(true)
            .await
            .map_err(PolarError::Hardware)?;
        let rows = first.rows();
        let cols = first.cols();
        let mut mean: Vec<f64> = first.data().iter().map(|&v| f64::from(v)).collect();

        for i in 1..count {
            let frame = self
                .camera
                .capture(false)
                .await
                .map_err(PolarError::Hardware)?;
            if frame.rows() != rows || frame.cols() != cols {
                return Err(PolarError::Hardware(anyhow!(
                    "frame dimensions changed mid-average: {}x{} -> {}x{}",
                    rows,
                    cols,
                    frame.rows(),
                    frame.cols()
                )));
            }
            let i = i as f64;
            for (m, &v) in mean.iter_mut().zip(frame.data()) {
                *m = (*m * i + f64::from(v)) / (i + 1.0);
            }
        }

        Ok(Frame::new(
            rows,
            cols,
            mean.into_iter().map(|m| m as i16).collect(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::FrameSource;
    use anyhow::Result;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicI16, AtomicU64, Ordering};
    use tokio::sync::RwLock;

    /// Camera whose frames are constant-valued 1, 2, 3, ... per capture.
    struct CounterCamera {
        counter: AtomicI16,
        exposure_ms: RwLock<f64>,
        captures: AtomicU64,
    }

    impl CounterCamera {
        fn new(exposure_ms: f64) -> Self {
            Self {
                counter: AtomicI16::new(0),
                exposure_ms: RwLock::new(exposure_ms),
                captures: AtomicU64::new(0),
            }
        }
    }

    #[async_trait]
    impl FrameSource for CounterCamera {
        async fn capture(&self, _discard_stale: bool) -> Result<Frame> {
            self.captures.fetch_add(1, Ordering::SeqCst);
            let value = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(Frame::constant(4, 4, value))
        }

        async fn set_exposure_ms(&self, exposure_ms: f64) -> Result<()> {
            *self.exposure_ms.write().await = exposure_ms;
            Ok(())
        }

        async fn exposure_ms(&self) -> f64 {
            *self.exposure_ms.read().await
        }
    }

    #[tokio::test]
    async fn counting_frames_average_to_midpoint() {
        let camera = Arc::new(CounterCamera::new(5000.0));
        let averager = FrameAverager::new(camera);
        // Frames are 1..=10, mean 5.5, truncated to 5 at i16 depth.
        let image = averager.average(10, false).await.unwrap();
        assert!(image.data().iter().all(|&v| v == 5));
    }

    #[tokio::test]
    async fn constant_frames_average_exactly() {
        struct ConstCamera;
        #[async_trait]
        impl FrameSource for ConstCamera {
            async fn capture(&self, _discard_stale: bool) -> Result<Frame> {
                Ok(Frame::constant(4, 4, 321))
            }
            async fn set_exposure_ms(&self, _exposure_ms: f64) -> Result<()> {
                Ok(())
            }
            async fn exposure_ms(&self) -> f64 {
                1000.0
            }
        }

        let averager = FrameAverager::new(Arc::new(ConstCamera));
        let image = averager.average(7, false).await.unwrap();
        assert!(image.data().iter().all(|&v| v == 321));
    }

    #[tokio::test]
    async fn adaptive_count_quadruples_at_short_exposure() {
        let camera = Arc::new(CounterCamera::new(1000.0));
        let averager = FrameAverager::new(camera.clone());
        averager.average(4, true).await.unwrap();
        assert_eq!(camera.captures.load(Ordering::SeqCst), 16);
    }

    #[tokio::test]
    async fn adaptive_count_doubles_at_medium_exposure() {
        let camera = Arc::new(CounterCamera::new(3000.0));
        let averager = FrameAverager::new(camera.clone());
        averager.average(4, true).await.unwrap();
        assert_eq!(camera.captures.load(Ordering::SeqCst), 8);
    }

    #[tokio::test]
    async fn adaptive_count_unscaled_at_long_exposure() {
        let camera = Arc::new(CounterCamera::new(8000.0));
        let averager = FrameAverager::new(camera.clone());
        averager.average(4, true).await.unwrap();
        assert_eq!(camera.captures.load(Ordering::SeqCst), 4);
    }
}
