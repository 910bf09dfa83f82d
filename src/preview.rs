//! Live-preview frame production and capture arbitration.
//!
//! The camera cannot service unsolicited preview triggers while the
//! sequencer runs motion-synchronized captures. A [`CaptureGate`] arbitrates
//! exclusive capture access: the sequencer holds a permit across each
//! multi-step scan or domain capture, and the preview producer grabs frames
//! only between permits. Frames flow through a bounded channel; when the
//! consumer lags, new frames are dropped rather than queued without bound.

use crate::frame::Frame;
use crate::hardware::FrameSource;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::{watch, Mutex, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tracing::warn;

/// Exclusive capture access shared by the sequencer and the preview task.
#[derive(Clone)]
pub struct CaptureGate {
    inner: Arc<Mutex<()>>,
}

/// Held while its owner may trigger the camera.
pub struct CapturePermit {
    _guard: OwnedMutexGuard<()>,
}

impl CaptureGate {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(())),
        }
    }

    /// Wait for exclusive capture access.
    pub async fn acquire(&self) -> CapturePermit {
        CapturePermit {
            _guard: self.inner.clone().lock_owned().await,
        }
    }
}

impl Default for CaptureGate {
    fn default() -> Self {
        Self::new()
    }
}

/// Background producer feeding a bounded live-preview channel.
pub struct LivePreview {
    frames: mpsc::Receiver<Frame>,
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl LivePreview {
    /// Spawn the producer. `frame_interval` paces free-running capture;
    /// `capacity` bounds the channel.
    pub fn spawn(
        camera: Arc<dyn FrameSource>,
        gate: CaptureGate,
        capacity: usize,
        frame_interval: Duration,
    ) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        let (stop_tx, stop_rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            loop {
                if *stop_rx.borrow() {
                    break;
                }
                // Pauses here whenever the sequencer holds the gate.
                let permit = gate.acquire().await;
                let captured = camera.capture(false).await;
                drop(permit);

                match captured {
                    Ok(frame) => match tx.try_send(frame) {
                        Ok(()) => {}
                        // Consumer lagging; drop the frame.
                        Err(TrySendError::Full(_)) => {}
                        Err(TrySendError::Closed(_)) => break,
                    },
                    Err(err) => {
                        warn!(error = %err, "preview capture failed, stopping producer");
                        break;
                    }
                }
                tokio::time::sleep(frame_interval).await;
            }
        });

        Self {
            frames: rx,
            stop: stop_tx,
            task,
        }
    }

    /// Receive the next preview frame, if the producer is still running.
    pub async fn recv(&mut self) -> Option<Frame> {
        self.frames.recv().await
    }

    /// Signal the producer to exit without waiting for it.
    pub fn shutdown(&self) {
        let _ = self.stop.send(true);
    }

    /// Stop the producer and wait for it to exit.
    pub async fn stop(self) {
        let _ = self.stop.send(true);
        drop(self.frames);
        let _ = self.task.await;
    }
}
