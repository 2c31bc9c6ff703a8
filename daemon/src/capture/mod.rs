pub mod extract;
pub mod gesture;
pub mod replay;
pub mod worker;

use std::sync::{Arc, Mutex};
use std::time::Instant;
use thiserror::Error;

pub use extract::{HandExtractor, PoseExtractor};
pub use gesture::classify_gesture;
pub use replay::{RawFrame, RawHand, ReplaySource};
pub use worker::CaptureWorker;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Capture source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("Frame read failed: {0}")]
    Read(String),

    #[error("Landmark extraction failed: {0}")]
    Extract(String),

    #[error("Capture worker '{0}' is already running")]
    AlreadyRunning(String),

    #[error("Failed to spawn capture thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// A blocking sensor: a camera, a recording, anything that yields frames.
pub trait FrameSource: Send + 'static {
    type Frame: Send;

    /// Acquire the device. Called once before the worker thread starts.
    fn open(&mut self) -> Result<(), CaptureError>;

    /// Block until the next frame is available.
    fn read_frame(&mut self) -> Result<Self::Frame, CaptureError>;
}

/// Turns one frame into a published value. `Ok(None)` means nothing was
/// detected in this frame and the slot keeps its previous value.
pub trait LandmarkExtractor<F>: Send + 'static {
    type Output: Clone + Send + 'static;

    fn extract(&mut self, frame: &F, timestamp: f64) -> Result<Option<Self::Output>, CaptureError>;
}

/// Single-value cell shared between one producer thread and any number of
/// readers. Writers replace the whole value under the lock, so readers see
/// either the previous or the new value, never a mix.
pub struct LatestSlot<T> {
    inner: Arc<Mutex<Option<T>>>,
}

impl<T> Clone for LatestSlot<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Clone> LatestSlot<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(None)),
        }
    }

    pub fn publish(&self, value: T) {
        *self.inner.lock().unwrap_or_else(|e| e.into_inner()) = Some(value);
    }

    pub fn latest(&self) -> Option<T> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl<T: Clone> Default for LatestSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Monotonic seconds since the daemon started; shared by all workers so their
/// timestamps are comparable.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    pub fn now(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}
