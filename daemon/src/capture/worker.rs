use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use super::{CaptureError, FrameSource, LandmarkExtractor, LatestSlot, MonotonicClock};

const JOIN_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Runs one blocking acquire+extract loop on a dedicated thread and publishes
/// the newest result into its own [`LatestSlot`].
pub struct CaptureWorker<T> {
    name: String,
    slot: LatestSlot<T>,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl<T: Clone + Send + 'static> CaptureWorker<T> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            slot: LatestSlot::new(),
            running: Arc::new(AtomicBool::new(false)),
            handle: None,
        }
    }

    /// Open the source and start the capture thread.
    ///
    /// A source that cannot be opened leaves the worker stopped and returns
    /// the error; `latest()` then keeps returning `None`.
    pub fn start<S, E>(
        &mut self,
        mut source: S,
        mut extractor: E,
        clock: MonotonicClock,
        retry_delay: Duration,
    ) -> Result<(), CaptureError>
    where
        S: FrameSource,
        E: LandmarkExtractor<S::Frame, Output = T>,
    {
        if self.handle.is_some() {
            return Err(CaptureError::AlreadyRunning(self.name.clone()));
        }

        if let Err(e) = source.open() {
            error!("Capture worker '{}' failed to start: {}", self.name, e);
            self.running.store(false, Ordering::Release);
            return Err(e);
        }

        self.running.store(true, Ordering::Release);
        let running = Arc::clone(&self.running);
        let slot = self.slot.clone();
        let name = self.name.clone();

        let handle = thread::Builder::new()
            .name(format!("capture-{}", self.name))
            .spawn(move || {
                info!("Capture worker '{}' started", name);
                let mut consecutive_failures = 0u32;

                while running.load(Ordering::Acquire) {
                    match source.read_frame() {
                        Ok(frame) => {
                            if consecutive_failures > 0 {
                                info!(
                                    "Capture worker '{}' recovered after {} failed reads",
                                    name, consecutive_failures
                                );
                                consecutive_failures = 0;
                            }
                            match extractor.extract(&frame, clock.now()) {
                                Ok(Some(value)) => slot.publish(value),
                                Ok(None) => debug!("Capture worker '{}': nothing detected", name),
                                Err(e) => warn!("Capture worker '{}': {}", name, e),
                            }
                        }
                        Err(e) => {
                            if consecutive_failures == 0 {
                                warn!("Capture worker '{}': {}, retrying", name, e);
                            } else {
                                debug!("Capture worker '{}': {}", name, e);
                            }
                            consecutive_failures = consecutive_failures.saturating_add(1);
                            thread::sleep(retry_delay);
                        }
                    }
                }

                info!("Capture worker '{}' stopped", name);
            });

        match handle {
            Ok(handle) => {
                self.handle = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.running.store(false, Ordering::Release);
                Err(CaptureError::Spawn(e))
            }
        }
    }

    pub fn latest(&self) -> Option<T> {
        self.slot.latest()
    }

    /// A reader handle onto this worker's slot.
    pub fn slot(&self) -> LatestSlot<T> {
        self.slot.clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Signal the thread and wait at most `timeout` for it to exit.
    ///
    /// Returns `false` when the thread was still inside a blocking read at the
    /// deadline; it is detached and exits on its own after that read.
    pub fn stop(&mut self, timeout: Duration) -> bool {
        self.running.store(false, Ordering::Release);
        let Some(handle) = self.handle.take() else {
            return true;
        };

        let deadline = Instant::now() + timeout;
        while !handle.is_finished() {
            if Instant::now() >= deadline {
                warn!(
                    "Capture worker '{}' did not stop within {:?}, detaching",
                    self.name, timeout
                );
                return false;
            }
            thread::sleep(JOIN_POLL_INTERVAL);
        }

        if handle.join().is_err() {
            error!("Capture worker '{}' panicked", self.name);
        }
        true
    }
}

impl<T> Drop for CaptureWorker<T> {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
    }
}
