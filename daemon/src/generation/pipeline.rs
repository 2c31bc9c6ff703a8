use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{
    artifact_filename, GenerationError, GenerationRequest, GenerationResult, ProviderChain,
};
use crate::config::{GenerationConfig, TimeoutsConfig};
use crate::rate_limit::SubmitRateLimiter;

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub output_dir: PathBuf,
    pub queue_capacity: usize,
    /// Longest the worker waits on an empty queue before rechecking for stop.
    pub poll_interval: Duration,
    pub provider_timeout: Duration,
    pub submits_per_minute: u32,
}

impl PipelineSettings {
    pub fn from_config(generation: &GenerationConfig, timeouts: &TimeoutsConfig) -> Self {
        Self {
            output_dir: generation.output_dir.clone(),
            queue_capacity: generation.queue_capacity.max(1),
            poll_interval: Duration::from_millis(generation.poll_interval_ms),
            provider_timeout: timeouts.provider_call_timeout(),
            submits_per_minute: generation.submits_per_minute,
        }
    }
}

/// FIFO queue of generation requests served by a single worker task.
pub struct GenerationPipeline {
    sender: mpsc::Sender<GenerationRequest>,
    results: mpsc::UnboundedReceiver<GenerationResult>,
    limiter: SubmitRateLimiter,
    provider: String,
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl GenerationPipeline {
    /// Spawn the worker. It exits when `cancel` (or its own stop) fires.
    pub fn start(
        chain: ProviderChain,
        settings: PipelineSettings,
        cancel: CancellationToken,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(settings.queue_capacity.max(1));
        let (result_tx, results) = mpsc::unbounded_channel();
        let provider = chain.label().to_string();
        let cancel = cancel.child_token();
        let limiter = SubmitRateLimiter::new(settings.submits_per_minute);

        info!(
            "Generation pipeline started: provider={}, output_dir={}, queue_capacity={}",
            provider,
            settings.output_dir.display(),
            settings.queue_capacity
        );

        let worker = Worker {
            chain: Arc::new(chain),
            settings,
            receiver,
            results: result_tx,
            cancel: cancel.clone(),
        };
        let handle = tokio::spawn(worker.run());

        Self {
            sender,
            results,
            limiter,
            provider,
            cancel,
            handle: Some(handle),
        }
    }

    /// Enqueue without waiting. Fails when rate limited, full or stopped.
    pub fn submit(&self, request: GenerationRequest) -> Result<(), GenerationError> {
        if !self.limiter.check() {
            return Err(GenerationError::RateLimited);
        }

        match self.sender.try_send(request) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(request)) => {
                debug!("Queue full, rejecting '{}'", request.prefix);
                Err(GenerationError::QueueFull)
            }
            Err(TrySendError::Closed(_)) => Err(GenerationError::QueueClosed),
        }
    }

    /// Next completed result, if one is waiting.
    pub fn try_next_result(&mut self) -> Option<GenerationResult> {
        self.results.try_recv().ok()
    }

    /// Wait for the next completed result. `None` once the worker has exited.
    pub async fn next_result(&mut self) -> Option<GenerationResult> {
        self.results.recv().await
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// Signal the worker and wait at most `wait` for it. A worker still busy
    /// with a request at the deadline is aborted. Returns whether it exited cleanly.
    pub async fn stop(&mut self, wait: Duration) -> bool {
        self.cancel.cancel();
        let Some(mut handle) = self.handle.take() else {
            return true;
        };

        match timeout(wait, &mut handle).await {
            Ok(Ok(())) => {
                info!("Generation pipeline stopped");
                true
            }
            Ok(Err(e)) => {
                error!("Generation worker failed: {}", e);
                false
            }
            Err(_) => {
                warn!("Generation worker did not stop within {:?}, aborting", wait);
                handle.abort();
                false
            }
        }
    }
}

impl Drop for GenerationPipeline {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct Worker {
    chain: Arc<ProviderChain>,
    settings: PipelineSettings,
    receiver: mpsc::Receiver<GenerationRequest>,
    results: mpsc::UnboundedSender<GenerationResult>,
    cancel: CancellationToken,
}

impl Worker {
    async fn run(mut self) {
        loop {
            let next = tokio::select! {
                _ = self.cancel.cancelled() => break,
                next = timeout(self.settings.poll_interval, self.receiver.recv()) => next,
            };

            match next {
                Ok(Some(request)) => self.process(request).await,
                Ok(None) => {
                    debug!("All submitters gone, generation worker exiting");
                    break;
                }
                // idle poll
                Err(_) => continue,
            }
        }
        debug!("Generation worker loop finished");
    }

    async fn process(&self, request: GenerationRequest) {
        info!("Processing generation request: {}", request.prefix);

        let Some((provider, bytes)) = self
            .chain
            .produce(&request, self.settings.provider_timeout)
            .await
        else {
            error!(
                "All providers failed for '{}', dropping request",
                request.prefix
            );
            return;
        };

        match persist(&self.settings.output_dir, &request.prefix, &bytes).await {
            Ok((filename, path)) => {
                info!("Image saved to {} ({})", path.display(), provider);
                let result = GenerationResult {
                    filename,
                    prefix: request.prefix,
                    path,
                    provider,
                    completed_at: SystemTime::now(),
                };
                if self.results.send(result).is_err() {
                    debug!("Result receiver dropped");
                }
            }
            Err(e) => error!("Failed to save '{}': {}", request.prefix, e),
        }
    }
}

async fn persist(
    output_dir: &Path,
    prefix: &str,
    bytes: &[u8],
) -> Result<(String, PathBuf), GenerationError> {
    let unix_seconds = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();
    let filename = artifact_filename(prefix, unix_seconds);
    let path = output_dir.join(&filename);

    tokio::fs::create_dir_all(output_dir).await?;
    tokio::fs::write(&path, bytes).await?;
    Ok((filename, path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::provider::ImageProvider;
    use futures_util::future::BoxFuture;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Records prompts in the order it serves them, and the most requests
    /// it ever had in flight at once.
    #[derive(Default)]
    struct Recorder {
        seen: Arc<Mutex<Vec<String>>>,
        in_flight: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
        delay: Duration,
    }

    impl ImageProvider for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }

        fn generate<'a>(
            &'a self,
            request: &'a GenerationRequest,
        ) -> BoxFuture<'a, Result<Option<Vec<u8>>, GenerationError>> {
            Box::pin(async move {
                let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                self.peak.fetch_max(now, Ordering::SeqCst);
                self.seen.lock().unwrap().push(request.prompt.clone());
                tokio::time::sleep(self.delay).await;
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok(Some(request.prompt.as_bytes().to_vec()))
            })
        }
    }

    struct Failing;

    impl ImageProvider for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        fn generate<'a>(
            &'a self,
            _request: &'a GenerationRequest,
        ) -> BoxFuture<'a, Result<Option<Vec<u8>>, GenerationError>> {
            Box::pin(async { Err(GenerationError::Provider("down".to_string())) })
        }
    }

    fn settings(dir: &Path) -> PipelineSettings {
        PipelineSettings {
            output_dir: dir.to_path_buf(),
            queue_capacity: 8,
            poll_interval: Duration::from_millis(20),
            provider_timeout: Duration::from_secs(2),
            submits_per_minute: 0,
        }
    }

    async fn next(pipeline: &mut GenerationPipeline) -> GenerationResult {
        timeout(Duration::from_secs(5), pipeline.next_result())
            .await
            .expect("timed out waiting for result")
            .expect("worker exited")
    }

    fn start(chain: ProviderChain, dir: &Path) -> GenerationPipeline {
        GenerationPipeline::start(chain, settings(dir), CancellationToken::new())
    }

    #[tokio::test]
    async fn test_requests_processed_in_fifo_order() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = Recorder {
            delay: Duration::from_millis(30),
            ..Default::default()
        };
        let seen = Arc::clone(&recorder.seen);
        let peak = Arc::clone(&recorder.peak);
        let chain = ProviderChain::new("test", vec![Box::new(recorder)]);
        let mut pipeline = start(chain, dir.path());

        for name in ["a", "b", "c"] {
            pipeline.submit(GenerationRequest::new(name, name)).unwrap();
        }

        let prefixes: Vec<String> = vec![
            next(&mut pipeline).await.prefix,
            next(&mut pipeline).await.prefix,
            next(&mut pipeline).await.prefix,
        ];
        assert_eq!(prefixes, vec!["a", "b", "c"]);
        assert_eq!(*seen.lock().unwrap(), vec!["a", "b", "c"]);
        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert!(pipeline.stop(Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn test_local_chain_writes_placeholder() {
        let dir = tempfile::tempdir().unwrap();
        let mut pipeline = start(ProviderChain::local(), dir.path());
        assert_eq!(pipeline.provider(), "local");

        pipeline
            .submit(GenerationRequest::new("fireball texture", "test"))
            .unwrap();
        let result = next(&mut pipeline).await;

        assert!(result.filename.starts_with("test_"));
        assert!(result.filename.ends_with(".png"));
        assert_eq!(result.provider, "local");
        assert_eq!(result.path, dir.path().join(&result.filename));

        let image = image::open(&result.path).unwrap();
        assert_eq!((image.width(), image.height()), (512, 512));
        pipeline.stop(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_total_failure_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let chain = ProviderChain::new("test", vec![Box::new(Failing)]);
        let mut pipeline = start(chain, dir.path());

        pipeline.submit(GenerationRequest::new("x", "x")).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(pipeline.try_next_result().is_none());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
        assert!(pipeline.stop(Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn test_falls_through_to_local() {
        let dir = tempfile::tempdir().unwrap();
        let chain = ProviderChain::new("test", vec![Box::new(Failing)]).with_local_fallback();
        let mut pipeline = start(chain, dir.path());

        pipeline.submit(GenerationRequest::new("x", "rune")).unwrap();
        let result = next(&mut pipeline).await;
        assert_eq!(result.provider, "local");
        assert!(result.path.exists());
        pipeline.stop(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_submit_rejects_when_queue_full() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = Recorder {
            delay: Duration::from_secs(10),
            ..Default::default()
        };
        let chain = ProviderChain::new("test", vec![Box::new(recorder)]);
        let mut settings = settings(dir.path());
        settings.queue_capacity = 1;
        let mut pipeline = GenerationPipeline::start(chain, settings, CancellationToken::new());

        // first is picked up by the worker, second fills the queue
        pipeline.submit(GenerationRequest::new("1", "one")).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        pipeline.submit(GenerationRequest::new("2", "two")).unwrap();

        assert!(matches!(
            pipeline.submit(GenerationRequest::new("3", "three")),
            Err(GenerationError::QueueFull)
        ));
        assert!(!pipeline.stop(Duration::from_millis(50)).await);
    }

    #[tokio::test]
    async fn test_submit_rate_limited() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = settings(dir.path());
        settings.submits_per_minute = 2;
        let mut pipeline =
            GenerationPipeline::start(ProviderChain::local(), settings, CancellationToken::new());

        assert!(pipeline.submit(GenerationRequest::new("a", "a")).is_ok());
        assert!(pipeline.submit(GenerationRequest::new("b", "b")).is_ok());
        assert!(matches!(
            pipeline.submit(GenerationRequest::new("c", "c")),
            Err(GenerationError::RateLimited)
        ));
        pipeline.stop(Duration::from_secs(2)).await;
    }

    #[tokio::test]
    async fn test_stop_is_prompt_when_idle() {
        let dir = tempfile::tempdir().unwrap();
        let mut pipeline = start(ProviderChain::local(), dir.path());

        let started = std::time::Instant::now();
        assert!(pipeline.stop(Duration::from_secs(1)).await);
        assert!(started.elapsed() < Duration::from_millis(500));
        assert!(matches!(
            pipeline.submit(GenerationRequest::new("late", "late")),
            Err(GenerationError::QueueClosed)
        ));
    }

    #[tokio::test]
    async fn test_parent_cancel_stops_worker() {
        let dir = tempfile::tempdir().unwrap();
        let parent = CancellationToken::new();
        let mut pipeline =
            GenerationPipeline::start(ProviderChain::local(), settings(dir.path()), parent.clone());

        parent.cancel();
        assert!(pipeline.stop(Duration::from_secs(1)).await);
    }
}
