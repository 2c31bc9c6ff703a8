use shared::{Command, HandResult, ServerMessage, Snapshot};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::broadcast::BroadcastHub;
use crate::capture::{CaptureWorker, LatestSlot};
use crate::config::RulesConfig;
use crate::generation::{GenerationError, GenerationPipeline, GenerationRequest, GenerationResult};
use crate::rules::RuleEngine;

/// A background worker the orchestrator owns and stops on shutdown.
pub trait ManagedWorker: Send {
    fn name(&self) -> &str;

    /// Blocking; waits at most `timeout`.
    fn stop(&mut self, timeout: Duration) -> bool;
}

impl<T: Clone + Send + 'static> ManagedWorker for CaptureWorker<T> {
    fn name(&self) -> &str {
        CaptureWorker::name(self)
    }

    fn stop(&mut self, timeout: Duration) -> bool {
        CaptureWorker::stop(self, timeout)
    }
}

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub tick: Duration,
    pub shutdown_timeout: Duration,
    pub public_url_prefix: String,
}

/// Fixed-rate loop joining the capture slots, the rule engine, the generation
/// pipeline and the broadcast hub. Never blocks on a sensor or the network
/// except through the hub's bounded sends.
pub struct Orchestrator {
    pose: LatestSlot<Snapshot>,
    /// `None` when hand tracking is disabled.
    hands: Option<LatestSlot<Vec<HandResult>>>,
    rules: RuleEngine,
    pipeline: GenerationPipeline,
    hub: Arc<BroadcastHub>,
    settings: OrchestratorSettings,
    /// In start order.
    workers: Vec<Box<dyn ManagedWorker>>,
}

impl Orchestrator {
    pub fn new(
        pose: LatestSlot<Snapshot>,
        hands: Option<LatestSlot<Vec<HandResult>>>,
        rules: RulesConfig,
        pipeline: GenerationPipeline,
        hub: Arc<BroadcastHub>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            pose,
            hands,
            rules: RuleEngine::new(rules),
            pipeline,
            hub,
            settings,
            workers: Vec::new(),
        }
    }

    /// Hand over a started worker. Workers are stopped in reverse order of adding.
    pub fn add_worker(&mut self, worker: Box<dyn ManagedWorker>) {
        self.workers.push(worker);
    }

    pub fn pipeline(&self) -> &GenerationPipeline {
        &self.pipeline
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        let mut ticker = interval(self.settings.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!("Orchestrator running every {:?}", self.settings.tick);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.tick().await;
                }
            }
        }

        info!("Orchestrator cancelled, shutting down");
        self.shutdown().await;
    }

    /// One iteration: broadcast the merged update (if a pose exists), then
    /// push any finished textures. Returns the update that was sent.
    pub async fn tick(&mut self) -> Option<ServerMessage> {
        let update = self.step();
        if let Some(message) = &update {
            self.hub.broadcast(message).await;
        }
        self.push_results().await;
        update
    }

    fn step(&mut self) -> Option<ServerMessage> {
        let pose = self.pose.latest()?;
        let hands = self
            .hands
            .as_ref()
            .map(|slot| slot.latest().unwrap_or_default());

        let commands = self.rules.process(&pose);
        for command in &commands {
            if let Command::GenerateTexture { prompt, kind } = command {
                self.request_texture(prompt, kind);
            }
        }

        Some(ServerMessage::Update {
            pose,
            hands,
            commands,
        })
    }

    fn request_texture(&self, prompt: &str, kind: &str) {
        match self.pipeline.submit(GenerationRequest::new(prompt, kind)) {
            Ok(()) => debug!("Queued '{}' texture", kind),
            Err(e @ (GenerationError::QueueFull | GenerationError::RateLimited)) => {
                warn!("Dropping '{}' texture request: {}", kind, e)
            }
            Err(e) => error!("Failed to queue '{}' texture: {}", kind, e),
        }
    }

    async fn push_results(&mut self) {
        while let Some(result) = self.pipeline.try_next_result() {
            let message = self.texture_ready(result);
            let delivered = self.hub.broadcast(&message).await;
            debug!("texture_ready delivered to {} clients", delivered);
        }
    }

    fn texture_ready(&self, result: GenerationResult) -> ServerMessage {
        let url = format!(
            "{}/{}",
            self.settings.public_url_prefix.trim_end_matches('/'),
            result.filename
        );
        ServerMessage::TextureReady {
            filename: result.filename,
            prefix: result.prefix,
            url,
        }
    }

    /// Stop the pipeline, then the capture workers, newest first.
    pub async fn shutdown(mut self) {
        let timeout = self.settings.shutdown_timeout;
        if !self.pipeline.stop(timeout).await {
            warn!("Generation pipeline did not stop cleanly");
        }

        while let Some(mut worker) = self.workers.pop() {
            let name = worker.name().to_string();
            match tokio::task::spawn_blocking(move || worker.stop(timeout)).await {
                Ok(true) => debug!("Worker '{}' stopped", name),
                Ok(false) => warn!("Worker '{}' detached after {:?}", name, timeout),
                Err(e) => error!("Stopping worker '{}' failed: {}", name, e),
            }
        }
        info!("Shutdown complete");
    }
}
