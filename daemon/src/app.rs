use anyhow::{bail, Context, Result};
use shared::ServerMessage;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::broadcast::BroadcastHub;
use crate::capture::{
    CaptureWorker, HandExtractor, MonotonicClock, PoseExtractor, RawFrame, ReplaySource,
};
use crate::config::Config;
use crate::generation::provider::build_chain;
use crate::generation::{GenerationPipeline, GenerationRequest, GenerationResult, PipelineSettings};
use crate::orchestrator::{Orchestrator, OrchestratorSettings};
use crate::rules::RuleEngine;
use crate::server::{ServerState, StreamServer};

/// Allowance for the untimed local fallback in one-shot generation.
const LOCAL_FALLBACK_WAIT: Duration = Duration::from_secs(30);

/// Run the whole daemon until `cancel` fires.
pub async fn serve(config: Config, cancel: CancellationToken) -> Result<()> {
    let clock = MonotonicClock::new();
    let retry_delay = Duration::from_millis(config.capture.retry_delay_ms);
    let capture = &config.capture;

    let mut pose_worker = CaptureWorker::new("pose");
    if let Err(e) = pose_worker.start(
        ReplaySource::new(&capture.pose_source, capture.fps),
        PoseExtractor,
        clock,
        retry_delay,
    ) {
        warn!("Pose tracking unavailable, no updates will be sent: {}", e);
    }

    let mut hand_worker = None;
    if capture.hands_enabled {
        let mut worker = CaptureWorker::new("hands");
        if let Err(e) = worker.start(
            ReplaySource::new(&capture.hand_source, capture.fps),
            HandExtractor,
            clock,
            retry_delay,
        ) {
            warn!("Hand tracking unavailable, hand lists stay empty: {}", e);
        }
        hand_worker = Some(worker);
    }

    let chain = build_chain(&config.generation, &config.timeouts)?;
    let pipeline = GenerationPipeline::start(
        chain,
        PipelineSettings::from_config(&config.generation, &config.timeouts),
        cancel.clone(),
    );

    let hub = Arc::new(BroadcastHub::new(Duration::from_millis(
        config.timeouts.send_timeout_ms,
    )));

    let mut orchestrator = Orchestrator::new(
        pose_worker.slot(),
        hand_worker.as_ref().map(|w| w.slot()),
        config.rules.clone(),
        pipeline,
        Arc::clone(&hub),
        OrchestratorSettings {
            tick: Duration::from_millis(config.orchestrator.tick_ms.max(1)),
            shutdown_timeout: Duration::from_millis(config.timeouts.shutdown_timeout_ms),
            public_url_prefix: config.generation.public_url_prefix.clone(),
        },
    );
    orchestrator.add_worker(Box::new(pose_worker));
    if let Some(worker) = hand_worker {
        orchestrator.add_worker(Box::new(worker));
    }

    let server = StreamServer::new(
        format!("{}:{}", config.server.host, config.server.port),
        ServerState {
            hub,
            provider: orchestrator.pipeline().provider().to_string(),
            hands_enabled: capture.hands_enabled,
        },
    );
    let server_task = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            let result = server.run(cancel.clone()).await;
            if result.is_err() {
                cancel.cancel();
            }
            result
        }
    });

    orchestrator.run(cancel).await;

    server_task
        .await
        .context("WebSocket server task panicked")?
        .context("WebSocket server failed")?;
    Ok(())
}

/// Push one request through the configured provider chain and wait for it.
pub async fn generate_once(
    config: &Config,
    prompt: &str,
    prefix: &str,
    source: Option<&Path>,
) -> Result<GenerationResult> {
    let mut request = GenerationRequest::new(prompt, prefix);
    if let Some(path) = source {
        let image = image::open(path)
            .with_context(|| format!("Failed to load source image {}", path.display()))?;
        request = request.with_source(image);
    }

    let chain = build_chain(&config.generation, &config.timeouts)?;
    let wait = chain.timed_budget(config.timeouts.provider_call_timeout()) + LOCAL_FALLBACK_WAIT;

    let mut settings = PipelineSettings::from_config(&config.generation, &config.timeouts);
    settings.submits_per_minute = 0;
    let mut pipeline = GenerationPipeline::start(chain, settings, CancellationToken::new());
    pipeline.submit(request)?;

    let result = tokio::time::timeout(wait, pipeline.next_result()).await;
    pipeline
        .stop(Duration::from_millis(config.timeouts.shutdown_timeout_ms))
        .await;

    match result {
        Ok(Some(result)) => Ok(result),
        Ok(None) => bail!("Generation worker exited without a result"),
        Err(_) => bail!("No image produced within {:?}", wait),
    }
}

/// Feed a recording through the extractors and the rule engine, writing one
/// update message per frame as a JSON line. Frames are timed at `capture.fps`.
/// Returns how many updates were written.
pub fn replay<W: Write>(config: &Config, recording: &Path, out: &mut W) -> Result<usize> {
    let file = std::fs::File::open(recording)
        .with_context(|| format!("Failed to open recording {}", recording.display()))?;
    let frame_seconds = 1.0 / config.capture.fps.max(1) as f64;
    let mut rules = RuleEngine::new(config.rules.clone());
    let mut written = 0;

    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let frame: RawFrame = serde_json::from_str(&line)
            .with_context(|| format!("Bad frame on line {}", index + 1))?;

        let Some(landmarks) = frame.pose.as_deref() else {
            continue;
        };
        let timestamp = index as f64 * frame_seconds;
        let pose = PoseExtractor::snapshot(landmarks, timestamp)?;
        let hands = if config.capture.hands_enabled {
            Some(HandExtractor::hands(&frame)?)
        } else {
            None
        };

        let commands = rules.process(&pose);
        let update = ServerMessage::Update {
            pose,
            hands,
            commands,
        };
        writeln!(out, "{}", update.to_json()?)?;
        written += 1;
    }

    info!("Replayed {} updates from {}", written, recording.display());
    Ok(written)
}
