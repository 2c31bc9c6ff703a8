pub mod gemini;
pub mod local;
pub mod openai;
pub mod pipeline;
pub mod provider;

use image::DynamicImage;
use regex::Regex;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, SystemTime};
use thiserror::Error;

pub use pipeline::{GenerationPipeline, PipelineSettings};
pub use provider::{ImageProvider, ProviderChain};

#[derive(Error, Debug)]
pub enum GenerationError {
    #[error("Generation queue is full")]
    QueueFull,

    #[error("Generation queue is closed")]
    QueueClosed,

    #[error("Generation submissions are rate limited")]
    RateLimited,

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Provider call timed out after {0:?}")]
    Timeout(Duration),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to decode provider response: {0}")]
    Decode(String),
}

/// One texture to produce. The prefix is already filename-safe.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub prompt: String,
    pub prefix: String,
    pub source_image: Option<Arc<DynamicImage>>,
    pub submitted_at: SystemTime,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>, prefix: &str) -> Self {
        Self {
            prompt: prompt.into(),
            prefix: sanitize_prefix(prefix),
            source_image: None,
            submitted_at: SystemTime::now(),
        }
    }

    pub fn with_source(mut self, image: DynamicImage) -> Self {
        self.source_image = Some(Arc::new(image));
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationResult {
    pub filename: String,
    pub prefix: String,
    pub path: PathBuf,
    pub provider: String,
    pub completed_at: SystemTime,
}

const DEFAULT_PREFIX: &str = "gen";

static UNSAFE_PREFIX_CHARS: OnceLock<Option<Regex>> = OnceLock::new();

/// Replace anything outside `[A-Za-z0-9_-]` with `_`. Empty becomes `gen`.
pub fn sanitize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim();
    if trimmed.is_empty() {
        return DEFAULT_PREFIX.to_string();
    }

    let pattern = UNSAFE_PREFIX_CHARS.get_or_init(|| Regex::new(r"[^A-Za-z0-9_-]").ok());
    match pattern {
        Some(re) => re.replace_all(trimmed, "_").into_owned(),
        None => DEFAULT_PREFIX.to_string(),
    }
}

pub fn artifact_filename(prefix: &str, unix_seconds: u64) -> String {
    format!("{}_{}.png", prefix, unix_seconds)
}
