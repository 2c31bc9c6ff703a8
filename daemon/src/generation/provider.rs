use futures_util::future::BoxFuture;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use super::gemini::GeminiClient;
use super::local;
use super::openai::OpenAiClient;
use super::{GenerationError, GenerationRequest};
use crate::config::{GenerationConfig, ProviderKind, TimeoutsConfig};

pub const GOOGLE_API_KEY_ENV: &str = "GOOGLE_API_KEY";
pub const OPENAI_API_KEY_ENV: &str = "OPENAI_API_KEY";

/// Instruction given to the vision model alongside the source frame.
pub const ART_DIRECTION: &str = "Act as an art director. Study this image and write one prompt \
for an image model that turns the scene into a neon cyberpunk artwork: a cyan, magenta, purple \
and electric blue palette, dramatic glowing light, a stylized or abstract reading of the shapes, \
high contrast and vivid saturation. Answer with the prompt only, under 100 words.";

/// Describes an image, then renders a prompt with a named model.
pub trait VisionBackend: Send + Sync {
    fn describe<'a>(
        &'a self,
        image_png: &'a [u8],
        instruction: &'a str,
    ) -> BoxFuture<'a, Result<String, GenerationError>>;

    fn generate_with_model<'a>(
        &'a self,
        model: &'a str,
        prompt: &'a str,
    ) -> BoxFuture<'a, Result<Option<Vec<u8>>, GenerationError>>;
}

pub trait TextToImageBackend: Send + Sync {
    fn generate<'a>(
        &'a self,
        prompt: &'a str,
    ) -> BoxFuture<'a, Result<Option<Vec<u8>>, GenerationError>>;
}

/// One link of the fallback chain.
///
/// `Ok(None)` means the provider did not apply or produced nothing; the chain
/// moves on exactly as it does for an error.
pub trait ImageProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Remote calls one attempt may make, each bounded by the call timeout.
    fn calls(&self) -> u32 {
        1
    }

    fn generate<'a>(
        &'a self,
        request: &'a GenerationRequest,
    ) -> BoxFuture<'a, Result<Option<Vec<u8>>, GenerationError>>;
}

/// Source frame -> art prompt -> image, trying each model in order.
///
/// Every backend call gets its own `call_timeout`, so a model that hangs
/// still leaves the later models their turn.
pub struct VisionImageProvider<B> {
    backend: B,
    models: Vec<String>,
    call_timeout: Duration,
}

impl<B: VisionBackend> VisionImageProvider<B> {
    pub fn new(backend: B, models: Vec<String>, call_timeout: Duration) -> Self {
        Self {
            backend,
            models,
            call_timeout,
        }
    }
}

impl<B: VisionBackend> ImageProvider for VisionImageProvider<B> {
    fn name(&self) -> &str {
        "vision"
    }

    fn calls(&self) -> u32 {
        1 + self.models.len() as u32
    }

    fn generate<'a>(
        &'a self,
        request: &'a GenerationRequest,
    ) -> BoxFuture<'a, Result<Option<Vec<u8>>, GenerationError>> {
        Box::pin(async move {
            let Some(source) = request.source_image.as_ref() else {
                debug!("No source image for '{}', skipping vision provider", request.prefix);
                return Ok(None);
            };

            let png = local::encode_png(source)?;
            let describe = self.backend.describe(&png, ART_DIRECTION);
            let art_prompt = timeout(self.call_timeout, describe)
                .await
                .map_err(|_| GenerationError::Timeout(self.call_timeout))??;
            info!(
                "Art prompt: {}",
                art_prompt.chars().take(100).collect::<String>()
            );

            for model in &self.models {
                debug!("Attempting generation with {}", model);
                let attempt = self.backend.generate_with_model(model, &art_prompt);
                match timeout(self.call_timeout, attempt).await {
                    Ok(Ok(Some(bytes))) if !bytes.is_empty() => return Ok(Some(bytes)),
                    Ok(Ok(_)) => warn!("Model {} returned no image", model),
                    Ok(Err(e)) => warn!("Model {} failed: {}", model, e),
                    Err(_) => warn!("Model {} timed out after {:?}", model, self.call_timeout),
                }
            }
            Ok(None)
        })
    }
}

/// Raw prompt straight to a text-to-image model; ignores any source image.
pub struct TextToImageProvider<B> {
    backend: B,
}

impl<B: TextToImageBackend> TextToImageProvider<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }
}

impl<B: TextToImageBackend> ImageProvider for TextToImageProvider<B> {
    fn name(&self) -> &str {
        "text-to-image"
    }

    fn generate<'a>(
        &'a self,
        request: &'a GenerationRequest,
    ) -> BoxFuture<'a, Result<Option<Vec<u8>>, GenerationError>> {
        self.backend.generate(&request.prompt)
    }
}

/// Restyles the source image locally, or returns the solid placeholder.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalFallback;

impl ImageProvider for LocalFallback {
    fn name(&self) -> &str {
        "local"
    }

    fn generate<'a>(
        &'a self,
        request: &'a GenerationRequest,
    ) -> BoxFuture<'a, Result<Option<Vec<u8>>, GenerationError>> {
        let source = request.source_image.clone();
        Box::pin(async move {
            let bytes = tokio::task::spawn_blocking(move || match source {
                Some(image) => local::stylize_png(&image),
                None => local::placeholder_png(),
            })
            .await
            .map_err(|e| GenerationError::Provider(format!("local worker join failed: {}", e)))??;
            Ok(Some(bytes))
        })
    }
}

/// Providers tried in order until one yields bytes, then the local fallback.
///
/// Timed providers get `call_timeout` per remote call. The fallback runs
/// without a deadline so a request that reaches it always produces output.
pub struct ProviderChain {
    label: String,
    providers: Vec<Box<dyn ImageProvider>>,
    fallback: Option<LocalFallback>,
}

impl ProviderChain {
    pub fn new(label: impl Into<String>, providers: Vec<Box<dyn ImageProvider>>) -> Self {
        Self {
            label: label.into(),
            providers,
            fallback: None,
        }
    }

    pub fn with_local_fallback(mut self) -> Self {
        self.fallback = Some(LocalFallback);
        self
    }

    pub fn local() -> Self {
        Self::new("local", Vec::new()).with_local_fallback()
    }

    /// Name reported to clients in the status message.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Longest `produce` can spend in the timed providers.
    pub fn timed_budget(&self, call_timeout: Duration) -> Duration {
        self.providers
            .iter()
            .map(|provider| call_timeout * provider.calls())
            .sum()
    }

    /// Bytes from the first provider that succeeds, with that provider's name.
    pub async fn produce(
        &self,
        request: &GenerationRequest,
        call_timeout: Duration,
    ) -> Option<(String, Vec<u8>)> {
        for provider in &self.providers {
            let deadline = call_timeout * provider.calls();
            match timeout(deadline, provider.generate(request)).await {
                Ok(Ok(Some(bytes))) if !bytes.is_empty() => {
                    return Some((provider.name().to_string(), bytes));
                }
                Ok(Ok(_)) => debug!("Provider {} produced nothing", provider.name()),
                Ok(Err(e)) => warn!("Provider {} failed: {}", provider.name(), e),
                Err(_) => warn!(
                    "Provider {}: {}",
                    provider.name(),
                    GenerationError::Timeout(deadline)
                ),
            }
        }

        let fallback = self.fallback.as_ref()?;
        match fallback.generate(request).await {
            Ok(Some(bytes)) if !bytes.is_empty() => Some((fallback.name().to_string(), bytes)),
            Ok(_) => {
                error!("Local fallback produced nothing for '{}'", request.prefix);
                None
            }
            Err(e) => {
                error!("Local fallback failed for '{}': {}", request.prefix, e);
                None
            }
        }
    }
}

/// Active provider after resolving `auto` against the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedProvider {
    Gemini(String),
    Openai(String),
    Local,
}

impl ResolvedProvider {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Gemini(_) => "gemini",
            Self::Openai(_) => "openai",
            Self::Local => "local",
        }
    }
}

fn env_key(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|key| !key.trim().is_empty())
}

pub fn resolve_provider(kind: ProviderKind) -> ResolvedProvider {
    let google = || env_key(GOOGLE_API_KEY_ENV).map(ResolvedProvider::Gemini);
    let openai = || env_key(OPENAI_API_KEY_ENV).map(ResolvedProvider::Openai);

    let resolved = match kind {
        ProviderKind::Auto => google().or_else(openai),
        ProviderKind::Gemini => google(),
        ProviderKind::Openai => openai(),
        ProviderKind::Local => Some(ResolvedProvider::Local),
    };

    resolved.unwrap_or_else(|| {
        if kind != ProviderKind::Auto && kind != ProviderKind::Local {
            warn!("Provider {:?} configured but its API key is not set, using local", kind);
        }
        ResolvedProvider::Local
    })
}

/// Build the chain for the configured provider. The local fallback always
/// comes last. A failed cloud provider never falls through to the other cloud.
pub fn build_chain(
    config: &GenerationConfig,
    timeouts: &TimeoutsConfig,
) -> Result<ProviderChain, GenerationError> {
    let resolved = resolve_provider(config.provider);
    let connect_timeout = Duration::from_secs(timeouts.http_connect_timeout_seconds);
    let request_timeout = timeouts.provider_call_timeout();

    let primary: Option<Box<dyn ImageProvider>> = match &resolved {
        ResolvedProvider::Gemini(key) => {
            let client = GeminiClient::new(
                key.clone(),
                &config.gemini_base_url,
                &config.vision_model,
                connect_timeout,
                request_timeout,
            )?;
            Some(Box::new(VisionImageProvider::new(
                client,
                config.image_models.clone(),
                request_timeout,
            )))
        }
        ResolvedProvider::Openai(key) => {
            let client = OpenAiClient::new(
                key.clone(),
                &config.openai_base_url,
                &config.openai_model,
                &config.openai_size,
                connect_timeout,
                request_timeout,
            )?;
            Some(Box::new(TextToImageProvider::new(client)))
        }
        ResolvedProvider::Local => None,
    };

    let providers: Vec<Box<dyn ImageProvider>> = primary.into_iter().collect();

    info!("Generation provider: {}", resolved.label());
    Ok(ProviderChain::new(resolved.label(), providers).with_local_fallback())
}
