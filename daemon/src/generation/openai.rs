use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use futures_util::future::BoxFuture;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

use super::provider::TextToImageBackend;
use super::GenerationError;

/// OpenAI Images API (`/images/generations`).
pub struct OpenAiClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    size: String,
}

impl OpenAiClient {
    pub fn new(
        api_key: String,
        base_url: &str,
        model: &str,
        size: &str,
        connect_timeout: Duration,
        request_timeout: Duration,
    ) -> Result<Self, GenerationError> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .connect_timeout(connect_timeout)
            .build()?;

        Ok(Self {
            http,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            size: size.to_string(),
        })
    }

    fn request_body(&self, prompt: &str) -> serde_json::Value {
        json!({
            "model": self.model,
            "prompt": prompt,
            "n": 1,
            "size": self.size,
            "quality": "standard",
            "response_format": "b64_json"
        })
    }
}

impl TextToImageBackend for OpenAiClient {
    fn generate<'a>(
        &'a self,
        prompt: &'a str,
    ) -> BoxFuture<'a, Result<Option<Vec<u8>>, GenerationError>> {
        Box::pin(async move {
            let url = format!("{}/images/generations", self.base_url);
            debug!("Requesting {} image from {}", self.model, url);

            let response = self
                .http
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(&self.request_body(prompt))
                .send()
                .await?;

            let status = response.status();
            let text = response.text().await?;
            if !status.is_success() {
                return Err(GenerationError::Provider(format!(
                    "OpenAI returned {}: {}",
                    status,
                    text.chars().take(200).collect::<String>()
                )));
            }
            parse_images_response(&text)
        })
    }
}

#[derive(Debug, Deserialize)]
struct ImagesResponse {
    #[serde(default)]
    data: Vec<ImageData>,
}

#[derive(Debug, Deserialize)]
struct ImageData {
    #[serde(default)]
    b64_json: Option<String>,
}

fn parse_images_response(body: &str) -> Result<Option<Vec<u8>>, GenerationError> {
    let response: ImagesResponse =
        serde_json::from_str(body).map_err(|e| GenerationError::Decode(e.to_string()))?;

    match response.data.into_iter().find_map(|d| d.b64_json) {
        Some(encoded) => BASE64
            .decode(encoded)
            .map(Some)
            .map_err(|e| GenerationError::Decode(e.to_string())),
        None => Ok(None),
    }
}
