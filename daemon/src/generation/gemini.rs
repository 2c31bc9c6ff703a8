use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use futures_util::future::BoxFuture;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

use super::provider::VisionBackend;
use super::GenerationError;

const API_KEY_HEADER: &str = "x-goog-api-key";

/// Google Generative Language API: Gemini for image description and
/// Imagen models for generation.
pub struct GeminiClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    vision_model: String,
}

impl GeminiClient {
    pub fn new(
        api_key: String,
        base_url: &str,
        vision_model: &str,
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
            vision_model: vision_model.to_string(),
        })
    }

    fn endpoint(&self, model: &str, method: &str) -> String {
        format!("{}/models/{}:{}", self.base_url, model, method)
    }

    async fn post(&self, url: &str, body: serde_json::Value) -> Result<String, GenerationError> {
        let response = self
            .http
            .post(url)
            .header(API_KEY_HEADER, &self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(GenerationError::Provider(format!(
                "{} returned {}: {}",
                url,
                status,
                truncate(&text, 200)
            )));
        }
        Ok(text)
    }
}

impl VisionBackend for GeminiClient {
    fn describe<'a>(
        &'a self,
        image_png: &'a [u8],
        instruction: &'a str,
    ) -> BoxFuture<'a, Result<String, GenerationError>> {
        Box::pin(async move {
            let url = self.endpoint(&self.vision_model, "generateContent");
            debug!("Describing source image with {}", self.vision_model);
            let body = describe_body(image_png, instruction);
            let text = self.post(&url, body).await?;
            parse_description(&text)
        })
    }

    fn generate_with_model<'a>(
        &'a self,
        model: &'a str,
        prompt: &'a str,
    ) -> BoxFuture<'a, Result<Option<Vec<u8>>, GenerationError>> {
        Box::pin(async move {
            let url = self.endpoint(model, "predict");
            let text = self.post(&url, predict_body(prompt)).await?;
            parse_prediction(&text)
        })
    }
}

fn describe_body(image_png: &[u8], instruction: &str) -> serde_json::Value {
    json!({
        "contents": [{
            "parts": [
                { "text": instruction },
                { "inline_data": { "mime_type": "image/png", "data": BASE64.encode(image_png) } }
            ]
        }]
    })
}

fn predict_body(prompt: &str) -> serde_json::Value {
    json!({
        "instances": [{ "prompt": prompt }],
        "parameters": { "sampleCount": 1, "aspectRatio": "1:1" }
    })
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Content,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    #[serde(default)]
    text: Option<String>,
}

fn parse_description(body: &str) -> Result<String, GenerationError> {
    let response: GenerateContentResponse =
        serde_json::from_str(body).map_err(|e| GenerationError::Decode(e.to_string()))?;

    let text: String = response
        .candidates
        .into_iter()
        .next()
        .map(|c| c.content.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();

    let text = text.trim();
    if text.is_empty() {
        return Err(GenerationError::Provider(
            "vision model returned no text".to_string(),
        ));
    }
    Ok(text.to_string())
}

#[derive(Debug, Deserialize)]
struct PredictResponse {
    #[serde(default)]
    predictions: Vec<Prediction>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Prediction {
    #[serde(default)]
    bytes_base64_encoded: Option<String>,
}

/// `Ok(None)` when the model answered without an image (e.g. filtered).
fn parse_prediction(body: &str) -> Result<Option<Vec<u8>>, GenerationError> {
    let response: PredictResponse =
        serde_json::from_str(body).map_err(|e| GenerationError::Decode(e.to_string()))?;

    match response
        .predictions
        .into_iter()
        .find_map(|p| p.bytes_base64_encoded)
    {
        Some(encoded) => BASE64
            .decode(encoded)
            .map(Some)
            .map_err(|e| GenerationError::Decode(e.to_string())),
        None => Ok(None),
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}
