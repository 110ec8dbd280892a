use std::time::Duration;

use anyhow::{anyhow, Result};
use base64::{engine::general_purpose, Engine as _};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::config::CONFIG;
use crate::llm::image::ImageData;
use crate::orchestrator::HeadshotBackend;
use crate::utils::http::get_http_client;
use crate::utils::timing::log_llm_timing;

const MAX_RETRY_ATTEMPTS: usize = 2;
const RETRY_BASE_DELAY_MS: u64 = 900;

fn redact_api_key(text: &str) -> String {
    let key = CONFIG.gemini_api_key.trim();
    if key.is_empty() {
        return text.to_string();
    }
    text.replace(key, "[redacted]")
}

fn should_retry_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect()
}

fn should_retry_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
}

fn retry_delay(attempt: usize) -> Duration {
    let attempt = attempt.max(1) as u64;
    Duration::from_millis(RETRY_BASE_DELAY_MS.saturating_mul(attempt))
}

fn truncate_for_log(value: &str, limit: usize) -> String {
    if value.chars().count() <= limit {
        return value.to_string();
    }
    let truncated: String = value.chars().take(limit).collect();
    format!("{truncated}... (truncated)")
}

/// Pulls the provider's `error.message` out of a failure body when present,
/// otherwise returns a truncated copy of the raw body.
fn summarize_error_body(body: &str) -> (Option<String>, String) {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return (None, "empty response body".to_string());
    }

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        let message = value
            .pointer("/error/message")
            .and_then(|v| v.as_str())
            .map(|v| v.to_string())
            .or_else(|| {
                value
                    .get("message")
                    .and_then(|v| v.as_str())
                    .map(|v| v.to_string())
            });
        return (message, truncate_for_log(&value.to_string(), 2000));
    }

    (None, truncate_for_log(trimmed, 2000))
}

fn build_safety_settings() -> Vec<Value> {
    let threshold = match CONFIG.gemini_safety_settings.as_str() {
        "standard" => "BLOCK_MEDIUM_AND_ABOVE",
        _ => "OFF",
    };

    vec![
        json!({ "category": "HARM_CATEGORY_HARASSMENT", "threshold": threshold }),
        json!({ "category": "HARM_CATEGORY_HATE_SPEECH", "threshold": threshold }),
        json!({ "category": "HARM_CATEGORY_SEXUALLY_EXPLICIT", "threshold": threshold }),
        json!({ "category": "HARM_CATEGORY_DANGEROUS_CONTENT", "threshold": threshold }),
        json!({ "category": "HARM_CATEGORY_CIVIC_INTEGRITY", "threshold": threshold }),
    ]
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    candidates: Option<Vec<GeminiCandidate>>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContent>,
}

#[derive(Debug, Deserialize)]
struct GeminiContent {
    parts: Option<Vec<GeminiTextPart>>,
}

// Non-text parts deserialize with `text: None` and are skipped.
#[derive(Debug, Deserialize)]
struct GeminiTextPart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ImagenResponse {
    predictions: Option<Vec<ImagenPrediction>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImagenPrediction {
    bytes_base64_encoded: Option<String>,
    mime_type: Option<String>,
    image: Option<ImagenPredictionImage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImagenPredictionImage {
    image_bytes: Option<String>,
    mime_type: Option<String>,
}

fn extract_text(response: GeminiResponse) -> String {
    let mut text_parts = Vec::new();
    for candidate in response.candidates.unwrap_or_default() {
        if let Some(content) = candidate.content {
            for part in content.parts.unwrap_or_default() {
                if let Some(text) = part.text {
                    if !text.trim().is_empty() {
                        text_parts.push(text);
                    }
                }
            }
        }
    }
    text_parts.join("\n")
}

fn extract_images(response: ImagenResponse) -> Result<Vec<ImageData>> {
    let mut images = Vec::new();
    for prediction in response.predictions.unwrap_or_default() {
        let (encoded, mime_type) = match (&prediction.bytes_base64_encoded, &prediction.image) {
            (Some(encoded), _) => (encoded.clone(), prediction.mime_type.clone()),
            (None, Some(inner)) => match &inner.image_bytes {
                Some(encoded) => (encoded.clone(), inner.mime_type.clone()),
                None => continue,
            },
            (None, None) => continue,
        };
        let bytes = general_purpose::STANDARD
            .decode(encoded.trim())
            .map_err(|err| anyhow!("Imagen returned undecodable image data: {err}"))?;
        images.push(ImageData::new(
            bytes,
            mime_type.unwrap_or_else(|| "image/png".to_string()),
        ));
    }
    Ok(images)
}

async fn post_with_retry<T: DeserializeOwned>(url: &str, payload: &Value) -> Result<T> {
    let client = get_http_client();

    let mut attempt = 0usize;
    loop {
        attempt += 1;
        let response = match client
            .post(url)
            .header("x-goog-api-key", &CONFIG.gemini_api_key)
            .timeout(Duration::from_secs(CONFIG.request_timeout_secs))
            .json(payload)
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) => {
                let err_text = redact_api_key(&err.to_string());
                let should_retry = should_retry_error(&err) && attempt < MAX_RETRY_ATTEMPTS;
                warn!(
                    "Gemini request failed to send: {} (timeout={}, connect={}, retrying={})",
                    err_text,
                    err.is_timeout(),
                    err.is_connect(),
                    should_retry
                );
                if should_retry {
                    tokio::time::sleep(retry_delay(attempt)).await;
                    continue;
                }
                return Err(anyhow!("Gemini request failed: {}", err_text));
            }
        };

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let (message, body_summary) = summarize_error_body(&body);
            let should_retry = should_retry_status(status) && attempt < MAX_RETRY_ATTEMPTS;
            warn!(
                "Gemini API error: status={}, body={}, retrying={}",
                status, body_summary, should_retry
            );
            if should_retry {
                tokio::time::sleep(retry_delay(attempt)).await;
                continue;
            }
            let detail = message.unwrap_or(body_summary);
            return Err(anyhow!(
                "Gemini request failed with status {}: {}",
                status,
                detail
            ));
        }

        return Ok(response.json::<T>().await?);
    }
}

/// One `generateContent` call with the photo inline; returns the model's
/// free-text description. May be empty, which the orchestrator rejects.
pub async fn describe_image(instruction: &str, image: &ImageData) -> Result<String> {
    let model = &CONFIG.describe_model;
    let url = format!(
        "https://generativelanguage.googleapis.com/v1beta/models/{}:generateContent",
        model
    );
    let payload = json!({
        "contents": [{
            "role": "user",
            "parts": [
                { "text": instruction },
                {
                    "inlineData": {
                        "mimeType": image.mime_type,
                        "data": image.base64_bytes()
                    }
                }
            ]
        }],
        "generationConfig": {
            "temperature": CONFIG.gemini_temperature,
            "topK": CONFIG.gemini_top_k,
            "topP": CONFIG.gemini_top_p,
            "maxOutputTokens": CONFIG.gemini_max_output_tokens,
        },
        "safetySettings": build_safety_settings(),
    });

    debug!(
        target: "llm.gemini",
        model = %model,
        instruction = %truncate_for_log(instruction, 200),
        image_mime = %image.mime_type,
        image_bytes = image.bytes.len(),
        "describe request"
    );

    log_llm_timing("gemini", model, "describe_image", None, || async {
        let response: GeminiResponse = post_with_retry(&url, &payload).await?;
        Ok(extract_text(response))
    })
    .await
}

/// One Imagen `:predict` call; requests a single square image.
pub async fn generate_images(prompt: &str) -> Result<Vec<ImageData>> {
    let model = &CONFIG.image_model;
    let url = format!(
        "https://generativelanguage.googleapis.com/v1beta/models/{}:predict",
        model
    );
    let payload = json!({
        "instances": [{ "prompt": prompt }],
        "parameters": {
            "sampleCount": 1,
            "aspectRatio": "1:1"
        }
    });

    debug!(
        target: "llm.gemini",
        model = %model,
        prompt = %truncate_for_log(prompt, 400),
        "render request"
    );

    log_llm_timing("gemini", model, "generate_images", None, || async {
        let response: ImagenResponse = post_with_retry(&url, &payload).await?;
        let images = extract_images(response)?;
        debug!(target: "llm.gemini", model = %model, images = images.len(), "render response");
        Ok(images)
    })
    .await
}

/// The production backend, wired to the Google generative-language API.
#[derive(Debug, Clone, Copy, Default)]
pub struct GeminiClient;

impl HeadshotBackend for GeminiClient {
    async fn describe(&self, instruction: &str, image: &ImageData) -> Result<String> {
        describe_image(instruction, image).await
    }

    async fn render(&self, prompt: &str) -> Result<Vec<ImageData>> {
        generate_images(prompt).await
    }
}
