//! Gemini `generateContent` transport for image and text requests.

use std::thread;
use std::time::Duration;

use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use serde_json::{json, Value};
use studio_contracts::payload::ImageData;
use tracing::{debug, info, warn};

use crate::error::GenerationError;
use crate::provider::{
    GenerativeProvider, ImageGenerateRequest, ImageGenerateResponse, TextGenerateRequest,
};

pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

/// The key travels in a header so it never appears in a request URL.
const API_KEY_HEADER: &str = "x-goog-api-key";

const MASK_INSTRUCTION: &str =
    "The next image is a mask with the same size as the source image: white pixels mark the region to edit, black pixels must stay unchanged.";

const BLOCKING_FINISH_REASONS: [&str; 4] =
    ["SAFETY", "PROHIBITED_CONTENT", "IMAGE_SAFETY", "BLOCKLIST"];

#[derive(Debug, Clone)]
pub struct GeminiProvider {
    api_base: String,
    request_timeout_s: f64,
    transport_retries: usize,
    retry_backoff_s: f64,
}

impl Default for GeminiProvider {
    fn default() -> Self {
        Self::new(None)
    }
}

impl GeminiProvider {
    pub fn new(api_base: Option<&str>) -> Self {
        Self {
            api_base: api_base
                .map(|value| value.trim().trim_end_matches('/').to_string())
                .filter(|value| !value.is_empty())
                .unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
            request_timeout_s: 90.0,
            transport_retries: 2,
            retry_backoff_s: 1.2,
        }
    }

    pub fn with_request_timeout(mut self, seconds: f64) -> Self {
        self.request_timeout_s = seconds.clamp(15.0, 300.0);
        self
    }

    pub fn with_transport_retries(mut self, retries: usize, backoff_s: f64) -> Self {
        self.transport_retries = retries.min(4);
        self.retry_backoff_s = backoff_s.clamp(0.1, 10.0);
        self
    }

    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    pub fn endpoint_for_model(&self, model: &str) -> String {
        let trimmed = model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{trimmed}")
        };
        format!("{}/{}:generateContent", self.api_base, model_path)
    }

    pub fn build_image_payload(request: &ImageGenerateRequest) -> Value {
        let mut parts = vec![json!({ "text": request.prompt })];
        if let Some(image) = request.image.as_ref() {
            parts.push(inline_part(image));
        }
        if let Some(mask) = request.mask.as_ref() {
            parts.push(json!({ "text": MASK_INSTRUCTION }));
            parts.push(inline_part(mask));
        }
        json!({
            "contents": [{
                "role": "user",
                "parts": parts,
            }],
            "generationConfig": {
                "responseModalities": ["TEXT", "IMAGE"],
            },
            "safetySettings": request.safety.to_json(),
        })
    }

    pub fn build_text_payload(request: &TextGenerateRequest) -> Value {
        json!({
            "contents": [{
                "role": "user",
                "parts": [{ "text": request.prompt }],
            }],
        })
    }

    fn http(&self) -> Result<HttpClient, GenerationError> {
        HttpClient::builder()
            .timeout(Duration::from_secs_f64(self.request_timeout_s))
            .build()
            .map_err(|err| GenerationError::Transport(err.to_string()))
    }

    fn post_with_transport_retries(
        &self,
        endpoint: &str,
        api_key: &str,
        payload: &Value,
        warnings: &mut Vec<String>,
    ) -> Result<HttpResponse, GenerationError> {
        let http = self.http()?;
        let mut attempt = 0;
        loop {
            let response = http
                .post(endpoint)
                .header(API_KEY_HEADER, api_key)
                .json(payload)
                .send();

            match response {
                Ok(ok) => return Ok(ok),
                Err(err) => {
                    let retryable = err.is_timeout() || err.is_connect() || err.is_request();
                    if !retryable || attempt >= self.transport_retries {
                        return Err(GenerationError::Transport(format!(
                            "Gemini request failed: {}",
                            err.without_url()
                        )));
                    }
                    attempt += 1;
                    warn!(
                        attempt,
                        max = self.transport_retries,
                        "gemini transport retry after transient failure"
                    );
                    warnings.push(format!(
                        "Gemini transport retry {attempt}/{} after transient request failure.",
                        self.transport_retries
                    ));
                    thread::sleep(Duration::from_secs_f64(
                        self.retry_backoff_s * attempt as f64,
                    ));
                }
            }
        }
    }
}

impl GenerativeProvider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    fn generate_image(
        &self,
        request: &ImageGenerateRequest,
    ) -> Result<ImageGenerateResponse, GenerationError> {
        let endpoint = self.endpoint_for_model(&request.model);
        let payload = Self::build_image_payload(request);
        info!(
            model = %request.model,
            prompt = %truncate_text(&request.prompt, 200),
            with_image = request.image.is_some(),
            with_mask = request.mask.is_some(),
            "generating image"
        );

        let mut warnings = Vec::new();
        let response =
            self.post_with_transport_retries(&endpoint, &request.api_key, &payload, &mut warnings)?;
        let response_payload = response_json_or_error(response)?;
        let parsed = interpret_image_response(&response_payload)?;
        if !parsed.text.is_empty() {
            debug!(text_parts = parsed.text.len(), "model returned text alongside the image");
        }
        info!(mime_type = %parsed.image.mime_type, "image generated");

        Ok(ImageGenerateResponse {
            image: parsed.image,
            text: parsed.text,
            warnings,
        })
    }

    fn generate_text(&self, request: &TextGenerateRequest) -> Result<String, GenerationError> {
        let endpoint = self.endpoint_for_model(&request.model);
        let payload = Self::build_text_payload(request);
        debug!(model = %request.model, purpose = ?request.purpose, "text request");

        let mut warnings = Vec::new();
        let response =
            self.post_with_transport_retries(&endpoint, &request.api_key, &payload, &mut warnings)?;
        let response_payload = response_json_or_error(response)?;
        interpret_text_response(&response_payload)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedImage {
    pub image: ImageData,
    pub text: Vec<String>,
}

/// Reads an image out of a `generateContent` response, in the order the UI
/// reports failures: prompt block, empty candidates, candidate block, empty
/// content, text-only content.
pub fn interpret_image_response(payload: &Value) -> Result<ParsedImage, GenerationError> {
    if let Some(reason) = prompt_block_reason(payload) {
        return Err(GenerationError::blocked(reason));
    }

    let candidates = payload
        .get("candidates")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    debug!(candidates = candidates.len(), "gemini response");
    let Some(first) = candidates.first() else {
        return Err(GenerationError::NoCandidates);
    };

    if let Some(reason) = first.get("finishReason").and_then(Value::as_str) {
        if BLOCKING_FINISH_REASONS.contains(&reason) {
            return Err(GenerationError::blocked(reason));
        }
    }

    let parts = first
        .get("content")
        .and_then(|content| content.get("parts"))
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    if parts.is_empty() {
        return Err(GenerationError::NoContent);
    }

    let mut text = Vec::new();
    for part in &parts {
        if let Some(value) = part.get("text").and_then(Value::as_str) {
            text.push(value.to_string());
            continue;
        }
        let inline = part
            .get("inlineData")
            .or_else(|| part.get("inline_data"))
            .and_then(Value::as_object);
        let Some(inline) = inline else {
            continue;
        };
        let mime_type = inline
            .get("mimeType")
            .or_else(|| inline.get("mime_type"))
            .and_then(Value::as_str)
            .unwrap_or_default();
        let data = inline
            .get("data")
            .and_then(Value::as_str)
            .unwrap_or_default();
        if !mime_type.starts_with("image/") || data.is_empty() {
            continue;
        }
        return Ok(ParsedImage {
            image: ImageData::new(data, mime_type),
            text,
        });
    }

    if !text.is_empty() {
        debug!(?text, "text responses without image data");
    }
    Err(GenerationError::NoImage)
}

pub fn interpret_text_response(payload: &Value) -> Result<String, GenerationError> {
    if let Some(reason) = prompt_block_reason(payload) {
        return Err(GenerationError::blocked(reason));
    }
    let Some(first) = payload
        .get("candidates")
        .and_then(Value::as_array)
        .and_then(|rows| rows.first())
    else {
        return Err(GenerationError::NoCandidates);
    };
    let text = first
        .get("content")
        .and_then(|content| content.get("parts"))
        .and_then(Value::as_array)
        .map(|parts| {
            parts
                .iter()
                .filter_map(|part| part.get("text").and_then(Value::as_str))
                .collect::<Vec<&str>>()
                .join("")
        })
        .unwrap_or_default();
    let text = text.trim();
    if text.is_empty() {
        return Err(GenerationError::NoContent);
    }
    Ok(text.to_string())
}

/// Maps a non-success HTTP status and body onto the error taxonomy.
pub fn classify_http_failure(status: u16, body: &str) -> GenerationError {
    if body.contains("API_KEY_INVALID") || body.contains("API key not valid") {
        return GenerationError::InvalidApiKey;
    }
    if status == 429 || body.contains("RESOURCE_EXHAUSTED") || body.contains("quota") {
        return GenerationError::QuotaExceeded;
    }
    if status >= 500 {
        return GenerationError::ServerUnavailable;
    }
    GenerationError::Upstream {
        status,
        body: truncate_text(body, 512),
    }
}

fn response_json_or_error(response: HttpResponse) -> Result<Value, GenerationError> {
    let status = response.status().as_u16();
    let body = response.text().map_err(|err| {
        GenerationError::Transport(format!(
            "Gemini response body read failed: {}",
            err.without_url()
        ))
    })?;
    if !(200..300).contains(&status) {
        warn!(status, "gemini request failed");
        return Err(classify_http_failure(status, &body));
    }
    serde_json::from_str(&body).map_err(|err| {
        GenerationError::Other(format!("Gemini returned invalid JSON payload: {err}"))
    })
}

fn prompt_block_reason(payload: &Value) -> Option<String> {
    payload
        .get("promptFeedback")
        .and_then(|feedback| feedback.get("blockReason"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn inline_part(image: &ImageData) -> Value {
    json!({
        "inlineData": {
            "mimeType": image.mime_type,
            "data": image.data,
        }
    })
}

pub(crate) fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}
