use std::time::Duration;

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use serde_json::{json, Map, Value};

use crate::backend::{
    Credential, JobHandle, MediaBytes, MediaKind, MediaRequest, ModelBackend, TextRequest,
};
use crate::config::EngineConfig;

const API_KEY_HEADER: &str = "x-goog-api-key";

/// Google Generative Language API: `generateContent` for text, `predict` for
/// Imagen, `predictLongRunning` plus operation polling for Veo.
///
/// The key travels in the `x-goog-api-key` header. Only media downloads carry
/// it as a `key` query parameter, and their transport errors drop the URL.
pub struct GeminiBackend {
    api_base: String,
    timeout: Duration,
    http: HttpClient,
}

impl GeminiBackend {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            api_base: config.api_base.trim().trim_end_matches('/').to_string(),
            timeout: config.request_timeout,
            http: HttpClient::new(),
        }
    }

    fn model_endpoint(&self, model: &str, method: &str) -> String {
        let trimmed = model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{trimmed}")
        };
        format!("{}/{}:{}", self.api_base, model_path, method)
    }

    fn require_key(credential: &Credential) -> Result<&str> {
        match credential.api_key() {
            Some(key) => Ok(key),
            None => bail!("Gemini backend needs an API key; host-managed keys are not available here"),
        }
    }

    fn post_json(&self, provider: &str, endpoint: &str, api_key: &str, payload: &Value) -> Result<Value> {
        let response = self
            .http
            .post(endpoint)
            .header(API_KEY_HEADER, api_key)
            .timeout(self.timeout)
            .json(payload)
            .send()
            .with_context(|| format!("{provider} request failed ({endpoint})"))?;
        response_json_or_error(provider, response)
    }

    pub(crate) fn build_text_payload(request: &TextRequest) -> Value {
        let mut payload = Map::new();
        payload.insert(
            "contents".to_string(),
            json!([{
                "role": "user",
                "parts": request.parts.iter().map(|part| part.to_json()).collect::<Vec<Value>>(),
            }]),
        );
        if let Some(instruction) = request
            .system_instruction
            .as_deref()
            .filter(|value| !value.trim().is_empty())
        {
            payload.insert(
                "systemInstruction".to_string(),
                json!({ "parts": [{ "text": instruction }] }),
            );
        }
        if request.grounding {
            payload.insert("tools".to_string(), json!([{ "googleSearch": {} }]));
        }

        let mut generation_config = Map::new();
        if let Some(budget) = request.thinking_budget {
            generation_config.insert(
                "thinkingConfig".to_string(),
                json!({ "thinkingBudget": budget }),
            );
        }
        if let Some(schema) = request.response_schema.as_ref() {
            generation_config.insert(
                "responseMimeType".to_string(),
                Value::String("application/json".to_string()),
            );
            generation_config.insert("responseSchema".to_string(), schema.clone());
        }
        if !generation_config.is_empty() {
            payload.insert(
                "generationConfig".to_string(),
                Value::Object(generation_config),
            );
        }
        Value::Object(payload)
    }

    pub(crate) fn extract_text(response_payload: &Value) -> Result<String> {
        let candidates = response_payload
            .get("candidates")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let Some(first) = candidates.first() else {
            if let Some(reason) = response_payload
                .get("promptFeedback")
                .and_then(|feedback| feedback.get("blockReason"))
                .and_then(Value::as_str)
            {
                bail!("Gemini blocked the prompt ({reason})");
            }
            bail!("Gemini returned no candidates");
        };
        let text = first
            .get("content")
            .and_then(|content| content.get("parts"))
            .and_then(Value::as_array)
            .map(|parts| {
                parts
                    .iter()
                    .filter(|part| !part.get("thought").and_then(Value::as_bool).unwrap_or(false))
                    .filter_map(|part| part.get("text").and_then(Value::as_str))
                    .collect::<Vec<&str>>()
                    .join("")
            })
            .unwrap_or_default();
        if text.trim().is_empty() {
            let reason = first
                .get("finishReason")
                .and_then(Value::as_str)
                .unwrap_or("unknown");
            bail!("Gemini returned an empty response (finish reason: {reason})");
        }
        Ok(text)
    }

    pub(crate) fn build_media_payload(request: &MediaRequest) -> Value {
        let mut parameters = Map::new();
        parameters.insert(
            "aspectRatio".to_string(),
            Value::String(request.aspect_ratio.clone()),
        );
        parameters.insert(
            "sampleCount".to_string(),
            Value::Number(request.count.max(1).into()),
        );
        if let Some(resolution) = request.resolution.as_ref() {
            parameters.insert("resolution".to_string(), Value::String(resolution.clone()));
        }
        json!({
            "instances": [{ "prompt": request.prompt }],
            "parameters": parameters,
        })
    }

    pub(crate) fn extract_prediction(response_payload: &Value) -> Result<MediaBytes> {
        let predictions = response_payload
            .get("predictions")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        for row in predictions {
            let data = row
                .get("bytesBase64Encoded")
                .and_then(Value::as_str)
                .unwrap_or_default();
            if data.is_empty() {
                continue;
            }
            let bytes = BASE64
                .decode(data.as_bytes())
                .context("Imagen image base64 decode failed")?;
            let mime_type = row
                .get("mimeType")
                .and_then(Value::as_str)
                .map(str::to_string);
            return Ok(MediaBytes { bytes, mime_type });
        }
        bail!("Imagen returned no images")
    }

    pub(crate) fn parse_operation(payload: &Value) -> Result<JobHandle> {
        let name = payload
            .get("name")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
            .context("operation payload is missing a name")?;
        let done = payload.get("done").and_then(Value::as_bool).unwrap_or(false);
        let error = payload
            .get("error")
            .map(|err| {
                err.get("message")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| err.to_string())
            });
        let result_uri = payload
            .get("response")
            .and_then(|response| response.get("generateVideoResponse"))
            .and_then(|response| response.get("generatedSamples"))
            .and_then(Value::as_array)
            .and_then(|samples| samples.first())
            .and_then(|sample| sample.get("video"))
            .and_then(|video| video.get("uri"))
            .and_then(Value::as_str)
            .map(str::to_string);
        Ok(JobHandle {
            name,
            done,
            result_uri,
            error,
        })
    }
}

impl ModelBackend for GeminiBackend {
    fn name(&self) -> &str {
        "gemini"
    }

    fn generate_text(&self, request: &TextRequest, credential: &Credential) -> Result<String> {
        let api_key = Self::require_key(credential)?;
        let endpoint = self.model_endpoint(&request.model, "generateContent");
        let payload = Self::build_text_payload(request);
        let response_payload = self.post_json("Gemini", &endpoint, api_key, &payload)?;
        Self::extract_text(&response_payload)
    }

    fn generate_image(&self, request: &MediaRequest, credential: &Credential) -> Result<MediaBytes> {
        let api_key = Self::require_key(credential)?;
        let endpoint = self.model_endpoint(&request.model, "predict");
        let payload = Self::build_media_payload(request);
        let response_payload = self.post_json("Imagen", &endpoint, api_key, &payload)?;
        Self::extract_prediction(&response_payload)
    }

    fn submit_video(&self, request: &MediaRequest, credential: &Credential) -> Result<JobHandle> {
        if request.kind != MediaKind::Video {
            bail!("submit_video called with a {} request", request.kind.as_str());
        }
        let api_key = Self::require_key(credential)?;
        let endpoint = self.model_endpoint(&request.model, "predictLongRunning");
        let payload = Self::build_media_payload(request);
        let response_payload = self.post_json("Veo", &endpoint, api_key, &payload)?;
        Self::parse_operation(&response_payload)
    }

    fn poll_operation(&self, job: &JobHandle, credential: &Credential) -> Result<JobHandle> {
        let api_key = Self::require_key(credential)?;
        let endpoint = format!("{}/{}", self.api_base, job.name.trim_start_matches('/'));
        let response = self
            .http
            .get(&endpoint)
            .header(API_KEY_HEADER, api_key)
            .timeout(self.timeout)
            .send()
            .with_context(|| format!("Veo poll request failed ({endpoint})"))?;
        let payload = response_json_or_error("Veo poll", response)?;
        Self::parse_operation(&payload)
    }

    fn fetch_media(&self, uri: &str, credential: &Credential) -> Result<MediaBytes> {
        let api_key = Self::require_key(credential)?;
        let response = self
            .http
            .get(uri)
            .query(&[("key", api_key)])
            .timeout(self.timeout)
            .send()
            .map_err(reqwest::Error::without_url)
            .with_context(|| format!("failed downloading generated media ({uri})"))?;
        if !response.status().is_success() {
            let code = response.status().as_u16();
            let body = response.text().unwrap_or_default();
            bail!(
                "media download failed ({code}): {}",
                truncate_text(&body, 512)
            );
        }
        let mime_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let bytes = response
            .bytes()
            .map_err(reqwest::Error::without_url)
            .context("failed reading generated media bytes")?
            .to_vec();
        Ok(MediaBytes { bytes, mime_type })
    }
}

fn response_json_or_error(provider: &str, response: HttpResponse) -> Result<Value> {
    let status = response.status();
    let code = status.as_u16();
    let body = response
        .text()
        .with_context(|| format!("{provider} response body read failed"))?;
    if !status.is_success() {
        let message = serde_json::from_str::<Value>(&body)
            .ok()
            .and_then(|parsed| {
                parsed
                    .get("error")
                    .and_then(|err| err.get("message"))
                    .and_then(Value::as_str)
                    .map(str::to_string)
            })
            .unwrap_or_else(|| truncate_text(&body, 512));
        bail!("{provider} request failed ({code}): {message}");
    }
    let parsed: Value = serde_json::from_str(&body)
        .with_context(|| format!("{provider} returned invalid JSON payload"))?;
    Ok(parsed)
}

pub(crate) fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}
