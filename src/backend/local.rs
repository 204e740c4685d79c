//! Ollama-compatible client for the local model server.
//!
//! Two endpoints are consumed: `GET /api/tags` for the model listing (also
//! the health probe body) and `POST /api/generate` for streaming inference.
//! The endpoint URL is read from [`ConfigStore`] on every call so a saved
//! settings change takes effect without rebuilding the backend.

use crate::backend::{
    AiModel, Backend, GenerateRequest, InferenceBackend, ModelSource, StreamEvent, TokenStream,
    classify_transport_error, decoded_event_stream, status_error, wire,
};
use crate::config::ConfigStore;
use crate::error::{Result, TellerError};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Connection establishment bound; stream reads are bounded by the caller.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Client for the self-hosted inference server.
pub struct LocalBackend {
    config: Arc<ConfigStore>,
    client: reqwest::Client,
}

impl LocalBackend {
    /// Build a client reading its endpoint from `config`.
    pub fn new(config: Arc<ConfigStore>) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self { config, client }
    }
}

#[async_trait]
impl InferenceBackend for LocalBackend {
    fn kind(&self) -> Backend {
        Backend::Local
    }

    async fn list_models(&self) -> Result<Vec<AiModel>> {
        let config = self.config.load();
        let url = format!("{}/api/tags", config.endpoint_url.trim_end_matches('/'));

        let resp = self
            .client
            .get(&url)
            .timeout(config.probe_timeout())
            .send()
            .await
            .map_err(|e| classify_transport_error("list local models", &e))?;
        if !resp.status().is_success() {
            return Err(status_error("list local models", resp.status()));
        }
        let body = resp
            .text()
            .await
            .map_err(|e| classify_transport_error("read local model listing", &e))?;

        let models = parse_tags_response(&body)
            .ok_or_else(|| TellerError::Backend(format!("unexpected /api/tags body from {url}")))?;
        debug!(count = models.len(), "local model listing");
        Ok(models)
    }

    async fn generate(&self, request: &GenerateRequest) -> Result<TokenStream> {
        let config = self.config.load();
        let url = format!("{}/api/generate", config.endpoint_url.trim_end_matches('/'));
        let body = serde_json::json!({
            "model": request.model,
            "prompt": assemble_prompt(request),
            "stream": true,
        });

        debug!(model = %request.model, "opening local generate stream");
        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| classify_transport_error("open local generate stream", &e))?;
        if !resp.status().is_success() {
            return Err(status_error("open local generate stream", resp.status()));
        }

        Ok(Box::pin(decoded_event_stream(
            resp.bytes_stream(),
            collect_events,
            "read local generate stream",
        )))
    }
}

/// Fold the CRM context into the prompt body.
///
/// `/api/generate` takes a single prompt string, so a present context is
/// rendered as a JSON block ahead of the question.
fn assemble_prompt(request: &GenerateRequest) -> String {
    match &request.context {
        Some(ctx) if !ctx.is_empty() => {
            let rendered = serde_json::to_string_pretty(ctx).unwrap_or_default();
            format!("Context:\n{rendered}\n\n{}", request.prompt)
        }
        _ => request.prompt.clone(),
    }
}

/// Parse an Ollama `/api/tags` response.
///
/// Expected format: `{"models": [{"name": "llama3.2", "size": 123, ...}]}`.
/// Duplicate names within the listing are dropped (first entry wins).
fn parse_tags_response(body: &str) -> Option<Vec<AiModel>> {
    let json: serde_json::Value = serde_json::from_str(body).ok()?;
    let entries = json.get("models")?.as_array()?;

    let mut seen = HashSet::new();
    let models = entries
        .iter()
        .filter_map(|entry| {
            let name = entry.get("name")?.as_str()?;
            if !seen.insert(name.to_owned()) {
                return None;
            }
            Some(AiModel {
                name: name.to_owned(),
                size_bytes: entry.get("size").and_then(serde_json::Value::as_u64),
                source: ModelSource::Local,
            })
        })
        .collect();
    Some(models)
}

/// Decode complete NDJSON lines into events; returns true once the stream
/// is over (done marker, backend abort, or unparseable line).
fn collect_events(lines: Vec<String>, events: &mut Vec<StreamEvent>) -> bool {
    for line in lines {
        if line.is_empty() {
            continue;
        }
        match wire::decode_chunk(&line) {
            Ok(chunk) => {
                if let Some(message) = chunk.error {
                    events.push(StreamEvent::Error {
                        error: TellerError::Backend(format!(
                            "local backend aborted generation: {message}"
                        )),
                    });
                    return true;
                }
                if !chunk.response.is_empty() {
                    events.push(StreamEvent::Token {
                        text: chunk.response,
                    });
                }
                if chunk.done {
                    events.push(StreamEvent::Done);
                    return true;
                }
            }
            Err(error) => {
                events.push(StreamEvent::Error { error });
                return true;
            }
        }
    }
    false
}
