//! Client for the managed cloud fallback.
//!
//! The fallback speaks an OpenAI-flavoured surface: `GET {base}/models` for
//! the listing (doubling as the reachability check) and `POST {base}/generate`
//! for inference. Generate answers arrive either as `text/event-stream` SSE
//! or as one complete JSON body; both shapes end up as the same
//! [`StreamEvent`] sequence.

use crate::backend::{
    AiModel, Backend, GenerateRequest, InferenceBackend, ModelSource, StreamEvent, TokenStream,
    classify_transport_error, decoded_event_stream, status_error, wire,
};
use crate::error::{Result, TellerError};
use async_trait::async_trait;
use std::collections::HashSet;
use std::time::Duration;
use tracing::debug;

/// Default base URL of the hosted fallback.
pub const DEFAULT_CLOUD_BASE_URL: &str = "https://assist.teller.dev/v1";

/// Connection establishment bound; stream reads are bounded by the caller.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Bound on the model listing call, matching the local probe cap.
const LIST_TIMEOUT: Duration = Duration::from_secs(5);

/// Client for the hosted fallback endpoint.
pub struct CloudBackend {
    base_url: String,
    client: reqwest::Client,
}

impl CloudBackend {
    /// Client against [`DEFAULT_CLOUD_BASE_URL`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_base_url(DEFAULT_CLOUD_BASE_URL)
    }

    /// Client against a non-default base URL (self-hosted relay, tests).
    #[must_use]
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            base_url: base_url.trim_end_matches('/').to_owned(),
            client,
        }
    }
}

impl Default for CloudBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl InferenceBackend for CloudBackend {
    fn kind(&self) -> Backend {
        Backend::Fallback
    }

    async fn list_models(&self) -> Result<Vec<AiModel>> {
        let url = format!("{}/models", self.base_url);

        let resp = self
            .client
            .get(&url)
            .timeout(LIST_TIMEOUT)
            .send()
            .await
            .map_err(|e| classify_transport_error("list cloud models", &e))?;
        if !resp.status().is_success() {
            return Err(status_error("list cloud models", resp.status()));
        }
        let body = resp
            .text()
            .await
            .map_err(|e| classify_transport_error("read cloud model listing", &e))?;

        let models = parse_models_response(&body)
            .ok_or_else(|| TellerError::Backend(format!("unexpected /models body from {url}")))?;
        debug!(count = models.len(), "cloud model listing");
        Ok(models)
    }

    async fn generate(&self, request: &GenerateRequest) -> Result<TokenStream> {
        let url = format!("{}/generate", self.base_url);
        let mut body = serde_json::Map::new();
        body.insert("prompt".to_owned(), request.prompt.clone().into());
        if let Some(ctx) = &request.context
            && !ctx.is_empty()
        {
            body.insert("context".to_owned(), serde_json::Value::Object(ctx.clone()));
        }
        if !request.model.is_empty() {
            body.insert("model".to_owned(), request.model.clone().into());
        }

        debug!(model = %request.model, "opening cloud generate stream");
        let resp = self
            .client
            .post(&url)
            .json(&serde_json::Value::Object(body))
            .send()
            .await
            .map_err(|e| classify_transport_error("open cloud generate stream", &e))?;
        if !resp.status().is_success() {
            return Err(status_error("open cloud generate stream", resp.status()));
        }

        if is_event_stream(&resp) {
            return Ok(Box::pin(decoded_event_stream(
                resp.bytes_stream(),
                collect_sse_events,
                "read cloud generate stream",
            )));
        }

        // Non-streaming answer: one JSON body with the full response text.
        let body = resp
            .text()
            .await
            .map_err(|e| classify_transport_error("read cloud generate body", &e))?;
        let text = parse_complete_response(&body).ok_or_else(|| {
            TellerError::Backend("cloud generate body is missing \"response\"".to_owned())
        })?;

        let mut events = Vec::new();
        if !text.is_empty() {
            events.push(StreamEvent::Token { text });
        }
        events.push(StreamEvent::Done);
        Ok(Box::pin(futures_util::stream::iter(events)))
    }
}

fn is_event_stream(resp: &reqwest::Response) -> bool {
    resp.headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("text/event-stream"))
}

/// Parse an OpenAI-style `/models` response.
///
/// Expected format: `{"data": [{"id": "gpt-4o-mini", ...}]}`. Duplicate ids
/// within the listing are dropped (first entry wins).
fn parse_models_response(body: &str) -> Option<Vec<AiModel>> {
    let json: serde_json::Value = serde_json::from_str(body).ok()?;
    let entries = json.get("data")?.as_array()?;

    let mut seen = HashSet::new();
    let models = entries
        .iter()
        .filter_map(|entry| {
            let id = entry.get("id")?.as_str()?;
            if !seen.insert(id.to_owned()) {
                return None;
            }
            Some(AiModel {
                name: id.to_owned(),
                size_bytes: None,
                source: ModelSource::Cloud,
            })
        })
        .collect();
    Some(models)
}

fn parse_complete_response(body: &str) -> Option<String> {
    let json: serde_json::Value = serde_json::from_str(body).ok()?;
    Some(json.get("response")?.as_str()?.to_owned())
}

/// Decode complete SSE lines into events; returns true once the stream is
/// over (`[DONE]` sentinel, done marker, backend abort, unparseable data).
fn collect_sse_events(lines: Vec<String>, events: &mut Vec<StreamEvent>) -> bool {
    for line in lines {
        // Skip comments, event names and blank keep-alive lines.
        let Some(data) = wire::sse_data(&line) else {
            continue;
        };
        if data == wire::SSE_DONE {
            events.push(StreamEvent::Done);
            return true;
        }
        match wire::decode_chunk(data) {
            Ok(chunk) => {
                if let Some(message) = chunk.error {
                    events.push(StreamEvent::Error {
                        error: TellerError::Backend(format!(
                            "cloud backend aborted generation: {message}"
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
