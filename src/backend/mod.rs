//! Backend abstraction for inference dispatch.
//!
//! Exactly two backends exist behind this seam: the local model server and
//! the cloud fallback. Both expose a model listing and a streaming generate
//! call; the router and monitor only ever talk to [`InferenceBackend`], so
//! tests swap in scripted implementations.

pub mod cloud;
pub mod local;
pub mod wire;

use crate::backend::wire::LineDecoder;
use crate::error::{Result, TellerError};
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::pin::Pin;

pub use cloud::CloudBackend;
pub use local::LocalBackend;

/// Which backend served (or will serve) a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// The self-hosted model server on the configured endpoint.
    Local,
    /// The managed cloud endpoint.
    Fallback,
}

impl Backend {
    /// Wire/display form of the backend name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Fallback => "fallback",
        }
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a model listing entry came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelSource {
    Local,
    Cloud,
}

impl std::fmt::Display for ModelSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local => f.write_str("local"),
            Self::Cloud => f.write_str("cloud"),
        }
    }
}

/// A model offered by one of the backends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AiModel {
    /// Model name as reported by the backend (unique within one listing).
    pub name: String,
    /// On-disk size in bytes, when the backend reports one.
    pub size_bytes: Option<u64>,
    /// Which backend offers it.
    pub source: ModelSource,
}

/// One inference request as handed to a backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerateRequest {
    /// Model to run.
    pub model: String,
    /// The user's prompt text.
    pub prompt: String,
    /// Optional CRM context (company, visits, goals...) the backend may
    /// fold into the prompt.
    pub context: Option<serde_json::Map<String, serde_json::Value>>,
}

impl GenerateRequest {
    /// Build a request with no context.
    #[must_use]
    pub fn new(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            prompt: prompt.into(),
            context: None,
        }
    }

    /// Attach a context object.
    #[must_use]
    pub fn with_context(mut self, context: serde_json::Map<String, serde_json::Value>) -> Self {
        self.context = Some(context);
        self
    }
}

/// Events produced by a backend token stream.
#[derive(Debug)]
pub enum StreamEvent {
    /// One increment of assistant output.
    Token {
        /// Text to append to the in-flight message.
        text: String,
    },
    /// The backend finished the response cleanly.
    Done,
    /// The stream failed mid-flight; no further events follow.
    Error {
        /// What went wrong.
        error: TellerError,
    },
}

/// Pinned, boxed stream of [`StreamEvent`]s.
pub type TokenStream = Pin<Box<dyn Stream<Item = StreamEvent> + Send>>;

/// The seam the router and monitor talk through.
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    /// Which backend this is.
    fn kind(&self) -> Backend;

    /// List the models this backend offers.
    ///
    /// # Errors
    ///
    /// Returns an error when the backend is unreachable or answers with a
    /// failure status or unparseable body.
    async fn list_models(&self) -> Result<Vec<AiModel>>;

    /// Open a streaming generate request.
    ///
    /// The returned stream yields tokens in arrival order and terminates
    /// with [`StreamEvent::Done`] or [`StreamEvent::Error`].
    ///
    /// # Errors
    ///
    /// Returns an error when the request cannot be opened at all (the
    /// connection is refused, the status is a failure, the body is not a
    /// stream). Mid-stream failures arrive in-band.
    async fn generate(&self, request: &GenerateRequest) -> Result<TokenStream>;
}

/// Map a transport-level reqwest failure onto the error taxonomy.
///
/// `action` names the call for the message ("list local models",
/// "open generate stream", ...).
pub(crate) fn classify_transport_error(action: &str, e: &reqwest::Error) -> TellerError {
    if e.is_timeout() {
        TellerError::Request(format!("{action}: timed out: {e}"))
    } else if e.is_connect() {
        TellerError::Request(format!("{action}: connection failed: {e}"))
    } else {
        TellerError::Request(format!("{action}: {e}"))
    }
}

/// Map a non-success HTTP status onto the error taxonomy.
pub(crate) fn status_error(action: &str, status: reqwest::StatusCode) -> TellerError {
    TellerError::Backend(format!("{action}: backend answered {status}"))
}

/// Turns complete lines into events; returns `true` once the stream is over.
pub(crate) type CollectFn = fn(Vec<String>, &mut Vec<StreamEvent>) -> bool;

/// Adapt a response byte stream into [`StreamEvent`]s.
///
/// Lines are reassembled across chunk boundaries by [`LineDecoder`] and
/// handed to `collect`, which owns the wire format (NDJSON for the local
/// backend, SSE for the cloud one). Transport read failures become a single
/// terminal [`StreamEvent::Error`] labelled with `read_action`.
pub(crate) fn decoded_event_stream(
    byte_stream: impl Stream<Item = std::result::Result<Bytes, reqwest::Error>> + Send + 'static,
    collect: CollectFn,
    read_action: &'static str,
) -> impl Stream<Item = StreamEvent> + Send {
    futures_util::stream::unfold(
        DecodeState {
            byte_stream: Box::pin(byte_stream),
            decoder: LineDecoder::new(),
            buffered: Vec::new(),
            finished: false,
        },
        move |mut state| async move {
            loop {
                // Drain buffered events first.
                if let Some(event) = state.buffered.pop() {
                    return Some((event, state));
                }
                if state.finished {
                    return None;
                }

                match state.byte_stream.next().await {
                    Some(Ok(chunk)) => {
                        let lines = state.decoder.push(&chunk);
                        let mut events = Vec::new();
                        state.finished = collect(lines, &mut events);
                        // Buffer in reverse so pop yields arrival order.
                        for event in events.into_iter().rev() {
                            state.buffered.push(event);
                        }
                    }
                    Some(Err(e)) => {
                        state.finished = true;
                        let error = classify_transport_error(read_action, &e);
                        return Some((StreamEvent::Error { error }, state));
                    }
                    None => {
                        state.finished = true;
                        if let Some(tail) = state.decoder.flush()
                            && !tail.is_empty()
                        {
                            let mut events = Vec::new();
                            collect(vec![tail], &mut events);
                            for event in events.into_iter().rev() {
                                state.buffered.push(event);
                            }
                        }
                    }
                }
            }
        },
    )
}

struct DecodeState {
    byte_stream: Pin<Box<dyn Stream<Item = std::result::Result<Bytes, reqwest::Error>> + Send>>,
    decoder: LineDecoder,
    buffered: Vec<StreamEvent>,
    finished: bool,
}
