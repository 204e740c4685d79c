//! Chat message lifecycle.
//!
//! One [`ChatSession`] holds one ordered conversation. `send_message`
//! validates synchronously, appends the user message and an empty assistant
//! placeholder, then hands the request to a background drive task that
//! routes, streams tokens into the placeholder, and finalizes. Callers watch
//! progress through the [`SessionObserver`] callback; the session never
//! renders anything itself.
//!
//! States: `idle → sending → streaming → (idle | error → idle)`. At most one
//! request is pending per session, enforced by the state machine rather than
//! external locking.

use crate::backend::{Backend, GenerateRequest, StreamEvent};
use crate::config::ConfigStore;
use crate::error::{Result, TellerError};
use crate::router::FallbackRouter;
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

/// Terminal marker appended to a cancelled assistant message.
pub const CANCEL_MARKER: &str = "\n\n[cancelled]";

/// Placeholder content after a terminal send failure.
pub const FAILURE_MESSAGE: &str = "Sorry — the assistant is unavailable right now. \
     Check the AI connection settings and try again.";

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One turn in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiMessage {
    /// Unique within the session, ordered by append time (`msg_1`, `msg_2`...).
    pub id: String,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    /// Which backend produced an assistant message; `None` on user messages
    /// and on assistant messages that never completed.
    pub source: Option<Backend>,
}

/// Where the session is in its request lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionPhase {
    Idle,
    Sending,
    Streaming,
    Error,
}

/// Everything observable that happens to a session.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    PhaseChanged { phase: SessionPhase },
    MessageAppended { message: AiMessage },
    ContentDelta { message_id: String, delta: String },
    RequestFinished { message_id: String, backend: Backend },
    RequestFailed { message_id: String, error: String },
    RequestCancelled { message_id: String },
    MessagesCleared,
}

impl SessionEvent {
    /// Stable event name for the host protocol.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::PhaseChanged { .. } => "phase_changed",
            Self::MessageAppended { .. } => "message_appended",
            Self::ContentDelta { .. } => "content_delta",
            Self::RequestFinished { .. } => "request_finished",
            Self::RequestFailed { .. } => "request_failed",
            Self::RequestCancelled { .. } => "request_cancelled",
            Self::MessagesCleared => "messages_cleared",
        }
    }
}

/// Callback invoked for every [`SessionEvent`].
///
/// Events are delivered in the order their state changes were applied, so
/// a delta for a token applied before a cancellation always arrives before
/// the cancellation event. The session state lock is released during the
/// callback: an observer may read session state, but must not call back
/// into mutating session methods.
pub type SessionObserver = Box<dyn Fn(SessionEvent) + Send + Sync>;

/// Ids handed back from a successful send.
#[derive(Debug, Clone, Serialize)]
pub struct SendReceipt {
    pub request_id: String,
    pub user_message_id: String,
    pub assistant_message_id: String,
}

/// One conversation with the assistant.
///
/// Cheap to clone; all clones share the same state.
#[derive(Clone)]
pub struct ChatSession {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    config: Arc<ConfigStore>,
    router: Arc<FallbackRouter>,
    state: Mutex<SessionState>,
    observer: Mutex<Option<SessionObserver>>,
}

struct SessionState {
    messages: Vec<AiMessage>,
    phase: SessionPhase,
    pending: Option<PendingRequest>,
    next_message_id: u64,
}

struct PendingRequest {
    request_id: String,
    placeholder_id: String,
    cancel: CancellationToken,
}

impl SessionState {
    fn push_message(&mut self, role: Role, content: String) -> AiMessage {
        self.next_message_id += 1;
        let message = AiMessage {
            id: format!("msg_{}", self.next_message_id),
            role,
            content,
            timestamp: Utc::now(),
            source: None,
        };
        self.messages.push(message.clone());
        message
    }

    fn message_mut(&mut self, id: &str) -> Option<&mut AiMessage> {
        self.messages.iter_mut().find(|m| m.id == id)
    }

    fn pending_matches(&self, request_id: &str) -> bool {
        self.pending
            .as_ref()
            .is_some_and(|p| p.request_id == request_id)
    }
}

impl ChatSession {
    pub fn new(config: Arc<ConfigStore>, router: Arc<FallbackRouter>) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                config,
                router,
                state: Mutex::new(SessionState {
                    messages: Vec::new(),
                    phase: SessionPhase::Idle,
                    pending: None,
                    next_message_id: 0,
                }),
                observer: Mutex::new(None),
            }),
        }
    }

    /// Install (or replace) the event observer.
    pub fn set_observer(&self, observer: SessionObserver) {
        let mut slot = self
            .inner
            .observer
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *slot = Some(observer);
    }

    /// Send a user message and start streaming the assistant's answer.
    ///
    /// Appends the user message and an empty assistant placeholder
    /// synchronously, then drives routing and streaming on a background
    /// task. Must be called within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// [`TellerError::Validation`] when `text` is blank;
    /// [`TellerError::InvalidState`] when a request is already pending (the
    /// message log is left unchanged).
    pub fn send_message(
        &self,
        text: &str,
        context: Option<serde_json::Map<String, serde_json::Value>>,
    ) -> Result<SendReceipt> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(TellerError::Validation("message text is empty".to_owned()));
        }
        let config = self.inner.config.load();

        let observer = self.inner.observer_guard();
        let (receipt, cancel, events) = {
            let mut state = self.inner.lock_state();
            if state.pending.is_some() {
                return Err(TellerError::InvalidState(
                    "a request is already pending on this session".to_owned(),
                ));
            }

            let user = state.push_message(Role::User, trimmed.to_owned());
            let placeholder = state.push_message(Role::Assistant, String::new());
            let request_id = Uuid::new_v4().to_string();
            let cancel = CancellationToken::new();
            state.pending = Some(PendingRequest {
                request_id: request_id.clone(),
                placeholder_id: placeholder.id.clone(),
                cancel: cancel.clone(),
            });
            state.phase = SessionPhase::Sending;

            let events = vec![
                SessionEvent::MessageAppended {
                    message: user.clone(),
                },
                SessionEvent::MessageAppended {
                    message: placeholder.clone(),
                },
                SessionEvent::PhaseChanged {
                    phase: SessionPhase::Sending,
                },
            ];
            (
                SendReceipt {
                    request_id,
                    user_message_id: user.id,
                    assistant_message_id: placeholder.id,
                },
                cancel,
                events,
            )
        };
        SessionInner::emit(&observer, events);
        drop(observer);

        let mut request = GenerateRequest::new(config.default_model, trimmed);
        if let Some(ctx) = context {
            request = request.with_context(ctx);
        }

        debug!(request_id = %receipt.request_id, "sending chat message");
        let inner = Arc::clone(&self.inner);
        let request_id = receipt.request_id.clone();
        let placeholder_id = receipt.assistant_message_id.clone();
        tokio::spawn(async move {
            SessionInner::drive(inner, request_id, placeholder_id, request, cancel).await;
        });

        Ok(receipt)
    }

    /// Cancel the pending request, if any.
    ///
    /// Cancellation truncates rather than erases: partial content already
    /// streamed stays, [`CANCEL_MARKER`] is appended, and the session is
    /// idle when this returns. With nothing pending this is a no-op, so a
    /// second call changes nothing.
    pub fn cancel_request(&self) {
        let observer = self.inner.observer_guard();
        let events = {
            let mut state = self.inner.lock_state();
            let Some(pending) = state.pending.take() else {
                debug!("cancel requested with no pending request");
                return;
            };
            pending.cancel.cancel();
            if let Some(message) = state.message_mut(&pending.placeholder_id) {
                message.content.push_str(CANCEL_MARKER);
            }
            state.phase = SessionPhase::Idle;
            vec![
                SessionEvent::RequestCancelled {
                    message_id: pending.placeholder_id,
                },
                SessionEvent::PhaseChanged {
                    phase: SessionPhase::Idle,
                },
            ]
        };
        SessionInner::emit(&observer, events);
    }

    /// Drop every message.
    ///
    /// # Errors
    ///
    /// [`TellerError::InvalidState`] while a request is pending; a consumer
    /// may be reading the stream.
    pub fn clear_messages(&self) -> Result<()> {
        let observer = self.inner.observer_guard();
        {
            let mut state = self.inner.lock_state();
            if state.pending.is_some() {
                return Err(TellerError::InvalidState(
                    "cannot clear messages while a request is pending".to_owned(),
                ));
            }
            state.messages.clear();
        }
        SessionInner::emit(&observer, vec![SessionEvent::MessagesCleared]);
        Ok(())
    }

    /// Snapshot of the conversation in append order.
    #[must_use]
    pub fn messages(&self) -> Vec<AiMessage> {
        self.inner.lock_state().messages.clone()
    }

    /// Current lifecycle phase.
    #[must_use]
    pub fn phase(&self) -> SessionPhase {
        self.inner.lock_state().phase
    }

    /// Whether a request is in flight.
    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.inner.lock_state().pending.is_some()
    }

    /// Id of the in-flight request, if any.
    #[must_use]
    pub fn pending_request_id(&self) -> Option<String> {
        self.inner
            .lock_state()
            .pending
            .as_ref()
            .map(|p| p.request_id.clone())
    }
}

impl SessionInner {
    fn lock_state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Lock the observer slot for one mutation-plus-emit window.
    ///
    /// Taken before the state lock at every emitting site, so concurrent
    /// mutations deliver their events in the order they were applied.
    fn observer_guard(&self) -> MutexGuard<'_, Option<SessionObserver>> {
        self.observer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Invoke the observer with the session state lock released.
    fn emit(guard: &MutexGuard<'_, Option<SessionObserver>>, events: Vec<SessionEvent>) {
        if let Some(observer) = guard.as_ref() {
            for event in events {
                observer(event);
            }
        }
    }

    /// Background task: route, stream, finalize.
    ///
    /// Every mutation re-checks that this request is still the pending one,
    /// so a token racing a cancellation is dropped rather than applied to an
    /// already-idle session.
    async fn drive(
        inner: Arc<Self>,
        request_id: String,
        placeholder_id: String,
        request: GenerateRequest,
        cancel: CancellationToken,
    ) {
        let dispatch = tokio::select! {
            () = cancel.cancelled() => return,
            outcome = inner.router.dispatch(&request) => match outcome {
                Ok(dispatch) => dispatch,
                Err(e) => {
                    inner.finalize_failed(&request_id, &placeholder_id, &e);
                    return;
                }
            },
        };

        let backend = dispatch.backend;
        let mut stream = dispatch.stream;
        let stall_bound = inner.config.load().request_timeout();

        loop {
            let step = tokio::select! {
                () = cancel.cancelled() => return,
                step = tokio::time::timeout(stall_bound, stream.next()) => step,
            };
            match step {
                Ok(Some(StreamEvent::Token { text })) => {
                    if !inner.apply_token(&request_id, &placeholder_id, &text) {
                        return;
                    }
                }
                Ok(Some(StreamEvent::Done)) | Ok(None) => {
                    inner.finalize_done(&request_id, &placeholder_id, backend);
                    return;
                }
                Ok(Some(StreamEvent::Error { error })) => {
                    inner.finalize_failed(&request_id, &placeholder_id, &error);
                    return;
                }
                // Mid-stream stall past the request timeout is terminal.
                Err(_) => {
                    let error = TellerError::StreamStalled(format!(
                        "no token within {}ms",
                        stall_bound.as_millis()
                    ));
                    inner.finalize_failed(&request_id, &placeholder_id, &error);
                    return;
                }
            }
        }
    }

    /// Append one token to the placeholder; false when the request is no
    /// longer pending and streaming must stop.
    fn apply_token(&self, request_id: &str, placeholder_id: &str, delta: &str) -> bool {
        let observer = self.observer_guard();
        let mut events = Vec::new();
        {
            let mut state = self.lock_state();
            if !state.pending_matches(request_id) {
                return false;
            }
            if state.phase == SessionPhase::Sending {
                state.phase = SessionPhase::Streaming;
                events.push(SessionEvent::PhaseChanged {
                    phase: SessionPhase::Streaming,
                });
            }
            let Some(message) = state.message_mut(placeholder_id) else {
                return false;
            };
            message.content.push_str(delta);
            events.push(SessionEvent::ContentDelta {
                message_id: placeholder_id.to_owned(),
                delta: delta.to_owned(),
            });
        }
        Self::emit(&observer, events);
        true
    }

    fn finalize_done(&self, request_id: &str, placeholder_id: &str, backend: Backend) {
        let observer = self.observer_guard();
        let mut events = Vec::new();
        {
            let mut state = self.lock_state();
            if !state.pending_matches(request_id) {
                return;
            }
            state.pending = None;
            if let Some(message) = state.message_mut(placeholder_id) {
                message.source = Some(backend);
            }
            state.phase = SessionPhase::Idle;
            events.push(SessionEvent::RequestFinished {
                message_id: placeholder_id.to_owned(),
                backend,
            });
            events.push(SessionEvent::PhaseChanged {
                phase: SessionPhase::Idle,
            });
        }
        Self::emit(&observer, events);
    }

    /// Terminal failure: the placeholder becomes the documented error string
    /// and the session passes through `error` back to `idle`, so the next
    /// send is always accepted.
    fn finalize_failed(&self, request_id: &str, placeholder_id: &str, error: &TellerError) {
        warn!(error = %error, "assistant request failed");
        let observer = self.observer_guard();
        let mut events = Vec::new();
        {
            let mut state = self.lock_state();
            if !state.pending_matches(request_id) {
                return;
            }
            state.pending = None;
            if let Some(message) = state.message_mut(placeholder_id) {
                message.content = FAILURE_MESSAGE.to_owned();
            }
            state.phase = SessionPhase::Idle;
            events.push(SessionEvent::RequestFailed {
                message_id: placeholder_id.to_owned(),
                error: error.to_string(),
            });
            events.push(SessionEvent::PhaseChanged {
                phase: SessionPhase::Error,
            });
            events.push(SessionEvent::PhaseChanged {
                phase: SessionPhase::Idle,
            });
        }
        Self::emit(&observer, events);
    }
}
