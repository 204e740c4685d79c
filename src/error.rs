//! Error types for the teller core.
//!
//! Each variant carries a stable error code (SCREAMING_SNAKE_CASE) that is
//! included in the Display output and accessible via [`TellerError::code()`].
//! The embedding shell matches on codes, never on Display text.

/// Stable error codes for programmatic error handling.
///
/// These codes never change and form part of the public API contract.
pub mod error_codes {
    /// Invalid configuration rejected on save.
    pub const VALIDATION_FAILED: &str = "VALIDATION_FAILED";

    /// Operation not permitted in the session's current phase.
    pub const INVALID_STATE: &str = "INVALID_STATE";

    /// Neither the local backend nor the cloud fallback is reachable.
    pub const NO_BACKEND_AVAILABLE: &str = "NO_BACKEND_AVAILABLE";

    /// Health probe of the local backend failed or timed out.
    pub const PROBE_FAILED: &str = "PROBE_FAILED";

    /// An open stream produced no token within the configured window.
    pub const STREAM_STALLED: &str = "STREAM_STALLED";

    /// Transport-level failure while dispatching a request.
    pub const REQUEST_FAILED: &str = "REQUEST_FAILED";

    /// A backend answered with a failure status or a malformed body.
    pub const BACKEND_ERROR: &str = "BACKEND_ERROR";

    /// Key/value store could not be read or written.
    pub const STORE_FAILED: &str = "STORE_FAILED";

    /// Host bridge I/O failure (stdin/stdout).
    pub const CHANNEL_FAILED: &str = "CHANNEL_FAILED";
}

/// Errors produced by the teller core.
///
/// Each variant includes a stable error code accessible via
/// [`TellerError::code()`]. The Display impl formats as `[CODE] message`.
#[derive(Debug, thiserror::Error)]
pub enum TellerError {
    /// Invalid configuration rejected on save (nothing persisted).
    #[error("[{}] {}", error_codes::VALIDATION_FAILED, .0)]
    Validation(String),

    /// Operation not permitted in the session's current phase.
    #[error("[{}] {}", error_codes::INVALID_STATE, .0)]
    InvalidState(String),

    /// Neither the local backend nor (if enabled) the cloud fallback is
    /// reachable; terminal for the request that triggered routing.
    #[error("[{}] {}", error_codes::NO_BACKEND_AVAILABLE, .0)]
    NoBackendAvailable(String),

    /// Health probe of the local backend failed or timed out. Absorbed by
    /// the fallback policy; only surfaced when both paths are down.
    #[error("[{}] {}", error_codes::PROBE_FAILED, .0)]
    Probe(String),

    /// An open stream produced no token within the configured window.
    #[error("[{}] {}", error_codes::STREAM_STALLED, .0)]
    StreamStalled(String),

    /// Transport-level failure while dispatching a request (connection
    /// refused, TLS failure, mid-request disconnect).
    #[error("[{}] {}", error_codes::REQUEST_FAILED, .0)]
    Request(String),

    /// A backend answered with a failure status or a malformed body.
    #[error("[{}] {}", error_codes::BACKEND_ERROR, .0)]
    Backend(String),

    /// Key/value store could not be read or written.
    #[error("[{}] {}", error_codes::STORE_FAILED, .0)]
    Store(String),

    /// Host bridge I/O failure (stdin/stdout).
    #[error("[{}] {}", error_codes::CHANNEL_FAILED, .0)]
    Channel(String),
}

impl TellerError {
    /// Returns the stable error code for this error.
    ///
    /// Codes are SCREAMING_SNAKE_CASE strings that remain stable across
    /// releases; match on these rather than parsing Display output.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => error_codes::VALIDATION_FAILED,
            Self::InvalidState(_) => error_codes::INVALID_STATE,
            Self::NoBackendAvailable(_) => error_codes::NO_BACKEND_AVAILABLE,
            Self::Probe(_) => error_codes::PROBE_FAILED,
            Self::StreamStalled(_) => error_codes::STREAM_STALLED,
            Self::Request(_) => error_codes::REQUEST_FAILED,
            Self::Backend(_) => error_codes::BACKEND_ERROR,
            Self::Store(_) => error_codes::STORE_FAILED,
            Self::Channel(_) => error_codes::CHANNEL_FAILED,
        }
    }

    /// Returns the inner message without the code prefix.
    pub fn message(&self) -> &str {
        match self {
            Self::Validation(m)
            | Self::InvalidState(m)
            | Self::NoBackendAvailable(m)
            | Self::Probe(m)
            | Self::StreamStalled(m)
            | Self::Request(m)
            | Self::Backend(m)
            | Self::Store(m)
            | Self::Channel(m) => m,
        }
    }

    /// Returns true if this error is a transient backend failure eligible
    /// for the one-shot local → fallback retry.
    ///
    /// The router only consults this for failures observed before the first
    /// token of a dispatch; the session treats every later failure as
    /// terminal regardless of classification.
    pub fn is_retryable(&self) -> bool {
        match self {
            // Connectivity-shaped failures: the fallback path may succeed.
            Self::Probe(_) | Self::StreamStalled(_) | Self::Request(_) | Self::Backend(_) => true,
            // Caller mistakes and local-state failures do not improve by
            // switching backends.
            Self::Validation(_)
            | Self::InvalidState(_)
            | Self::NoBackendAvailable(_)
            | Self::Store(_)
            | Self::Channel(_) => false,
        }
    }
}

/// Convenience alias for teller results.
pub type Result<T> = std::result::Result<T, TellerError>;
