//! Teller: local-first AI assistant core for a banking CRM.
//!
//! This crate routes chat inference between an on-prem model server and a
//! managed cloud fallback:
//! Config → Probe → Route → Stream → Session
//!
//! # Architecture
//!
//! The core is built from small, independently testable layers:
//! - **Config**: Durable routing policy persisted through a key/value seam
//! - **Monitor**: Bounded health probes against the local endpoint
//! - **Registry**: Model discovery, merging in cloud models on local failure
//! - **Router**: Pure backend choice plus a one-shot pre-token fallback retry
//! - **Session**: Ordered message history with streaming and cancellation
//! - **Host**: Versioned JSON envelopes over stdin/stdout for embedding shells

pub mod actions;
pub mod assistant;
pub mod backend;
pub mod config;
pub mod error;
pub mod host;
pub mod monitor;
pub mod paths;
pub mod registry;
pub mod router;
pub mod session;
pub mod store;

pub use assistant::{Assistant, AssistantBuilder};
pub use backend::{AiModel, Backend, GenerateRequest, InferenceBackend, StreamEvent};
pub use config::{ConfigStore, LocalAiConfig, RECOMMENDED_MODELS};
pub use error::{Result, TellerError};
pub use monitor::{ConnectionSource, ConnectionStatus};
pub use registry::RefreshMode;
pub use session::{AiMessage, Role, SendReceipt, SessionEvent, SessionPhase};
