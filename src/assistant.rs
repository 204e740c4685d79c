//! The embedding surface.
//!
//! [`Assistant`] wires the config store, backends, monitor, registry,
//! router, session, and quick-action catalog into one object for the shell
//! to hold. All state lives in the components; this type only routes calls.

use crate::actions::{QuickAction, QuickActionCatalog};
use crate::backend::{AiModel, CloudBackend, InferenceBackend, LocalBackend};
use crate::config::{ConfigStore, LocalAiConfig};
use crate::error::Result;
use crate::monitor::{ConnectionMonitor, ConnectionStatus};
use crate::registry::{ModelRegistry, RefreshMode};
use crate::router::FallbackRouter;
use crate::session::{AiMessage, ChatSession, SendReceipt, SessionObserver, SessionPhase};
use crate::store::{FileStore, KeyValueStore, MemoryStore};
use std::sync::Arc;

/// Everything the UI boundary needs, behind one handle.
pub struct Assistant {
    config: Arc<ConfigStore>,
    monitor: Arc<ConnectionMonitor>,
    registry: ModelRegistry,
    router: Arc<FallbackRouter>,
    session: ChatSession,
    catalog: QuickActionCatalog,
}

impl Assistant {
    /// Assistant over the default on-disk store and cloud endpoint.
    ///
    /// # Errors
    ///
    /// Fails when the backing store file cannot be opened.
    pub fn new() -> Result<Self> {
        Self::builder().build()
    }

    /// Assistant over an in-memory store; nothing persists.
    pub fn in_memory() -> Result<Self> {
        Self::builder().store(Arc::new(MemoryStore::new())).build()
    }

    #[must_use]
    pub fn builder() -> AssistantBuilder {
        AssistantBuilder::default()
    }

    /// Current persisted configuration (or the default).
    #[must_use]
    pub fn config(&self) -> LocalAiConfig {
        self.config.load()
    }

    /// Validate and persist a configuration.
    ///
    /// # Errors
    ///
    /// [`crate::TellerError::Validation`] on a bad config (nothing is
    /// persisted), [`crate::TellerError::Store`] on write failure.
    pub fn save_config(&self, config: &LocalAiConfig) -> Result<()> {
        self.config.save(config)
    }

    /// Probe connection health now.
    pub async fn test_connection(&self) -> ConnectionStatus {
        self.monitor.test().await
    }

    /// Latest probe outcome without re-probing.
    #[must_use]
    pub fn connection_status(&self) -> Option<ConnectionStatus> {
        self.monitor.cached()
    }

    /// Available models; see [`RefreshMode`] for the blocking behaviour.
    pub async fn list_models(&self, mode: RefreshMode) -> Vec<AiModel> {
        self.registry.list_models(mode).await
    }

    /// Send a user message; see [`ChatSession::send_message`].
    ///
    /// # Errors
    ///
    /// Validation and pending-state errors, surfaced synchronously.
    pub fn send_message(
        &self,
        text: &str,
        context: Option<serde_json::Map<String, serde_json::Value>>,
    ) -> Result<SendReceipt> {
        self.session.send_message(text, context)
    }

    /// Cancel the in-flight request, if any.
    pub fn cancel_request(&self) {
        self.session.cancel_request();
    }

    /// Drop the conversation when idle.
    ///
    /// # Errors
    ///
    /// [`crate::TellerError::InvalidState`] while a request is pending.
    pub fn clear_messages(&self) -> Result<()> {
        self.session.clear_messages()
    }

    /// Conversation snapshot in append order.
    #[must_use]
    pub fn messages(&self) -> Vec<AiMessage> {
        self.session.messages()
    }

    /// Whether a request is in flight.
    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.session.is_loading()
    }

    /// Session lifecycle phase.
    #[must_use]
    pub fn phase(&self) -> SessionPhase {
        self.session.phase()
    }

    /// Quick actions, rendered against `context` when given.
    #[must_use]
    pub fn quick_actions(
        &self,
        context: Option<&serde_json::Map<String, serde_json::Value>>,
    ) -> Vec<QuickAction> {
        self.catalog.list(context)
    }

    /// Install the session event observer.
    pub fn set_observer(&self, observer: SessionObserver) {
        self.session.set_observer(observer);
    }

    /// How many automatic local-to-fallback retries have run.
    #[must_use]
    pub fn fallback_count(&self) -> u32 {
        self.router.fallback_count()
    }
}

/// Configures and assembles an [`Assistant`].
#[derive(Default)]
pub struct AssistantBuilder {
    store: Option<Arc<dyn KeyValueStore>>,
    cloud_base_url: Option<String>,
    catalog: Option<QuickActionCatalog>,
}

impl AssistantBuilder {
    /// Use this key/value store instead of the default on-disk one.
    #[must_use]
    pub fn store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Point the cloud fallback at a non-default base URL.
    #[must_use]
    pub fn cloud_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.cloud_base_url = Some(base_url.into());
        self
    }

    /// Replace the built-in quick-action catalog.
    #[must_use]
    pub fn catalog(mut self, catalog: QuickActionCatalog) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Assemble the assistant.
    ///
    /// # Errors
    ///
    /// Fails when no store was injected and the default store file cannot
    /// be opened.
    pub fn build(self) -> Result<Assistant> {
        let store: Arc<dyn KeyValueStore> = match self.store {
            Some(store) => store,
            None => Arc::new(FileStore::open_default()?),
        };
        let config = Arc::new(ConfigStore::new(store));

        let local: Arc<dyn InferenceBackend> = Arc::new(LocalBackend::new(config.clone()));
        let cloud: Arc<dyn InferenceBackend> = Arc::new(match self.cloud_base_url {
            Some(url) => CloudBackend::with_base_url(url),
            None => CloudBackend::new(),
        });

        let monitor = Arc::new(ConnectionMonitor::new(
            config.clone(),
            local.clone(),
            cloud.clone(),
        ));
        let registry = ModelRegistry::new(config.clone(), local.clone(), cloud.clone());
        let router = Arc::new(FallbackRouter::new(
            config.clone(),
            monitor.clone(),
            local,
            cloud,
        ));
        let session = ChatSession::new(config.clone(), router.clone());

        Ok(Assistant {
            config,
            monitor,
            registry,
            router,
            session,
            catalog: self.catalog.unwrap_or_default(),
        })
    }
}
