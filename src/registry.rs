//! Model discovery across both backends.
//!
//! The registry queries the local listing first; the cloud listing is
//! consulted only when the local one fails and the fallback is enabled.
//! Partial failure never surfaces as an error: callers get whatever subset
//! succeeded, and when everything fails they keep getting the last
//! successful listing.

use crate::backend::{AiModel, InferenceBackend};
use crate::config::ConfigStore;
use crate::error::{Result, TellerError};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, warn};

/// Whether `list_models` may return the cache while a refresh runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshMode {
    /// Wait for the refresh and return the fresh listing.
    Blocking,
    /// Kick off the refresh and return the cache immediately.
    NonBlocking,
}

/// Cached, merged view of what models are available.
///
/// Cheap to clone; all clones share one cache.
#[derive(Clone)]
pub struct ModelRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    config: Arc<ConfigStore>,
    local: Arc<dyn InferenceBackend>,
    cloud: Arc<dyn InferenceBackend>,
    cache: Mutex<Vec<AiModel>>,
}

impl ModelRegistry {
    pub fn new(
        config: Arc<ConfigStore>,
        local: Arc<dyn InferenceBackend>,
        cloud: Arc<dyn InferenceBackend>,
    ) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                config,
                local,
                cloud,
                cache: Mutex::new(Vec::new()),
            }),
        }
    }

    /// List available models.
    ///
    /// Always starts a live refresh. [`RefreshMode::Blocking`] waits for it;
    /// [`RefreshMode::NonBlocking`] answers from the cache right away while
    /// the refresh continues in a spawned task.
    pub async fn list_models(&self, mode: RefreshMode) -> Vec<AiModel> {
        match mode {
            RefreshMode::Blocking => self.refresh().await,
            RefreshMode::NonBlocking => {
                let inner = Arc::clone(&self.inner);
                tokio::spawn(async move {
                    inner.refresh().await;
                });
                self.cached()
            }
        }
    }

    /// Refresh now and return the resulting listing.
    pub async fn refresh(&self) -> Vec<AiModel> {
        self.inner.refresh().await
    }

    /// Last successful listing without touching the network.
    #[must_use]
    pub fn cached(&self) -> Vec<AiModel> {
        self.inner
            .cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl RegistryInner {
    async fn refresh(&self) -> Vec<AiModel> {
        let config = self.config.load();
        let bound = config.probe_timeout();

        let mut merged = Vec::new();
        let mut any_succeeded = false;

        match bounded_listing(self.local.as_ref(), bound).await {
            Ok(models) => {
                any_succeeded = true;
                merged.extend(models);
            }
            Err(e) => {
                warn!(error = %e, "local model listing failed");
                if config.enable_fallback {
                    match bounded_listing(self.cloud.as_ref(), bound).await {
                        Ok(models) => {
                            any_succeeded = true;
                            merged.extend(models);
                        }
                        Err(e) => warn!(error = %e, "cloud model listing failed"),
                    }
                }
            }
        }

        if any_succeeded {
            let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
            *cache = merged.clone();
            debug!(count = merged.len(), "model cache refreshed");
            merged
        } else {
            // Every attempted listing failed: keep serving the last one.
            self.cache
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        }
    }
}

async fn bounded_listing(
    backend: &dyn InferenceBackend,
    bound: Duration,
) -> Result<Vec<AiModel>> {
    match tokio::time::timeout(bound, backend.list_models()).await {
        Ok(result) => result,
        Err(_) => Err(TellerError::Probe(format!(
            "model listing timed out after {}ms",
            bound.as_millis()
        ))),
    }
}
