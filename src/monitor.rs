//! Connection health tracking.
//!
//! [`ConnectionMonitor`] owns the single source of truth for "which backend
//! would a new request reach". A probe is the local model listing call under
//! the bounded probe timeout, never a full inference round-trip. Outcomes
//! are cached; routing re-probes only when the cache is missing or stale.

use crate::backend::{AiModel, InferenceBackend};
use crate::config::{ConfigStore, LocalAiConfig};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Routing decisions re-probe when the cached status is older than this.
pub const STATUS_STALENESS_SECS: i64 = 30;

/// Which path a new request would reach.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionSource {
    /// The local server answered the probe.
    Local,
    /// The local server is down but the cloud fallback is reachable.
    Fallback,
    /// Nothing is reachable (or the fallback is disabled).
    Offline,
}

impl std::fmt::Display for ConnectionSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local => f.write_str("local"),
            Self::Fallback => f.write_str("fallback"),
            Self::Offline => f.write_str("offline"),
        }
    }
}

/// Snapshot of routing health at one probe.
///
/// `connected` is true exactly when the source is [`ConnectionSource::Local`];
/// the fallback being reachable keeps the assistant usable but does not count
/// as "connected" in the settings UI sense.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionStatus {
    /// Whether the local server answered the probe.
    pub connected: bool,
    /// Which path a new request would reach.
    pub source: ConnectionSource,
    /// Models the local server reported; empty on non-local outcomes.
    pub models: Vec<AiModel>,
    /// When the probe ran.
    pub last_checked: DateTime<Utc>,
    /// Local probe round-trip time; `None` on non-local outcomes.
    pub latency_ms: Option<u64>,
    /// Probe failure reason when fully offline.
    pub error: Option<String>,
}

impl ConnectionStatus {
    fn local(models: Vec<AiModel>, latency_ms: u64) -> Self {
        Self {
            connected: true,
            source: ConnectionSource::Local,
            models,
            last_checked: Utc::now(),
            latency_ms: Some(latency_ms),
            error: None,
        }
    }

    fn fallback() -> Self {
        Self {
            connected: false,
            source: ConnectionSource::Fallback,
            models: Vec::new(),
            last_checked: Utc::now(),
            latency_ms: None,
            error: None,
        }
    }

    fn offline(error: String) -> Self {
        Self {
            connected: false,
            source: ConnectionSource::Offline,
            models: Vec::new(),
            last_checked: Utc::now(),
            latency_ms: None,
            error: Some(error),
        }
    }

    /// Whether this snapshot is too old to route on.
    #[must_use]
    pub fn is_stale(&self) -> bool {
        Utc::now() - self.last_checked > chrono::Duration::seconds(STATUS_STALENESS_SECS)
    }
}

/// Probes backend health and caches the latest outcome.
pub struct ConnectionMonitor {
    config: Arc<ConfigStore>,
    local: Arc<dyn InferenceBackend>,
    cloud: Arc<dyn InferenceBackend>,
    cached: Mutex<Option<ConnectionStatus>>,
}

impl ConnectionMonitor {
    pub fn new(
        config: Arc<ConfigStore>,
        local: Arc<dyn InferenceBackend>,
        cloud: Arc<dyn InferenceBackend>,
    ) -> Self {
        Self {
            config,
            local,
            cloud,
            cached: Mutex::new(None),
        }
    }

    /// Probe now, cache the outcome, and return it.
    ///
    /// The local listing under the probe timeout decides the primary
    /// outcome. When it fails and the fallback is enabled, a cloud
    /// reachability check decides between `fallback` and `offline`.
    pub async fn test(&self) -> ConnectionStatus {
        let config = self.config.load();
        let started = Instant::now();

        let outcome =
            tokio::time::timeout(config.probe_timeout(), self.local.list_models()).await;
        let status = match outcome {
            Ok(Ok(models)) => {
                let latency_ms =
                    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
                info!(
                    count = models.len(),
                    latency_ms, "local backend answered probe"
                );
                ConnectionStatus::local(models, latency_ms)
            }
            Ok(Err(e)) => self.degraded(&config, e.to_string()).await,
            Err(_) => {
                let reason = format!(
                    "probe timed out after {}ms",
                    config.probe_timeout().as_millis()
                );
                self.degraded(&config, reason).await
            }
        };

        let mut cached = self.cached.lock().unwrap_or_else(PoisonError::into_inner);
        *cached = Some(status.clone());
        status
    }

    /// Classify a failed local probe as `fallback` or `offline`.
    async fn degraded(&self, config: &LocalAiConfig, reason: String) -> ConnectionStatus {
        if !config.enable_fallback {
            warn!(error = %reason, "local backend unreachable and fallback disabled");
            return ConnectionStatus::offline(reason);
        }
        match tokio::time::timeout(config.probe_timeout(), self.cloud.list_models()).await {
            Ok(Ok(_)) => {
                warn!(error = %reason, "local backend unreachable; cloud fallback is up");
                ConnectionStatus::fallback()
            }
            Ok(Err(e)) => {
                warn!(local = %reason, cloud = %e, "no backend reachable");
                ConnectionStatus::offline(reason)
            }
            Err(_) => {
                warn!(local = %reason, "no backend reachable (cloud probe timed out)");
                ConnectionStatus::offline(reason)
            }
        }
    }

    /// Latest cached status, if any probe has run.
    #[must_use]
    pub fn cached(&self) -> Option<ConnectionStatus> {
        self.cached
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Status for a routing decision: cached when fresh, probed otherwise.
    pub async fn status_for_routing(&self) -> ConnectionStatus {
        if let Some(status) = self.cached()
            && !status.is_stale()
        {
            return status;
        }
        debug!("cached status missing or stale; probing");
        self.test().await
    }
}
