//! Connection settings for the assistant core.
//!
//! [`LocalAiConfig`] is the durable routing policy: where the local model
//! server lives, which model to ask for, whether the cloud fallback may be
//! used, and how long a request may run. [`ConfigStore`] persists it as a
//! JSON payload under a single key of the [`KeyValueStore`] seam, so the
//! embedding shell decides where the bytes actually live.

use crate::error::{Result, TellerError};
use crate::store::KeyValueStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Models recommended for on-prem CRM deployments, best first.
///
/// The default configuration asks for the first entry; the settings UI
/// surfaces the rest as suggestions when the local listing is empty.
pub const RECOMMENDED_MODELS: &[&str] = &["llama3.2", "mistral", "qwen2.5:7b", "phi3"];

/// Key under which the config payload is stored.
const CONFIG_KEY: &str = "local_ai_config";

/// Probes must stay short even when inference may run for minutes.
const PROBE_TIMEOUT_CAP_MS: u64 = 5_000;

/// Durable routing policy for the assistant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalAiConfig {
    /// Base URL of the local inference server.
    pub endpoint_url: String,
    /// Model requested when the caller does not name one.
    pub default_model: String,
    /// Whether the cloud fallback may be used when local is down.
    pub enable_fallback: bool,
    /// Upper bound for a full inference call, in milliseconds.
    pub timeout_ms: u64,
}

impl Default for LocalAiConfig {
    fn default() -> Self {
        Self {
            endpoint_url: "http://localhost:11434".to_owned(),
            default_model: RECOMMENDED_MODELS[0].to_owned(),
            enable_fallback: true,
            timeout_ms: 60_000,
        }
    }
}

impl LocalAiConfig {
    /// Set the local endpoint URL.
    #[must_use]
    pub fn with_endpoint_url(mut self, url: impl Into<String>) -> Self {
        self.endpoint_url = url.into();
        self
    }

    /// Set the default model name.
    #[must_use]
    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }

    /// Enable or disable the cloud fallback.
    #[must_use]
    pub fn with_fallback_enabled(mut self, enabled: bool) -> Self {
        self.enable_fallback = enabled;
        self
    }

    /// Set the request timeout in milliseconds.
    #[must_use]
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// Validate the config for persistence.
    ///
    /// # Errors
    ///
    /// Returns [`TellerError::Validation`] when `endpoint_url` is not an
    /// absolute http/https URL or `timeout_ms` is zero.
    pub fn validate(&self) -> Result<()> {
        let parsed = url::Url::parse(&self.endpoint_url).map_err(|e| {
            TellerError::Validation(format!(
                "endpoint_url {:?} is not a valid absolute URL: {e}",
                self.endpoint_url
            ))
        })?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(TellerError::Validation(format!(
                "endpoint_url must use http or https, got {:?}",
                parsed.scheme()
            )));
        }
        if parsed.host_str().is_none() {
            return Err(TellerError::Validation(
                "endpoint_url has no host".to_owned(),
            ));
        }
        if self.timeout_ms == 0 {
            return Err(TellerError::Validation(
                "timeout_ms must be greater than zero".to_owned(),
            ));
        }
        Ok(())
    }

    /// Timeout for a full inference request.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Bounded timeout for health probes and model listings:
    /// `min(timeout_ms, 5000)`.
    #[must_use]
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.min(PROBE_TIMEOUT_CAP_MS))
    }
}

/// Loads and saves [`LocalAiConfig`] through the key/value seam.
pub struct ConfigStore {
    store: Arc<dyn KeyValueStore>,
}

impl ConfigStore {
    /// Wrap a key/value store.
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Returns the persisted config, or the documented default when nothing
    /// was saved yet.
    ///
    /// A payload that fails to read or deserialize is logged and replaced by
    /// the default; the next successful `save` overwrites the damaged
    /// payload.
    pub fn load(&self) -> LocalAiConfig {
        let raw = match self.store.get(CONFIG_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                debug!("no persisted config; using defaults");
                return LocalAiConfig::default();
            }
            Err(e) => {
                warn!(error = %e, "failed to read persisted config; using defaults");
                return LocalAiConfig::default();
            }
        };
        match serde_json::from_str(&raw) {
            Ok(config) => config,
            Err(e) => {
                warn!(error = %e, "persisted config is corrupt; using defaults");
                LocalAiConfig::default()
            }
        }
    }

    /// Validate and persist `config`.
    ///
    /// # Errors
    ///
    /// Returns [`TellerError::Validation`] for an invalid config (nothing is
    /// persisted) or [`TellerError::Store`] when the store write fails.
    pub fn save(&self, config: &LocalAiConfig) -> Result<()> {
        config.validate()?;
        let payload = serde_json::to_string(config)
            .map_err(|e| TellerError::Store(format!("failed to serialize config: {e}")))?;
        self.store.set(CONFIG_KEY, &payload)?;
        debug!(
            endpoint_url = %config.endpoint_url,
            default_model = %config.default_model,
            enable_fallback = config.enable_fallback,
            timeout_ms = config.timeout_ms,
            "config saved"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::store::MemoryStore;

    fn store() -> (Arc<MemoryStore>, ConfigStore) {
        let kv = Arc::new(MemoryStore::new());
        let config_store = ConfigStore::new(kv.clone() as Arc<dyn KeyValueStore>);
        (kv, config_store)
    }

    // ── defaults ─────────────────────────────────────────────────────────

    #[test]
    fn default_config_values() {
        let config = LocalAiConfig::default();
        assert_eq!(config.endpoint_url, "http://localhost:11434");
        assert_eq!(config.default_model, "llama3.2");
        assert!(config.enable_fallback);
        assert_eq!(config.timeout_ms, 60_000);
    }

    #[test]
    fn default_model_is_first_recommended() {
        assert_eq!(LocalAiConfig::default().default_model, RECOMMENDED_MODELS[0]);
    }

    #[test]
    fn default_config_validates() {
        LocalAiConfig::default().validate().unwrap();
    }

    // ── validation ───────────────────────────────────────────────────────

    #[test]
    fn validate_rejects_relative_url() {
        let config = LocalAiConfig::default().with_endpoint_url("localhost:11434/api");
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_garbage_url() {
        let config = LocalAiConfig::default().with_endpoint_url("not a url");
        let err = config.validate().unwrap_err();
        assert_eq!(err.code(), "VALIDATION_FAILED");
    }

    #[test]
    fn validate_rejects_non_http_scheme() {
        let config = LocalAiConfig::default().with_endpoint_url("ftp://models.internal");
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_zero_timeout() {
        let config = LocalAiConfig::default().with_timeout_ms(0);
        let err = config.validate().unwrap_err();
        assert_eq!(err.code(), "VALIDATION_FAILED");
    }

    #[test]
    fn validate_accepts_https() {
        let config = LocalAiConfig::default().with_endpoint_url("https://models.internal:8443");
        config.validate().unwrap();
    }

    // ── timeouts ─────────────────────────────────────────────────────────

    #[test]
    fn probe_timeout_is_capped() {
        let config = LocalAiConfig::default().with_timeout_ms(60_000);
        assert_eq!(config.probe_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn probe_timeout_uses_smaller_request_timeout() {
        let config = LocalAiConfig::default().with_timeout_ms(2_000);
        assert_eq!(config.probe_timeout(), Duration::from_millis(2_000));
    }

    #[test]
    fn request_timeout_matches_config() {
        let config = LocalAiConfig::default().with_timeout_ms(45_000);
        assert_eq!(config.request_timeout(), Duration::from_millis(45_000));
    }

    // ── persistence ──────────────────────────────────────────────────────

    #[test]
    fn load_without_save_returns_default() {
        let (_, config_store) = store();
        assert_eq!(config_store.load(), LocalAiConfig::default());
    }

    #[test]
    fn save_and_load_round_trip() {
        let (_, config_store) = store();
        let config = LocalAiConfig::default()
            .with_endpoint_url("http://10.0.0.5:11434")
            .with_default_model("mistral")
            .with_fallback_enabled(false)
            .with_timeout_ms(30_000);

        config_store.save(&config).unwrap();
        assert_eq!(config_store.load(), config);
    }

    #[test]
    fn save_invalid_persists_nothing() {
        let (kv, config_store) = store();
        let bad = LocalAiConfig::default().with_timeout_ms(0);

        assert!(config_store.save(&bad).is_err());
        assert_eq!(kv.get(CONFIG_KEY).unwrap(), None);
    }

    #[test]
    fn load_corrupt_payload_returns_default() {
        let (kv, config_store) = store();
        kv.set(CONFIG_KEY, "{not json").unwrap();
        assert_eq!(config_store.load(), LocalAiConfig::default());
    }

    #[test]
    fn load_fills_missing_fields_with_defaults() {
        let (kv, config_store) = store();
        kv.set(CONFIG_KEY, r#"{"endpoint_url":"http://10.1.1.1:11434"}"#)
            .unwrap();

        let config = config_store.load();
        assert_eq!(config.endpoint_url, "http://10.1.1.1:11434");
        assert_eq!(config.timeout_ms, 60_000);
        assert!(config.enable_fallback);
    }
}
