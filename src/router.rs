//! Backend choice and dispatch.
//!
//! [`FallbackRouter::route`] is the pure decision; [`FallbackRouter::dispatch`]
//! opens the stream and owns the single automatic retry: when the local path
//! fails before its first event and the fallback is enabled, the request is
//! re-opened once against the cloud. Fallback-path failures are terminal.

use crate::backend::{Backend, GenerateRequest, InferenceBackend, StreamEvent, TokenStream};
use crate::config::{ConfigStore, LocalAiConfig};
use crate::error::{Result, TellerError};
use crate::monitor::{ConnectionMonitor, ConnectionStatus};
use futures_util::StreamExt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::{debug, warn};

/// An opened token stream plus the backend serving it.
pub struct Dispatch {
    /// Which backend answered.
    pub backend: Backend,
    /// The event stream, first event already confirmed to have arrived.
    pub stream: TokenStream,
}

impl std::fmt::Debug for Dispatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatch")
            .field("backend", &self.backend)
            .field("stream", &"<TokenStream>")
            .finish()
    }
}

/// Routes requests to a backend and retries once on local failure.
pub struct FallbackRouter {
    config: Arc<ConfigStore>,
    monitor: Arc<ConnectionMonitor>,
    local: Arc<dyn InferenceBackend>,
    cloud: Arc<dyn InferenceBackend>,
    fallback_count: AtomicU32,
}

impl FallbackRouter {
    pub fn new(
        config: Arc<ConfigStore>,
        monitor: Arc<ConnectionMonitor>,
        local: Arc<dyn InferenceBackend>,
        cloud: Arc<dyn InferenceBackend>,
    ) -> Self {
        Self {
            config,
            monitor,
            local,
            cloud,
            fallback_count: AtomicU32::new(0),
        }
    }

    /// Pure routing decision over a health snapshot.
    ///
    /// # Errors
    ///
    /// [`TellerError::NoBackendAvailable`] when the local backend is down
    /// and the fallback is disabled or the snapshot says offline.
    pub fn route(config: &LocalAiConfig, status: &ConnectionStatus) -> Result<Backend> {
        if status.connected {
            Ok(Backend::Local)
        } else if config.enable_fallback {
            Ok(Backend::Fallback)
        } else {
            Err(TellerError::NoBackendAvailable(
                "local backend is unreachable and the fallback is disabled".to_owned(),
            ))
        }
    }

    /// Route (re-probing a stale status) and open a confirmed stream.
    ///
    /// The returned stream has already produced its first event, so the
    /// retry window is closed once this returns.
    ///
    /// # Errors
    ///
    /// Routing failures, plus any open failure that survives the retry
    /// policy.
    pub async fn dispatch(&self, request: &GenerateRequest) -> Result<Dispatch> {
        let config = self.config.load();
        let status = self.monitor.status_for_routing().await;
        let target = Self::route(&config, &status)?;

        match target {
            Backend::Fallback => {
                debug!(model = %request.model, "dispatching to fallback");
                let stream = self.open(self.cloud.as_ref(), &config, request).await?;
                Ok(Dispatch {
                    backend: Backend::Fallback,
                    stream,
                })
            }
            Backend::Local => {
                debug!(model = %request.model, "dispatching to local");
                match self.open(self.local.as_ref(), &config, request).await {
                    Ok(stream) => Ok(Dispatch {
                        backend: Backend::Local,
                        stream,
                    }),
                    Err(e) if config.enable_fallback && e.is_retryable() => {
                        warn!(error = %e, "local dispatch failed before first token; retrying on fallback");
                        self.fallback_count.fetch_add(1, Ordering::Relaxed);
                        let stream = self.open(self.cloud.as_ref(), &config, request).await?;
                        Ok(Dispatch {
                            backend: Backend::Fallback,
                            stream,
                        })
                    }
                    Err(e) => Err(e),
                }
            }
        }
    }

    /// How many automatic local-to-fallback retries have run.
    #[must_use]
    pub fn fallback_count(&self) -> u32 {
        self.fallback_count.load(Ordering::Relaxed)
    }

    /// Open a stream and wait for its first event, both under the request
    /// timeout.
    ///
    /// One bound covers the whole window from the open call to the first
    /// event: a server that accepts the connection and never answers is the
    /// same failure as one that answers and never streams. Every failure
    /// out of here is pre-first-token by construction: the open call
    /// failed, nothing arrived within the bound, or the first event was an
    /// in-band error.
    async fn open(
        &self,
        backend: &dyn InferenceBackend,
        config: &LocalAiConfig,
        request: &GenerateRequest,
    ) -> Result<TokenStream> {
        let bound = config.request_timeout();
        let opened = tokio::time::timeout(bound, async {
            let mut stream = backend.generate(request).await?;
            let first = stream.next().await;
            Ok::<_, TellerError>((stream, first))
        })
        .await;

        match opened {
            Ok(Ok((_, Some(StreamEvent::Error { error })))) => Err(error),
            Ok(Ok((stream, Some(first)))) => {
                // Put the consumed event back in front of the stream.
                Ok(Box::pin(futures_util::stream::iter([first]).chain(stream)))
            }
            Ok(Ok((_, None))) => Err(TellerError::Backend(format!(
                "{} stream ended before the first token",
                backend.kind()
            ))),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(TellerError::StreamStalled(format!(
                "no token from {} within {}ms",
                backend.kind(),
                bound.as_millis()
            ))),
        }
    }
}
