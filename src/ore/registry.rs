use crate::core::errors::OreError;
use crate::core::kernel::{HttpWrapper, OreResponse, RestClientConfig};
use crate::ore::session::OreSession;
use dashmap::DashMap;
use futures_util::future::join_all;
use secrecy::Secret;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, error, info, instrument, warn};

type SessionSlot = Arc<OnceCell<Arc<OreSession>>>;

/// Process-wide cache of Ore sessions, one per endpoint
///
/// All sessions share one [`HttpWrapper`]. The first caller for an endpoint
/// connects the session; concurrent callers for the same endpoint wait on that
/// single connection. A cached session that was terminated or failed to
/// re-authenticate is dropped and replaced on the next look-up. If two callers
/// use different API keys for the same endpoint, the first key wins.
pub struct SessionRegistry {
    http: Arc<HttpWrapper>,
    session_duration: Duration,
    sessions: DashMap<String, SessionSlot>,
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("http", &self.http)
            .field("session_duration", &self.session_duration)
            .field("sessions", &self.sessions.len())
            .finish()
    }
}

impl SessionRegistry {
    pub fn new(transport: RestClientConfig, session_duration: Duration) -> Self {
        Self::with_transport(Arc::new(HttpWrapper::new(transport)), session_duration)
    }

    pub fn with_transport(http: Arc<HttpWrapper>, session_duration: Duration) -> Self {
        Self {
            http,
            session_duration,
            sessions: DashMap::new(),
        }
    }

    pub fn transport(&self) -> &Arc<HttpWrapper> {
        &self.http
    }

    /// Number of endpoints with a live session
    pub fn len(&self) -> usize {
        self.sessions
            .iter()
            .filter(|entry| entry.value().get().is_some_and(|session| !session.is_broken()))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The session for `endpoint`, connecting it on first use
    #[instrument(skip(self, api_key))]
    pub async fn session(
        &self,
        api_key: &Secret<String>,
        endpoint: &str,
    ) -> Result<Arc<OreSession>, OreError> {
        let slot = self.slot(endpoint);

        let result = slot
            .get_or_try_init(|| async {
                debug!("Opening new Ore session");
                OreSession::connect(
                    Arc::clone(&self.http),
                    api_key.clone(),
                    endpoint,
                    self.session_duration,
                )
                .await
                .map(Arc::new)
            })
            .await
            .cloned();

        if result.is_err() {
            self.sessions
                .remove_if(endpoint, |_, cached| {
                Arc::ptr_eq(cached, &slot) && !cached.initialized()
            });
        }

        result
    }

    fn slot(&self, endpoint: &str) -> SessionSlot {
        let slot = self
            .sessions
            .entry(endpoint.to_string())
            .or_default()
            .value()
            .clone();

        if !slot.get().is_some_and(|session| session.is_broken()) {
            return slot;
        }

        warn!(endpoint, "Discarding broken Ore session");
        self.sessions
            .remove_if(endpoint, |_, cached| Arc::ptr_eq(cached, &slot));
        self.sessions
            .entry(endpoint.to_string())
            .or_default()
            .value()
            .clone()
    }

    /// Terminate every live session, then close the shared transport
    ///
    /// Waits at most `timeout` for the terminations. Failures and timeouts are
    /// logged; this never fails.
    #[instrument(skip(self))]
    pub async fn shutdown(&self, timeout: Duration) {
        let sessions: Vec<(String, Arc<OreSession>)> = self
            .sessions
            .iter()
            .filter_map(|entry| {
                entry
                    .value()
                    .get()
                    .map(|session| (entry.key().clone(), Arc::clone(session)))
            })
            .collect();

        let terminations = join_all(sessions.iter().map(|(endpoint, session)| async move {
            (endpoint.as_str(), session.terminate().await)
        }));

        match tokio::time::timeout(timeout, terminations).await {
            Ok(results) => {
                for (endpoint, result) in results {
                    match result {
                        Ok(OreResponse::Success(())) => {
                            debug!(endpoint, "Terminated Ore session");
                        }
                        Ok(response) => {
                            warn!(
                                endpoint,
                                code = response.response_code(),
                                "Ore session termination was refused"
                            );
                        }
                        Err(e) => {
                            error!(endpoint, error = %e, "Failed to terminate Ore session");
                        }
                    }
                }
            }
            Err(_) => {
                warn!(
                    ?timeout,
                    sessions = sessions.len(),
                    "Timed out waiting for Ore sessions to terminate"
                );
            }
        }

        self.sessions.clear();
        self.http.close();
        info!("Ore session registry shut down");
    }
}
