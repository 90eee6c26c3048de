use crate::core::errors::OreError;
use crate::core::kernel::codec::BodyDecoder;
use crate::core::kernel::response::{classify, OreResponse};
use crate::core::kernel::signer::Signer;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio_retry::strategy::{jitter, FixedInterval};
use tokio_retry::RetryIf;
use tracing::{debug, instrument, warn};

/// Identifying user agent sent with every request
pub fn default_user_agent() -> String {
    format!(
        "orepublish/{} ({}; {})",
        env!("CARGO_PKG_VERSION"),
        std::env::consts::OS,
        std::env::consts::ARCH
    )
}

/// Configuration for the HTTP transport
#[derive(Clone, Debug)]
pub struct RestClientConfig {
    /// Per-socket read timeout
    pub read_timeout: Duration,
    /// Timeout for establishing a connection
    pub connect_timeout: Duration,
    /// Maximum number of transport-level retries for a failed exchange
    pub max_retries: usize,
    /// Delay between transport-level retries
    pub retry_backoff: Duration,
    /// User agent string to include in requests
    pub user_agent: String,
}

impl Default for RestClientConfig {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(10),
            max_retries: 5,
            retry_backoff: Duration::from_millis(500),
            user_agent: default_user_agent(),
        }
    }
}

impl RestClientConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        self
    }

    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_retry_backoff(mut self, retry_backoff: Duration) -> Self {
        self.retry_backoff = retry_backoff;
        self
    }

    pub fn with_user_agent(mut self, user_agent: String) -> Self {
        self.user_agent = user_agent;
        self
    }
}

/// Builds a fresh request for every transport attempt
///
/// Request bodies are streamed, so a retried exchange needs a new body rather
/// than a replay of the one already consumed.
#[async_trait]
pub trait RequestFactory: Send + Sync {
    async fn build(&self, client: &Client) -> Result<RequestBuilder, OreError>;
}

#[async_trait]
impl<F> RequestFactory for F
where
    F: Fn(&Client) -> Result<RequestBuilder, OreError> + Send + Sync,
{
    async fn build(&self, client: &Client) -> Result<RequestBuilder, OreError> {
        self(client)
    }
}

/// Failure of one transport attempt
enum AttemptError {
    /// The exchange may be attempted again
    Retryable(OreError),
    Fatal(OreError),
}

impl AttemptError {
    const fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable(_))
    }

    fn into_inner(self) -> OreError {
        match self {
            Self::Retryable(error) | Self::Fatal(error) => error,
        }
    }
}

/// Owner of the underlying HTTP client
///
/// The reqwest client is created on first use and dropped by
/// [`HttpWrapper::close`]. Status codes are never interpreted here; a
/// completed exchange is handed to the response classifier, and only
/// exchanges that produced no response at all are retried.
pub struct HttpWrapper {
    config: RestClientConfig,
    client: Mutex<Option<Client>>,
    closed: AtomicBool,
}

impl std::fmt::Debug for HttpWrapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpWrapper")
            .field("config", &self.config)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl HttpWrapper {
    pub fn new(config: RestClientConfig) -> Self {
        Self {
            config,
            client: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &RestClientConfig {
        &self.config
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Release the HTTP client. Subsequent sends fail.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        let client = self
            .client
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if client.is_some() {
            debug!("Closed HTTP transport");
        }
    }

    fn client(&self) -> Result<Client, OreError> {
        if self.is_closed() {
            return Err(OreError::NetworkError(
                "HTTP transport has been closed".to_string(),
            ));
        }

        let mut slot = self.client.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(client) = slot.as_ref() {
            return Ok(client.clone());
        }

        let client = Client::builder()
            .read_timeout(self.config.read_timeout)
            .connect_timeout(self.config.connect_timeout)
            .user_agent(&self.config.user_agent)
            .build()
            .map_err(|e| OreError::NetworkError(format!("Failed to build HTTP client: {}", e)))?;

        debug!(user_agent = %self.config.user_agent, "Started HTTP transport");
        *slot = Some(client.clone());
        Ok(client)
    }

    /// Send one request and classify its response
    ///
    /// The request is signed right before each attempt, so a retry picks up a
    /// token that changed in the meantime.
    #[instrument(skip_all)]
    pub async fn send<D: BodyDecoder>(
        &self,
        signer: &dyn Signer,
        request: &dyn RequestFactory,
        decoder: D,
    ) -> Result<OreResponse<D::Output>, OreError> {
        let client = self.client()?;
        let strategy = FixedInterval::new(self.config.retry_backoff)
            .map(jitter)
            .take(self.config.max_retries);

        let response = RetryIf::spawn(
            strategy,
            || self.attempt(&client, signer, request),
            |error: &AttemptError| {
                let retry = error.is_retryable();
                if let AttemptError::Retryable(e) = error {
                    warn!(error = %e, "Transport failure, retrying");
                }
                retry
            },
        )
        .await
        .map_err(AttemptError::into_inner)?;

        classify(response, decoder).await
    }

    async fn attempt(
        &self,
        client: &Client,
        signer: &dyn Signer,
        request: &dyn RequestFactory,
    ) -> Result<Response, AttemptError> {
        let mut request = request
            .build(client)
            .await
            .map_err(AttemptError::Fatal)?
            .build()
            .map_err(|e| {
                AttemptError::Fatal(OreError::InvalidParameters(format!(
                    "Failed to build request: {}",
                    e
                )))
            })?;
        signer.sign_request(&mut request).map_err(AttemptError::Fatal)?;

        let method = request.method().clone();
        let url = request.url().clone();
        debug!(%method, %url, "Sending request");

        match client.execute(request).await {
            Ok(response) => {
                debug!(%method, %url, status = %response.status(), "Received response");
                Ok(response)
            }
            Err(e) => {
                let error = OreError::NetworkError(format!("Request failed: {}", e));
                // Connection failures never reached the server; anything else
                // may have, so only idempotent methods are replayed.
                if e.is_connect() || (is_idempotent(&method) && (e.is_timeout() || e.is_request())) {
                    Err(AttemptError::Retryable(error))
                } else {
                    Err(AttemptError::Fatal(error))
                }
            }
        }
    }
}

fn is_idempotent(method: &reqwest::Method) -> bool {
    use reqwest::Method;
    [
        Method::GET,
        Method::HEAD,
        Method::PUT,
        Method::DELETE,
        Method::OPTIONS,
        Method::TRACE,
    ]
    .contains(method)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy() {
        let config = RestClientConfig::default();
        assert_eq!(config.read_timeout, Duration::from_secs(5));
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.retry_backoff, Duration::from_millis(500));
        assert!(config.user_agent.starts_with("orepublish/"));
    }

    #[test]
    fn test_config_builder() {
        let config = RestClientConfig::new()
            .with_read_timeout(Duration::from_secs(1))
            .with_max_retries(1)
            .with_retry_backoff(Duration::from_millis(10))
            .with_user_agent("test-agent".to_string());

        assert_eq!(config.read_timeout, Duration::from_secs(1));
        assert_eq!(config.max_retries, 1);
        assert_eq!(config.user_agent, "test-agent");
    }

    #[test]
    fn test_client_is_created_lazily_and_close_is_idempotent() {
        let http = HttpWrapper::new(RestClientConfig::default());
        assert!(http.client.lock().unwrap().is_none());

        http.client().unwrap();
        assert!(http.client.lock().unwrap().is_some());

        http.close();
        http.close();
        assert!(http.is_closed());
        assert!(http.client.lock().unwrap().is_none());
        assert!(matches!(http.client(), Err(OreError::NetworkError(_))));
    }

    #[test]
    fn test_idempotent_methods() {
        assert!(is_idempotent(&reqwest::Method::GET));
        assert!(is_idempotent(&reqwest::Method::DELETE));
        assert!(!is_idempotent(&reqwest::Method::POST));
    }
}
