use crate::core::errors::OreError;
use crate::core::kernel::{
    api_key_authorization, BodyDecoder, DiscardDecoder, HttpWrapper, JsonDecoder, JsonEncoder,
    OreResponse, RequestFactory, SessionSigner, SessionToken, APPLICATION_JSON, APPLICATION_OCTET_STREAM,
};
use crate::core::types::{
    ApiSessionProperties, AuthenticationResponse, DeployVersionInfo, KeyPermissions, Version,
};
use async_trait::async_trait;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client, RequestBuilder};
use secrecy::Secret;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::io::ReaderStream;
use tracing::{debug, info, instrument, warn};

const API_V2: &str = "api/v2";

type AuthenticationFuture = Shared<BoxFuture<'static, Result<AuthenticationResponse, OreError>>>;

/// The in-flight or most recently completed authentication exchange
struct PendingAuthentication {
    generation: u64,
    future: AuthenticationFuture,
}

/// Position of a domain request within the re-authentication protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Attempt {
    First,
    AfterReauthentication,
}

/// Join the API base, the versioned prefix and an endpoint with single slashes
pub fn api_url(api_base: &str, endpoint: &str) -> String {
    let mut url = String::with_capacity(api_base.len() + API_V2.len() + endpoint.len() + 2);
    url.push_str(api_base);
    if !api_base.ends_with('/') {
        url.push('/');
    }
    url.push_str(API_V2);
    if !endpoint.starts_with('/') {
        url.push('/');
    }
    url.push_str(endpoint);
    url
}

/// A session with the Ore API
///
/// Every domain operation first waits for the pending authentication, so a
/// request issued while a re-authentication is in flight goes out with the
/// new token. Each request is signed with the token it waited for, so a `401`
/// is always attributed to the authentication that issued the rejected
/// token. A `401` on a domain request triggers exactly one fresh
/// authentication and one retry of that request.
pub struct OreSession {
    api_base: String,
    api_key: Secret<String>,
    session_duration: Duration,
    http: Arc<HttpWrapper>,
    token: Arc<watch::Sender<Option<SessionToken>>>,
    signer: SessionSigner,
    pending: Mutex<Option<PendingAuthentication>>,
    generation: AtomicU64,
}

impl std::fmt::Debug for OreSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OreSession")
            .field("api_base", &self.api_base)
            .field("session_duration", &self.session_duration)
            .field("signer", &self.signer)
            .finish_non_exhaustive()
    }
}

impl OreSession {
    /// Create an unauthenticated session. Most callers want [`OreSession::connect`].
    pub fn new(
        http: Arc<HttpWrapper>,
        api_key: Secret<String>,
        api_base: impl Into<String>,
        session_duration: Duration,
    ) -> Self {
        let (token, signer) = SessionSigner::channel();
        Self {
            api_base: api_base.into(),
            api_key,
            session_duration,
            http,
            token: Arc::new(token),
            signer,
            pending: Mutex::new(None),
            generation: AtomicU64::new(0),
        }
    }

    /// Create a session and perform its first authentication
    #[instrument(skip(http, api_key, api_base), fields(endpoint = %api_base))]
    pub async fn connect(
        http: Arc<HttpWrapper>,
        api_key: Secret<String>,
        api_base: &str,
        session_duration: Duration,
    ) -> Result<Self, OreError> {
        let session = Self::new(http, api_key, api_base, session_duration);
        session
            .authenticate()
            .await
            .map_err(|e| e.context("authenticate", api_base))?;
        Ok(session)
    }

    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    /// Whether a session token is currently held
    pub fn is_authenticated(&self) -> bool {
        self.signer.current_token().is_some()
    }

    /// Whether this session can no longer serve requests
    ///
    /// True once it was terminated or its latest authentication failed.
    pub fn is_broken(&self) -> bool {
        match self.lock_pending().as_ref() {
            None => true,
            Some(pending) => matches!(pending.future.peek(), Some(Err(_))),
        }
    }

    fn url(&self, endpoint: &str) -> String {
        api_url(&self.api_base, endpoint)
    }

    fn lock_pending(&self) -> MutexGuard<'_, Option<PendingAuthentication>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start a fresh authentication and make it the pending one
    ///
    /// The returned future is shared; awaiting it from several places runs the
    /// exchange once.
    pub fn authenticate(&self) -> AuthenticationFuture {
        let mut pending = self.lock_pending();
        self.install_authentication(&mut pending)
    }

    fn install_authentication(
        &self,
        pending: &mut Option<PendingAuthentication>,
    ) -> AuthenticationFuture {
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let future = self.authentication_exchange(generation).boxed().shared();
        *pending = Some(PendingAuthentication {
            generation,
            future: future.clone(),
        });
        future
    }

    /// Re-authenticate after the token issued by `stale` was rejected, unless
    /// a newer authentication already replaced it
    fn reauthenticate(&self, stale: u64) -> AuthenticationFuture {
        let mut pending = self.lock_pending();
        if let Some(current) = pending.as_ref().filter(|p| p.generation != stale) {
            return current.future.clone();
        }
        self.install_authentication(&mut pending)
    }

    fn authentication_exchange(
        &self,
        generation: u64,
    ) -> impl std::future::Future<Output = Result<AuthenticationResponse, OreError>> + Send + 'static
    {
        let http = Arc::clone(&self.http);
        let token = Arc::clone(&self.token);
        let signer = self.signer.clone();
        let url = self.url("authenticate");
        let authorization = api_key_authorization(&self.api_key);
        let body = JsonEncoder::new(&ApiSessionProperties::new(self.session_duration));

        async move {
            let exchange = async {
                let body = body?;
                let request = move |client: &Client| {
                    Ok::<_, OreError>(
                        client
                            .post(url.as_str())
                            .header(AUTHORIZATION, authorization.as_str())
                            .header(CONTENT_TYPE, APPLICATION_JSON)
                            .body(body.rewind().into_body()),
                    )
                };

                match http
                    .send(&signer, &request, JsonDecoder::<AuthenticationResponse>::new())
                    .await?
                {
                    OreResponse::Success(auth) => Ok(auth),
                    OreResponse::ReAuthenticate => Err(OreError::AuthError(
                        "API key was rejected by the server".to_string(),
                    )),
                    OreResponse::Failure { code, message } => Err(OreError::AuthError(format!(
                        "authentication failed with status {}: {}",
                        code,
                        message.as_deref().unwrap_or("no message provided")
                    ))),
                }
            };

            let result: Result<AuthenticationResponse, OreError> = exchange.await;
            let published = result
                .as_ref()
                .ok()
                .map(|auth| SessionToken::new(generation, auth.session.as_str()));
            publish_token(&token, generation, published);

            match &result {
                Ok(auth) => info!(expires = %auth.expires, generation, "Authenticated with Ore"),
                Err(e) => warn!(error = %e, generation, "Authentication with Ore failed"),
            }
            result
        }
    }

    /// Wait for the pending authentication, then pin the token it left behind
    async fn await_authentication(
        &self,
    ) -> Result<(SessionToken, AuthenticationResponse), OreError> {
        let pending = self.lock_pending().as_ref().map(|p| p.future.clone());
        let Some(pending) = pending else {
            return Err(not_authenticated());
        };

        let auth = pending.await?;
        let token = self.signer.current_token().ok_or_else(not_authenticated)?;
        Ok((token, auth))
    }

    /// Run a domain request through the re-authentication protocol
    async fn execute<D, F>(
        &self,
        request: &dyn RequestFactory,
        decoder: F,
    ) -> Result<OreResponse<D::Output>, OreError>
    where
        D: BodyDecoder,
        F: Fn() -> D + Send + Sync,
    {
        let mut attempt = Attempt::First;
        loop {
            let (token, auth) = self.await_authentication().await?;
            debug!(
                expires = %auth.expires,
                generation = token.generation(),
                ?attempt,
                "Session expires"
            );

            let response = self.http.send(&token, request, decoder()).await?;
            match (response, attempt) {
                (OreResponse::ReAuthenticate, Attempt::First) => {
                    warn!(generation = token.generation(), "Session rejected, re-authenticating");
                    self.reauthenticate(token.generation()).await?;
                    attempt = Attempt::AfterReauthentication;
                }
                (response, _) => return Ok(response),
            }
        }
    }

    /// Upload a new version of a project
    #[instrument(skip(self, info, artifact), fields(endpoint = %self.api_base, file = %artifact.display()))]
    pub async fn publish_version(
        &self,
        project_id: &str,
        info: &DeployVersionInfo,
        artifact: &Path,
    ) -> Result<Version, OreError> {
        let operation = "publish version";
        let upload = VersionUpload::new(&self.api_base, project_id, info, artifact)
            .map_err(|e| e.context(operation, &self.api_base))?;

        self.execute(&upload, JsonDecoder::<Version>::new)
            .await
            .and_then(OreResponse::into_result)
            .map_err(|e| e.context(operation, &self.api_base))
    }

    /// Permissions granted to the API key across Ore
    #[instrument(skip(self), fields(endpoint = %self.api_base))]
    pub async fn global_permissions(&self) -> Result<KeyPermissions, OreError> {
        let url = self.url("permissions");
        let request = move |client: &Client| Ok::<_, OreError>(client.get(url.as_str()));

        self.execute(&request, JsonDecoder::<KeyPermissions>::new)
            .await
            .and_then(OreResponse::into_result)
            .map_err(|e| e.context("fetch permissions", &self.api_base))
    }

    /// Revoke the remote session
    ///
    /// Without any prior authentication this answers `404` without touching
    /// the network. Otherwise the pending authentication is cleared whatever
    /// the outcome; the session is not meant to be reused afterwards.
    #[instrument(skip(self), fields(endpoint = %self.api_base))]
    pub async fn terminate(&self) -> Result<OreResponse<()>, OreError> {
        let pending = self.lock_pending().as_ref().map(|p| p.future.clone());
        let Some(pending) = pending else {
            return Ok(OreResponse::failure(404, None));
        };

        let result = match pending.await {
            Ok(_) => {
                let url = self.url("sessions/current");
                let request =
                    move |client: &Client| Ok::<_, OreError>(client.delete(url.as_str()));
                self.http.send(&self.signer, &request, DiscardDecoder).await
            }
            Err(e) => Err(e),
        };

        self.lock_pending().take();
        self.token.send_replace(None);

        result.map_err(|e| e.context("terminate session", &self.api_base))
    }
}

fn not_authenticated() -> OreError {
    OreError::AuthError("session is not authenticated".to_string())
}

/// Publish the outcome of authentication `generation`, unless a newer one
/// has already published
fn publish_token(
    sender: &watch::Sender<Option<SessionToken>>,
    generation: u64,
    token: Option<SessionToken>,
) {
    sender.send_if_modified(|current| {
        if current
            .as_ref()
            .is_some_and(|existing| existing.generation() > generation)
        {
            return false;
        }
        *current = token;
        true
    });
}

/// Multipart version upload, reopening the artifact for every attempt
struct VersionUpload {
    url: String,
    info: JsonEncoder,
    artifact: PathBuf,
    file_name: String,
}

impl VersionUpload {
    fn new(
        api_base: &str,
        project_id: &str,
        info: &DeployVersionInfo,
        artifact: &Path,
    ) -> Result<Self, OreError> {
        if project_id.is_empty() || project_id.contains('/') {
            return Err(OreError::InvalidParameters(format!(
                "'{}' is not a valid project id",
                project_id
            )));
        }

        let file_name = artifact
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| {
                OreError::InvalidParameters(format!(
                    "{} does not name a file",
                    artifact.display()
                ))
            })?;

        Ok(Self {
            url: api_url(api_base, &format!("projects/{}/versions", project_id)),
            info: JsonEncoder::new(info)?,
            artifact: artifact.to_path_buf(),
            file_name,
        })
    }
}

#[async_trait]
impl RequestFactory for VersionUpload {
    async fn build(&self, client: &Client) -> Result<RequestBuilder, OreError> {
        let file = tokio::fs::File::open(&self.artifact).await.map_err(|e| {
            OreError::IoError(format!(
                "Failed to open {}: {}",
                self.artifact.display(),
                e
            ))
        })?;
        let length = file
            .metadata()
            .await
            .map_err(|e| {
                OreError::IoError(format!(
                    "Failed to read metadata of {}: {}",
                    self.artifact.display(),
                    e
                ))
            })?
            .len();

        let info = self.info.rewind();
        let info_length = info.len() as u64;
        let info_part = Part::stream_with_length(info.into_body(), info_length)
            .mime_str(APPLICATION_JSON)
            .map_err(|e| OreError::InvalidParameters(format!("Invalid part type: {}", e)))?;

        let file_part =
            Part::stream_with_length(Body::wrap_stream(ReaderStream::new(file)), length)
                .file_name(self.file_name.clone())
                .mime_str(APPLICATION_OCTET_STREAM)
                .map_err(|e| OreError::InvalidParameters(format!("Invalid part type: {}", e)))?;

        let form = Form::new()
            .part("plugin-info", info_part)
            .part("plugin-file", file_part);

        Ok(client.post(self.url.as_str()).multipart(form))
    }
}
