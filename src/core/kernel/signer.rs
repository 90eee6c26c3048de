use crate::core::errors::OreError;
use reqwest::header::{HeaderValue, AUTHORIZATION};
use reqwest::Request;
use secrecy::{ExposeSecret, Secret};
use std::sync::Arc;
use tokio::sync::watch;

/// Authorization scheme understood by the Ore v2 API
pub const AUTH_SCHEME: &str = "OreApi";

/// Request decoration hook
///
/// The transport hands every outgoing request to a signer right before it is
/// sent. A request that already carries an `Authorization` header is left
/// untouched, which is how the authentication call supplies its own API key
/// credential.
pub trait Signer: Send + Sync {
    /// Value for the `Authorization` header, or `None` to send the request as-is
    fn authorization(&self) -> Option<String>;

    fn sign_request(&self, request: &mut Request) -> Result<(), OreError> {
        if request.headers().contains_key(AUTHORIZATION) {
            return Ok(());
        }

        if let Some(value) = self.authorization() {
            let mut value = HeaderValue::from_str(&value).map_err(|e| {
                OreError::AuthError(format!("Credential is not a valid header value: {}", e))
            })?;
            value.set_sensitive(true);
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        Ok(())
    }
}

/// `OreApi apikey="<key>"`, used to open a session
pub fn api_key_authorization(api_key: &Secret<String>) -> String {
    format!("{} apikey=\"{}\"", AUTH_SCHEME, api_key.expose_secret())
}

/// `OreApi session="<token>"`, used for everything else
pub fn session_authorization(token: &str) -> String {
    format!("{} session=\"{}\"", AUTH_SCHEME, token)
}

/// A session token together with the authentication that issued it
#[derive(Clone, PartialEq, Eq)]
pub struct SessionToken {
    generation: u64,
    value: Arc<str>,
}

impl SessionToken {
    pub fn new(generation: u64, value: impl Into<Arc<str>>) -> Self {
        Self {
            generation,
            value: value.into(),
        }
    }

    pub const fn generation(&self) -> u64 {
        self.generation
    }

    pub fn value(&self) -> &str {
        &self.value
    }
}

impl std::fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionToken")
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

/// Signs with exactly this token, whatever is published later
impl Signer for SessionToken {
    fn authorization(&self) -> Option<String> {
        Some(session_authorization(&self.value))
    }
}

/// Signs with whatever session token was most recently published
///
/// The token is replaced as a whole through a watch channel, so a reader
/// observes either the previous complete token, the new one, or none.
#[derive(Clone)]
pub struct SessionSigner {
    token: watch::Receiver<Option<SessionToken>>,
}

impl SessionSigner {
    pub fn new(token: watch::Receiver<Option<SessionToken>>) -> Self {
        Self { token }
    }

    /// A signer paired with the sender that publishes its tokens
    pub fn channel() -> (watch::Sender<Option<SessionToken>>, Self) {
        let (sender, receiver) = watch::channel(None);
        (sender, Self::new(receiver))
    }

    pub fn current_token(&self) -> Option<SessionToken> {
        self.token.borrow().clone()
    }
}

impl std::fmt::Debug for SessionSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionSigner")
            .field("has_token", &self.token.borrow().is_some())
            .finish()
    }
}

impl Signer for SessionSigner {
    fn authorization(&self) -> Option<String> {
        self.current_token()
            .map(|token| session_authorization(token.value()))
    }
}
