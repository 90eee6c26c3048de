/// Transport kernel for the Ore API
///
/// This module holds everything that moves bytes to and from the Ore API
/// without knowing what a session or a version is.
///
/// # Architecture
///
/// ## Transport Layer
/// - `HttpWrapper`: owns the reqwest client and its fixed policy (read
///   timeout, transport-level retries, user agent)
/// - `RequestFactory`: builds a fresh request for every transport attempt
///
/// ## Authentication
/// - `Signer`: decoration hook applied to every outgoing request
/// - `SessionSigner`: injects the most recently published session token
/// - `SessionToken`: one issued token, usable as a signer pinned to it
///
/// ## Message Handling
/// - `BodyEncoder` / `BodyDecoder`: incremental body codecs, with JSON
///   implementations
/// - `ResponseClassifier`: turns a status line and body into an `OreResponse`
///
/// # Example
///
/// ```rust,no_run
/// use orepublish::core::kernel::*;
/// use orepublish::core::types::KeyPermissions;
/// use reqwest::Client;
///
/// # async fn example() -> Result<(), orepublish::OreError> {
/// let http = HttpWrapper::new(RestClientConfig::default());
/// let (tokens, signer) = SessionSigner::channel();
/// tokens.send_replace(Some(SessionToken::new(1, "session-token")));
///
/// let request = |client: &Client| {
///     Ok::<_, orepublish::OreError>(
///         client.get("https://ore.spongepowered.org/api/v2/permissions"),
///     )
/// };
/// let response = http
///     .send(&signer, &request, JsonDecoder::<KeyPermissions>::new())
///     .await?;
///
/// match response {
///     OreResponse::Success(permissions) => println!("{:?}", permissions.permissions),
///     OreResponse::ReAuthenticate => println!("session expired"),
///     OreResponse::Failure { code, message } => println!("[{}] {:?}", code, message),
/// }
/// # Ok(())
/// # }
/// ```
pub mod codec;
pub mod response;
pub mod rest;
pub mod signer;

// Re-export key types for convenience
pub use codec::{
    is_json, BodyDecoder, BodyEncoder, DiscardDecoder, JsonDecoder, JsonEncoder,
    APPLICATION_JSON, APPLICATION_OCTET_STREAM,
};
pub use response::{classify, OreResponse, ResponseClassifier};
pub use rest::{default_user_agent, HttpWrapper, RequestFactory, RestClientConfig};
pub use signer::{
    api_key_authorization, session_authorization, SessionSigner, SessionToken, Signer, AUTH_SCHEME,
};
