#![allow(dead_code)]

use chrono::{Duration as ChronoDuration, Utc};
use orepublish::core::kernel::{HttpWrapper, RestClientConfig};
use secrecy::Secret;
use serde_json::{json, Value};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tempfile::NamedTempFile;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockBuilder, MockServer, ResponseTemplate};

pub const API_KEY: &str = "test-api-key";
pub const SESSION_DURATION: Duration = Duration::from_secs(3 * 60 * 60);

/// Transport policy that fails fast against local servers
pub fn fast_transport() -> RestClientConfig {
    RestClientConfig::new()
        .with_read_timeout(Duration::from_secs(5))
        .with_connect_timeout(Duration::from_secs(1))
        .with_max_retries(1)
        .with_retry_backoff(Duration::from_millis(10))
        .with_user_agent("orepublish-tests".to_string())
}

pub fn http() -> Arc<HttpWrapper> {
    Arc::new(HttpWrapper::new(fast_transport()))
}

pub fn api_key() -> Secret<String> {
    Secret::new(API_KEY.to_string())
}

pub fn api_key_header() -> String {
    format!("OreApi apikey=\"{}\"", API_KEY)
}

pub fn session_header(token: &str) -> String {
    format!("OreApi session=\"{}\"", token)
}

pub fn auth_body(token: &str) -> Value {
    json!({
        "session": token,
        "expires": (Utc::now() + ChronoDuration::hours(3)).to_rfc3339(),
        "type": "key",
    })
}

/// `POST authenticate` carrying the test API key
pub fn authenticate() -> MockBuilder {
    Mock::given(method("POST"))
        .and(path("/api/v2/authenticate"))
        .and(header("Authorization", api_key_header().as_str()))
}

/// Authentication that hands out `token`
pub fn grants(token: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(auth_body(token))
}

/// Mount an authentication endpoint that always hands out `token`
pub async fn mount_authentication(server: &MockServer, token: &str) {
    authenticate().respond_with(grants(token)).mount(server).await;
}

/// Request to `endpoint` signed with `token`
pub fn signed(verb: &str, endpoint: &str, token: &str) -> MockBuilder {
    Mock::given(method(verb))
        .and(path(format!("/api/v2/{}", endpoint)))
        .and(header("Authorization", session_header(token).as_str()))
}

/// A plugin jar on disk
pub fn artifact() -> NamedTempFile {
    let mut file = tempfile::Builder::new()
        .prefix("myplugin-")
        .suffix(".jar")
        .tempfile()
        .unwrap();
    file.write_all(b"PK\x03\x04 not really a jar").unwrap();
    file.flush().unwrap();
    file
}
