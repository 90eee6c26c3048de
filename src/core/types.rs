use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

/// Tag under which a release channel is sent to Ore
pub const CHANNEL_TAG: &str = "Channel";

/// Body of an authentication request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiSessionProperties {
    #[serde(rename = "_fake", default, skip_serializing_if = "std::ops::Not::not")]
    pub fake: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,
}

impl ApiSessionProperties {
    pub fn new(session_duration: Duration) -> Self {
        Self {
            fake: false,
            expires_in: Some(session_duration.as_secs()),
        }
    }
}

/// Session granted by a successful authentication
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticationResponse {
    pub session: String,
    pub expires: DateTime<Utc>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub session_type: Option<String>,
}

/// Metadata part of a version upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployVersionInfo {
    pub description: String,
    pub create_forum_post: bool,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, Vec<String>>,
}

impl DeployVersionInfo {
    pub fn new(
        description: impl Into<String>,
        create_forum_post: bool,
        channel: Option<&str>,
    ) -> Self {
        let mut tags = BTreeMap::new();
        if let Some(channel) = channel {
            tags.insert(CHANNEL_TAG.to_string(), vec![channel.to_string()]);
        }

        Self {
            description: description.into(),
            create_forum_post,
            tags,
        }
    }

    /// Release channels this version is tagged with
    pub fn channels(&self) -> &[String] {
        self.tags.get(CHANNEL_TAG).map_or(&[], Vec::as_slice)
    }
}

/// A version created on Ore
///
/// Only the identifying name is interpreted; everything else the server
/// returns is kept as-is in `metadata`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Version {
    #[serde(alias = "id")]
    pub name: String,
    #[serde(flatten)]
    pub metadata: BTreeMap<String, Value>,
}

/// Permissions granted to the API key in use
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyPermissions {
    #[serde(rename = "type")]
    pub scope: String,
    #[serde(default)]
    pub permissions: Vec<String>,
}

/// Error body returned alongside a non-success status
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ErrorResponse {
    #[serde(default)]
    pub error: Option<Value>,
    #[serde(default)]
    pub user_error: Option<String>,
    #[serde(default)]
    pub request_id: Option<Value>,
}

impl ErrorResponse {
    /// Collapse the possible error shapes into a single message
    pub fn message(&self) -> Option<String> {
        if let Some(user_error) = &self.user_error {
            return Some(user_error.clone());
        }

        match self.error.as_ref()? {
            Value::String(message) => Some(message.clone()),
            Value::Object(fields) => fields
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string),
            _ => None,
        }
    }
}
