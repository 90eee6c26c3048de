use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum OreError {
    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Authentication error: {0}")]
    AuthError(String),

    #[error("API error: {code} - {}", .message.as_deref().unwrap_or("no message provided"))]
    ApiError { code: u16, message: Option<String> },

    #[error("Session expired: the server rejected a freshly issued session")]
    SessionExpired,

    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("I/O error: {0}")]
    IoError(String),

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Ore API request {operation} timed out after {}s", .after.as_secs())]
    Timeout { operation: String, after: Duration },

    #[error("Configuration error: {0}")]
    ConfigError(#[from] crate::core::config::ConfigError),

    #[error("{operation} against {endpoint} failed: {source}")]
    Request {
        operation: String,
        endpoint: String,
        #[source]
        source: Box<OreError>,
    },
}

impl OreError {
    /// Attach the operation name and target endpoint, once.
    pub fn context(self, operation: impl Into<String>, endpoint: impl Into<String>) -> Self {
        match self {
            already @ Self::Request { .. } => already,
            other => Self::Request {
                operation: operation.into(),
                endpoint: endpoint.into(),
                source: Box::new(other),
            },
        }
    }

    /// The underlying error with any context wrapper removed
    pub fn root(&self) -> &Self {
        match self {
            Self::Request { source, .. } => source.root(),
            other => other,
        }
    }

    /// HTTP status carried by an application failure or an expired session
    pub fn status_code(&self) -> Option<u16> {
        match self.root() {
            Self::ApiError { code, .. } => Some(*code),
            Self::SessionExpired => Some(401),
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self.root(), Self::Timeout { .. })
    }
}
