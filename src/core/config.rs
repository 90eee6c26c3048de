use crate::core::kernel::RestClientConfig;
use secrecy::{ExposeSecret, Secret};
use std::env;
use std::time::Duration;

/// Ore instance used when no endpoint is configured
pub const DEFAULT_ENDPOINT: &str = "https://ore.spongepowered.org/";
pub const API_KEY_ENVIRONMENT_VARIABLE: &str = "ORE_TOKEN";
pub const ENDPOINT_ENVIRONMENT_VARIABLE: &str = "ORE_ENDPOINT";
pub const SESSION_DURATION_ENVIRONMENT_VARIABLE: &str = "ORE_SESSION_DURATION";

pub const DEFAULT_SESSION_DURATION: Duration = Duration::from_secs(3 * 60 * 60);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct OreConfig {
    pub api_key: Secret<String>,
    pub endpoint: String,
    /// Lifetime requested for each API session
    pub session_duration: Duration,
    /// Upper bound on a single caller-facing operation
    pub request_timeout: Duration,
    /// Upper bound on terminating every session at shutdown
    pub shutdown_timeout: Duration,
    pub transport: RestClientConfig,
}

impl OreConfig {
    /// Create a new configuration for the default Ore instance
    #[must_use]
    pub fn new(api_key: String) -> Self {
        Self {
            api_key: Secret::new(api_key),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            session_duration: DEFAULT_SESSION_DURATION,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            transport: RestClientConfig::default(),
        }
    }

    /// Create configuration from environment variables
    ///
    /// Expected environment variables:
    /// - `ORE_TOKEN` (required)
    /// - `ORE_ENDPOINT` (optional, defaults to the public Ore instance)
    /// - `ORE_SESSION_DURATION` (optional, seconds, defaults to three hours)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_key = lookup(API_KEY_ENVIRONMENT_VARIABLE)
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| {
                ConfigError::MissingEnvironmentVariable(API_KEY_ENVIRONMENT_VARIABLE.to_string())
            })?;

        let mut config = Self::new(api_key);

        if let Some(endpoint) = lookup(ENDPOINT_ENVIRONMENT_VARIABLE) {
            config = config.endpoint(endpoint)?;
        }

        if let Some(seconds) = lookup(SESSION_DURATION_ENVIRONMENT_VARIABLE) {
            let seconds = seconds.trim().parse::<u64>().map_err(|e| {
                ConfigError::InvalidConfiguration(format!(
                    "{} must be a number of seconds: {}",
                    SESSION_DURATION_ENVIRONMENT_VARIABLE, e
                ))
            })?;
            config = config.session_duration(Duration::from_secs(seconds));
        }

        Ok(config)
    }

    /// Create configuration from a specific .env file path
    ///
    /// A missing file is not an error; system environment variables are used instead.
    ///
    /// **Security Warning**: Never commit .env files to version control!
    #[cfg(feature = "env-file")]
    pub fn from_env_file(env_file_path: &str) -> Result<Self, ConfigError> {
        match dotenv::from_path(env_file_path) {
            Ok(()) => {}
            Err(dotenv::Error::Io(io_err)) if io_err.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(ConfigError::InvalidConfiguration(format!(
                    "Failed to load .env file '{}': {}",
                    env_file_path, e
                )));
            }
        }

        Self::from_env()
    }

    /// Check if this configuration carries an API key
    #[must_use]
    pub fn has_credentials(&self) -> bool {
        !self.api_key.expose_secret().is_empty()
    }

    /// Set the Ore instance to publish to
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Result<Self, ConfigError> {
        let endpoint = endpoint.into();
        if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
            return Err(ConfigError::InvalidConfiguration(format!(
                "Ore endpoint must be an http(s) URL, got '{}'",
                endpoint
            )));
        }
        self.endpoint = endpoint;
        Ok(self)
    }

    #[must_use]
    pub const fn session_duration(mut self, duration: Duration) -> Self {
        self.session_duration = duration;
        self
    }

    #[must_use]
    pub const fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    #[must_use]
    pub const fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    #[must_use]
    pub fn transport(mut self, transport: RestClientConfig) -> Self {
        self.transport = transport;
        self
    }

    /// Get API key (use carefully - exposes secret)
    pub fn api_key(&self) -> &str {
        self.api_key.expose_secret()
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvironmentVariable(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}
