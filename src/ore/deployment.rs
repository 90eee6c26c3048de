use crate::core::config::{ConfigError, OreConfig};
use crate::core::errors::OreError;
use crate::core::types::{DeployVersionInfo, KeyPermissions, Version};
use crate::ore::registry::SessionRegistry;
use secrecy::Secret;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;
use tracing::{info, instrument};

const WORKER_THREAD_NAME: &str = "ore-session-worker";

/// A version to upload with [`OreDeployment::publish`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishRequest {
    pub project_id: String,
    /// Changelog shown on the version page
    pub version_body: String,
    pub create_forum_post: bool,
    pub channel: Option<String>,
    pub artifact: PathBuf,
}

impl PublishRequest {
    pub fn new(project_id: impl Into<String>, artifact: impl Into<PathBuf>) -> Self {
        Self {
            project_id: project_id.into(),
            version_body: String::new(),
            create_forum_post: true,
            channel: None,
            artifact: artifact.into(),
        }
    }

    #[must_use]
    pub fn version_body(mut self, body: impl Into<String>) -> Self {
        self.version_body = body.into();
        self
    }

    #[must_use]
    pub const fn create_forum_post(mut self, create: bool) -> Self {
        self.create_forum_post = create;
        self
    }

    #[must_use]
    pub fn channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = Some(channel.into());
        self
    }

    fn version_info(&self) -> DeployVersionInfo {
        DeployVersionInfo::new(
            self.version_body.as_str(),
            self.create_forum_post,
            self.channel.as_deref(),
        )
    }
}

/// Blocking handle for publishing to one Ore instance
///
/// Owns the worker pool that drives every session, so its methods must be
/// called from outside any async runtime. Each call waits at most the
/// configured request timeout.
///
/// ```rust,no_run
/// use orepublish::{OreConfig, OreDeployment, PublishRequest};
///
/// # fn main() -> Result<(), orepublish::OreError> {
/// let deployment = OreDeployment::new(OreConfig::from_env()?)?;
/// let version = deployment.publish(
///     &PublishRequest::new("myplugin", "build/libs/myplugin-1.0.jar")
///         .channel("Release")
///         .version_body("Initial release"),
/// )?;
/// println!("published {}", version.name);
/// deployment.shutdown();
/// # Ok(())
/// # }
/// ```
pub struct OreDeployment {
    runtime: Runtime,
    registry: Arc<SessionRegistry>,
    api_key: Secret<String>,
    endpoint: String,
    request_timeout: Duration,
    shutdown_timeout: Duration,
}

impl std::fmt::Debug for OreDeployment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OreDeployment")
            .field("endpoint", &self.endpoint)
            .field("registry", &self.registry)
            .field("request_timeout", &self.request_timeout)
            .finish_non_exhaustive()
    }
}

impl OreDeployment {
    pub fn new(config: OreConfig) -> Result<Self, OreError> {
        if !config.has_credentials() {
            return Err(ConfigError::InvalidConfiguration(
                "an Ore API key is required".to_string(),
            )
            .into());
        }

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .thread_name(WORKER_THREAD_NAME)
            .build()
            .map_err(|e| OreError::IoError(format!("Failed to start worker pool: {}", e)))?;

        Ok(Self {
            runtime,
            registry: Arc::new(SessionRegistry::new(
                config.transport,
                config.session_duration,
            )),
            api_key: config.api_key,
            endpoint: config.endpoint,
            request_timeout: config.request_timeout,
            shutdown_timeout: config.shutdown_timeout,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    fn wait<T, F>(&self, operation: &str, future: F) -> Result<T, OreError>
    where
        F: Future<Output = Result<T, OreError>>,
    {
        let after = self.request_timeout;
        self.runtime.block_on(async {
            tokio::time::timeout(after, future).await.unwrap_or_else(|_| {
                Err(OreError::Timeout {
                    operation: operation.to_string(),
                    after,
                }
                .context(operation, self.endpoint.as_str()))
            })
        })
    }

    /// Upload a version and return what Ore created
    #[instrument(skip(self), fields(endpoint = %self.endpoint))]
    pub fn publish(&self, request: &PublishRequest) -> Result<Version, OreError> {
        let info = request.version_info();
        let version = self.wait("publish version", async {
            let session = self.registry.session(&self.api_key, &self.endpoint).await?;
            session
                .publish_version(&request.project_id, &info, &request.artifact)
                .await
        })?;

        info!(project = %request.project_id, version = %version.name, "Published version");
        Ok(version)
    }

    #[instrument(skip(self), fields(endpoint = %self.endpoint))]
    pub fn permissions(&self) -> Result<KeyPermissions, OreError> {
        self.wait("fetch permissions", async {
            let session = self.registry.session(&self.api_key, &self.endpoint).await?;
            session.global_permissions().await
        })
    }

    /// Terminate every session and stop the worker pool
    pub fn shutdown(self) {
        let timeout = self.shutdown_timeout;
        self.runtime.block_on(self.registry.shutdown(timeout));
        self.runtime.shutdown_timeout(timeout);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_request_defaults() {
        let request = PublishRequest::new("myplugin", "plugin.jar");
        assert!(request.create_forum_post);
        assert!(request.version_body.is_empty());

        let info = request.version_info();
        assert!(info.channels().is_empty());
        assert!(info.create_forum_post);
    }

    #[test]
    fn test_publish_request_builder() {
        let request = PublishRequest::new("myplugin", "plugin.jar")
            .channel("Beta")
            .version_body("Fixes")
            .create_forum_post(false);

        let info = request.version_info();
        assert_eq!(info.channels(), ["Beta".to_string()]);
        assert_eq!(info.description, "Fixes");
        assert!(!info.create_forum_post);
    }

    #[test]
    fn test_empty_api_key_is_rejected() {
        let result = OreDeployment::new(OreConfig::new(String::new()));
        assert!(matches!(result, Err(OreError::ConfigError(_))));
    }
}
