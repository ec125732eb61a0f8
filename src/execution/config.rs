//! Engine connection settings.

use serde::{Deserialize, Serialize};

use crate::error::DockerError;
use crate::execution::image::{normalize_registry_address, DEFAULT_REGISTRY};

/// Username/password pair for a registry.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryCredentials {
    pub username: String,
    pub password: String,
}

impl RegistryCredentials {
    /// # Errors
    ///
    /// Returns `DockerError::InvalidArgument` if either value is blank.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Result<Self, DockerError> {
        let username = username.into();
        let password = password.into();
        if username.trim().is_empty() {
            return Err(DockerError::blank("Registry username"));
        }
        if password.trim().is_empty() {
            return Err(DockerError::blank("Registry password"));
        }
        Ok(Self { username, password })
    }
}

impl std::fmt::Debug for RegistryCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Where the daemon lives and which registry a client authenticates against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Daemon address; local defaults when `None`.
    pub docker_host: Option<String>,
    /// Registry address in canonical form.
    pub registry: String,
    pub credentials: Option<RegistryCredentials>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            docker_host: None,
            registry: DEFAULT_REGISTRY.to_string(),
            credentials: None,
        }
    }
}

impl EngineConfig {
    /// Unauthenticated configuration for a registry.
    ///
    /// # Errors
    ///
    /// Returns `DockerError::InvalidArgument` if the registry is blank.
    pub fn for_registry(registry: &str) -> Result<Self, DockerError> {
        if registry.trim().is_empty() {
            return Err(DockerError::blank("Docker registry address"));
        }
        Ok(Self {
            registry: normalize_registry_address(registry),
            ..Default::default()
        })
    }

    /// Builds a configuration from loose settings (CLI flags, environment).
    ///
    /// Credentials are only accepted as a complete pair.
    pub fn from_parts(
        docker_host: Option<String>,
        registry: &str,
        username: Option<String>,
        password: Option<String>,
    ) -> Result<Self, DockerError> {
        let mut config = Self::for_registry(registry)?;
        config.docker_host = docker_host.filter(|h| !h.trim().is_empty());
        config.credentials = match (username, password) {
            (None, None) => None,
            (Some(user), Some(pass)) => Some(RegistryCredentials::new(user, pass)?),
            (Some(_), None) => return Err(DockerError::blank("Registry password")),
            (None, Some(_)) => return Err(DockerError::blank("Registry username")),
        };
        Ok(config)
    }

    pub fn with_docker_host(mut self, host: impl Into<String>) -> Self {
        self.docker_host = Some(host.into());
        self
    }

    pub fn with_credentials(mut self, credentials: RegistryCredentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Username the client authenticates as, if any.
    pub fn username(&self) -> Option<&str> {
        self.credentials.as_ref().map(|c| c.username.as_str())
    }
}
