//! Explicitly owned pool of engine clients.
//!
//! One runner per `(registry, username)` pair. A pooled runner owns its
//! client and the lifecycle lock, so every holder of the entry serializes
//! against the others. The pool is created and dropped by its owner; nothing
//! is cached process-wide.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::info;

use crate::error::DockerError;
use crate::execution::config::EngineConfig;
use crate::execution::docker_client::DockerClient;
use crate::execution::image::normalize_registry_address;
use crate::execution::runner::ContainerRunner;

/// Identity of a pooled client.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientKey {
    pub registry: String,
    /// Empty for anonymous clients.
    pub username: String,
}

impl ClientKey {
    pub fn new(registry: &str, username: Option<&str>) -> Self {
        Self {
            registry: normalize_registry_address(registry),
            username: username.unwrap_or_default().trim().to_string(),
        }
    }
}

/// Pool of clients keyed by registry and username.
pub struct ClientPool<C = ContainerRunner<DockerClient>> {
    clients: Mutex<HashMap<ClientKey, Arc<C>>>,
}

impl<C> Default for ClientPool<C> {
    fn default() -> Self {
        Self {
            clients: Mutex::new(HashMap::new()),
        }
    }
}

impl<C> ClientPool<C> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the pooled client for the key, opening it with `open` first
    /// if the pool has none.
    pub fn get_or_open_with<F>(
        &self,
        registry: &str,
        username: Option<&str>,
        open: F,
    ) -> Result<Arc<C>, DockerError>
    where
        F: FnOnce(&ClientKey) -> Result<C, DockerError>,
    {
        if registry.trim().is_empty() {
            return Err(DockerError::blank("Docker registry address"));
        }
        let key = ClientKey::new(registry, username);
        let mut clients = self.clients.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(client) = clients.get(&key) {
            return Ok(Arc::clone(client));
        }
        let client = Arc::new(open(&key)?);
        clients.insert(key, Arc::clone(&client));
        Ok(client)
    }

    /// Drops the pooled client for the key. Holders of the `Arc` keep theirs.
    pub fn close(&self, registry: &str, username: Option<&str>) -> bool {
        let key = ClientKey::new(registry, username);
        self.clients
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&key)
            .is_some()
    }

    pub fn close_all(&self) {
        self.clients
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn len(&self) -> usize {
        self.clients
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ClientPool<ContainerRunner<DockerClient>> {
    /// Returns the runner over the Docker client for the configuration's
    /// registry and user.
    pub fn get_or_open(&self, config: &EngineConfig) -> Result<Arc<ContainerRunner>, DockerError> {
        self.get_or_open_with(&config.registry, config.username(), |key| {
            let client = DockerClient::connect(config.docker_host.as_deref(), &key.registry)?;
            let client = match &config.credentials {
                Some(credentials) => {
                    info!(registry = %key.registry, username = %key.username, "Opened authenticated Docker client");
                    client.with_credentials(credentials)
                }
                None => {
                    info!(registry = %key.registry, "Opened Docker client");
                    client
                }
            };
            Ok(ContainerRunner::new(client))
        })
    }
}
