//! Coordination-store lock provider.

use std::sync::Arc;
use std::time::Duration;

use znode_lock_core::error::{LockError, LockResult};
use znode_lock_core::store::StoreConnector;
use znode_lock_core::traits::LockProvider;

use crate::lock::ZnodeDistributedLock;
use crate::options::SessionOptions;
use crate::registry::SessionRegistry;
use crate::session::Session;

/// Builder for coordination-store lock provider configuration.
pub struct ZnodeLockProviderBuilder {
    endpoints: Vec<String>,
    options: SessionOptions,
    payload: Vec<u8>,
}

impl ZnodeLockProviderBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self {
            endpoints: vec![],
            options: SessionOptions::default(),
            payload: vec![],
        }
    }

    /// Adds a store endpoint, e.g. `zk1:2181`.
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoints.push(endpoint.into());
        self
    }

    /// Adds multiple store endpoints.
    pub fn endpoints(mut self, endpoints: &[impl AsRef<str>]) -> Self {
        for endpoint in endpoints {
            self.endpoints.push(endpoint.as_ref().to_string());
        }
        self
    }

    /// Sets how long lock operations wait for the session to connect.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.options = self.options.with_timeout(timeout);
        self
    }

    /// Sets the session timeout requested from the store.
    pub fn session_timeout(mut self, session_timeout: Duration) -> Self {
        self.options = self.options.with_session_timeout(session_timeout);
        self
    }

    /// Sets the data stored in every lock node, e.g. a host identifier.
    pub fn payload(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.payload = payload.into();
        self
    }

    /// Builds a provider with its own session registry.
    pub fn build<C: StoreConnector>(self, connector: C) -> LockResult<ZnodeLockProvider<C>> {
        self.build_with(SessionRegistry::new(connector))
    }

    /// Builds a provider that shares `registry` with other users.
    pub fn build_with<C: StoreConnector>(
        self,
        registry: SessionRegistry<C>,
    ) -> LockResult<ZnodeLockProvider<C>> {
        if self.endpoints.is_empty() {
            return Err(LockError::Session(
                "no coordination-store endpoints provided".to_string(),
            ));
        }
        Ok(ZnodeLockProvider {
            registry,
            endpoints: self.endpoints,
            options: self.options,
            payload: self.payload.into(),
        })
    }
}

impl Default for ZnodeLockProviderBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Provider for locks backed by sequential ephemeral nodes.
///
/// All locks created by one provider share the registry's session for the
/// configured endpoint set.
pub struct ZnodeLockProvider<C: StoreConnector> {
    registry: SessionRegistry<C>,
    endpoints: Vec<String>,
    options: SessionOptions,
    payload: Arc<[u8]>,
}

impl<C: StoreConnector> ZnodeLockProvider<C> {
    /// The session currently registered for this provider's endpoints.
    pub fn session(&self) -> Session<C> {
        self.registry
            .get_session_with(self.endpoints.clone(), self.options.clone())
    }

    pub fn registry(&self) -> &SessionRegistry<C> {
        &self.registry
    }

    pub fn endpoints(&self) -> &[String] {
        &self.endpoints
    }

    /// Closes every session of the registry, releasing all held locks.
    pub async fn shutdown(&self) -> LockResult<()> {
        self.registry.shutdown_all().await
    }
}

impl<C: StoreConnector> LockProvider for ZnodeLockProvider<C> {
    type Lock = ZnodeDistributedLock<C>;

    fn create_lock(&self, name: &str) -> Self::Lock {
        ZnodeDistributedLock::new(
            name.to_string(),
            self.registry.clone(),
            self.endpoints.clone(),
            self.options.clone(),
            Arc::clone(&self.payload),
        )
    }
}
