//! Store handles and connector for the in-memory coordination store.

use std::time::Duration;

use tokio::sync::mpsc;
use tracing::debug;

use znode_lock_core::error::{StoreError, StoreErrorCode};
use znode_lock_core::store::{
    CoordinationStore, CreateMode, SessionEvent, SessionEvents, StoreConnector,
};

use crate::service::MemoryCoordinationService;

/// Opens sessions against a [`MemoryCoordinationService`].
#[derive(Debug, Clone)]
pub struct MemoryConnector {
    service: MemoryCoordinationService,
}

impl MemoryConnector {
    pub(crate) fn new(service: MemoryCoordinationService) -> Self {
        Self { service }
    }

    pub fn service(&self) -> &MemoryCoordinationService {
        &self.service
    }
}

impl StoreConnector for MemoryConnector {
    type Store = MemoryStore;

    fn open(
        &self,
        endpoints: &[String],
        _session_timeout: Duration,
    ) -> Result<(MemoryStore, SessionEvents), StoreError> {
        let (events, receiver) = mpsc::unbounded_channel();
        let _ = events.send(SessionEvent::Connecting);

        let session_id = self.service.register_session(endpoints, events.clone());
        match session_id {
            Some(id) => {
                let _ = events.send(SessionEvent::Connected { session_id: id });
            }
            None => debug!(?endpoints, "no reachable endpoint; session stays connecting"),
        }

        Ok((
            MemoryStore {
                service: self.service.clone(),
                session_id,
            },
            receiver,
        ))
    }
}

/// One session's view of the in-memory store.
#[derive(Debug)]
pub struct MemoryStore {
    service: MemoryCoordinationService,
    session_id: Option<i64>,
}

impl MemoryStore {
    /// The store-assigned session id, if the session was established.
    pub fn session_id(&self) -> Option<i64> {
        self.session_id
    }

    fn session(&self) -> Result<i64, StoreError> {
        self.session_id.ok_or_else(|| {
            StoreError::new(StoreErrorCode::ConnectionLoss, "session is not connected")
        })
    }
}

impl CoordinationStore for MemoryStore {
    async fn create(&self, path: &str, data: &[u8], mode: CreateMode) -> Result<String, StoreError> {
        let id = self.session()?;
        self.service.create(id, path, data, mode)
    }

    async fn delete(&self, path: &str, version: Option<i32>) -> Result<(), StoreError> {
        let id = self.session()?;
        self.service.delete(id, path, version)
    }

    async fn exists(&self, path: &str, watch: bool) -> Result<bool, StoreError> {
        let id = self.session()?;
        self.service.exists(id, path, watch)
    }

    async fn get_children(&self, path: &str, _watch: bool) -> Result<Vec<String>, StoreError> {
        let id = self.session()?;
        self.service.get_children(id, path)
    }

    async fn close(&self) -> Result<(), StoreError> {
        match self.session_id {
            Some(id) => self.service.close_session(id),
            None => Ok(()),
        }
    }
}
