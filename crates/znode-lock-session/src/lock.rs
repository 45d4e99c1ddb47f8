//! `DistributedLock` adapter over a session.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{field::Empty, instrument, Span};

use znode_lock_core::error::{LockError, LockResult};
use znode_lock_core::store::StoreConnector;
use znode_lock_core::timeout::Deadline;
use znode_lock_core::traits::DistributedLock;

use crate::handle::ZnodeLockHandle;
use crate::options::SessionOptions;
use crate::registry::SessionRegistry;
use crate::session::Session;

/// A lock on one store path, resolved against the registry's session for its
/// endpoint set at every acquisition.
pub struct ZnodeDistributedLock<C: StoreConnector> {
    path: String,
    registry: SessionRegistry<C>,
    endpoints: Vec<String>,
    options: SessionOptions,
    payload: Arc<[u8]>,
}

impl<C: StoreConnector> ZnodeDistributedLock<C> {
    pub(crate) fn new(
        path: String,
        registry: SessionRegistry<C>,
        endpoints: Vec<String>,
        options: SessionOptions,
        payload: Arc<[u8]>,
    ) -> Self {
        Self {
            path,
            registry,
            endpoints,
            options,
            payload,
        }
    }

    fn session(&self) -> Session<C> {
        self.registry
            .get_session_with(self.endpoints.clone(), self.options.clone())
    }
}

impl<C: StoreConnector> DistributedLock for ZnodeDistributedLock<C> {
    type Handle = ZnodeLockHandle<C>;

    fn name(&self) -> &str {
        &self.path
    }

    #[instrument(skip(self), fields(lock.path = %self.path, backend = "znode", operation = "acquire", acquired = Empty, elapsed_ms = Empty))]
    async fn acquire(&self, timeout: Option<Duration>) -> LockResult<Self::Handle> {
        let start = Instant::now();
        let deadline = Deadline::after(timeout);
        let session = self.session();

        let (cancel_sender, cancel_receiver) = watch::channel(false);
        let timer = (!deadline.is_infinite()).then(|| {
            tokio::spawn(async move {
                deadline.elapsed().await;
                let _ = cancel_sender.send(true);
            })
        });

        let result = session
            .lock_cancellable(&self.path, &self.payload, cancel_receiver)
            .await;
        if let Some(timer) = timer {
            timer.abort();
        }

        let node = match result {
            Ok(node) => node,
            Err(LockError::Cancelled) => {
                Span::current().record("acquired", false);
                return Err(LockError::Timeout(deadline.budget()));
            }
            Err(e) => {
                Span::current().record("acquired", false);
                return Err(e);
            }
        };

        Span::current().record("acquired", true);
        Span::current().record("elapsed_ms", start.elapsed().as_millis() as u64);
        Ok(ZnodeLockHandle::new(session, self.path.clone(), node))
    }

    #[instrument(skip(self), fields(lock.path = %self.path, backend = "znode", operation = "try_acquire", acquired = Empty))]
    async fn try_acquire(&self) -> LockResult<Option<Self::Handle>> {
        let session = self.session();
        let acquired = session.try_lock(&self.path, &self.payload).await?;
        Span::current().record("acquired", acquired.is_some());
        Ok(acquired.map(|node| ZnodeLockHandle::new(session, self.path.clone(), node)))
    }
}
