//! Connection registry: one session per endpoint set.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tracing::{debug, warn};

use znode_lock_core::error::{LockError, LockResult};
use znode_lock_core::store::StoreConnector;

use crate::options::{endpoint_key, SessionOptions};
use crate::session::{Session, SessionState};

/// Deduplicates sessions by endpoint set.
///
/// Repeated requests for the same endpoints reuse one [`Session`]. A session
/// that fails after having connected is replaced with a fresh one in the
/// background; one that was closed or never connected is replaced on the
/// next request. Cloning shares the same table.
pub struct SessionRegistry<C: StoreConnector> {
    inner: Arc<RegistryInner<C>>,
}

struct RegistryInner<C: StoreConnector> {
    connector: Arc<C>,
    sessions: Mutex<HashMap<String, Session<C>>>,
}

impl<C: StoreConnector> Clone for SessionRegistry<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: StoreConnector> fmt::Debug for SessionRegistry<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("sessions", &self.len())
            .finish()
    }
}

impl<C: StoreConnector> SessionRegistry<C> {
    pub fn new(connector: C) -> Self {
        Self::with_connector(Arc::new(connector))
    }

    pub fn with_connector(connector: Arc<C>) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                connector,
                sessions: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn connector(&self) -> &Arc<C> {
        &self.inner.connector
    }

    /// Returns the session for `endpoints`, creating it if needed.
    ///
    /// `timeout` overrides the connection-gate timeout of a newly created
    /// session. Connecting is always (re)initiated; this never blocks.
    pub fn get_session<E: AsRef<str>>(&self, endpoints: &[E], timeout: Option<Duration>) -> Session<C> {
        let endpoints: Vec<String> = endpoints.iter().map(|e| e.as_ref().to_string()).collect();
        let mut options = SessionOptions::default();
        if let Some(timeout) = timeout {
            options = options.with_timeout(timeout);
        }
        self.get_session_with(endpoints, options)
    }

    /// Like [`get_session`](Self::get_session) with full session options.
    pub fn get_session_with(&self, endpoints: Vec<String>, options: SessionOptions) -> Session<C> {
        let key = endpoint_key(&endpoints);
        let (session, created) = {
            let mut sessions = self.inner.sessions.lock();
            match sessions.get(&key) {
                Some(existing) if !existing.is_spent() => (existing.clone(), false),
                _ => {
                    let session = Session::new(endpoints, options, Arc::clone(&self.inner.connector));
                    sessions.insert(key.clone(), session.clone());
                    (session, true)
                }
            }
        };

        if created {
            debug!(session.key = %key, "registered new session");
        }
        if let Err(e) = session.connect() {
            warn!(session.key = %key, error = %e, "failed to start connecting");
        }
        if created {
            self.supervise(&session);
        }
        session
    }

    /// Closes every registered session and empties the table.
    ///
    /// Sessions are closed concurrently. Every close is attempted; the first
    /// error encountered is returned.
    pub async fn shutdown_all(&self) -> LockResult<()> {
        let sessions = std::mem::take(&mut *self.inner.sessions.lock());
        debug!(sessions = sessions.len(), "shutting down all sessions");

        let closing: Vec<_> = sessions
            .into_values()
            .map(|session| tokio::spawn(async move { session.close().await }))
            .collect();

        let mut first_error = None;
        for task in closing {
            let result = task
                .await
                .unwrap_or_else(|e| Err(LockError::Session(format!("close task failed: {e}"))));
            if let Err(e) = result {
                warn!(error = %e, "failed to close session");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    pub fn len(&self) -> usize {
        self.inner.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.sessions.lock().is_empty()
    }

    /// Watches `session` and replaces it once it fails after having connected.
    fn supervise(&self, session: &Session<C>) {
        let Ok(runtime) = Handle::try_current() else {
            return;
        };
        let registry = Arc::downgrade(&self.inner);
        let weak = session.downgrade();
        let mut changes = session.state_changes();

        runtime.spawn(async move {
            let failed = changes
                .wait_for(|state| matches!(state, SessionState::Error | SessionState::Closed))
                .await
                .map(|state| *state == SessionState::Error)
                .unwrap_or(false);
            if !failed {
                return;
            }
            if let (Some(session), Some(inner)) = (weak.upgrade(), registry.upgrade())
                && session.has_connected()
            {
                SessionRegistry { inner }.resurrect(&session);
            }
        });
    }

    /// Swaps a failed session for a fresh instance, if it is still registered.
    fn resurrect(&self, failed: &Session<C>) {
        let fresh = {
            let mut sessions = self.inner.sessions.lock();
            let registered = sessions
                .get(failed.key())
                .is_some_and(|current| current.same_session(failed));
            if !registered {
                return;
            }
            let fresh = Session::new(
                failed.endpoints().to_vec(),
                failed.options().clone(),
                Arc::clone(&self.inner.connector),
            );
            sessions.insert(failed.key().to_string(), fresh.clone());
            fresh
        };

        warn!(session.key = %failed.key(), "session failed, reconnecting with a fresh session");
        if let Err(e) = fresh.connect() {
            warn!(session.key = %fresh.key(), error = %e, "failed to start reconnecting");
        }
        self.supervise(&fresh);
    }
}
