//! Session state machine.
//!
//! A [`Session`] owns at most one store handle and tracks its liveness through
//! the store's event stream:
//!
//! ```text
//! CLOSED --connect--> CONNECTING --connected--> CONNECTED
//!                        |   ^                     |
//!                        |   +------connecting-----+
//!                        +--------lost / gate timeout--------> ERROR
//! any --close--> CLOSED
//! ```
//!
//! ERROR is terminal for the instance. The [`SessionRegistry`] replaces a
//! lost session with a fresh one.
//!
//! [`SessionRegistry`]: crate::registry::SessionRegistry

use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::{oneshot, watch};
use tracing::{debug, instrument, trace, warn};

use znode_lock_core::error::{LockError, LockResult};
use znode_lock_core::store::{CoordinationStore, SessionEvent, SessionEvents, StoreConnector};

use crate::options::{endpoint_key, SessionOptions};
use crate::table::LockTable;
use crate::watch::WatchRegistry;

/// Liveness of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Closed,
    Connecting,
    Connected,
    Error,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Closed => "CLOSED",
            Self::Connecting => "CONNECTING",
            Self::Connected => "CONNECTED",
            Self::Error => "ERROR",
        };
        f.write_str(name)
    }
}

/// One logical session to a coordination-store cluster.
///
/// Cloning is cheap and yields another handle to the same session. Sessions
/// are normally obtained from a [`SessionRegistry`](crate::SessionRegistry),
/// which deduplicates them by endpoint set.
pub struct Session<C: StoreConnector> {
    inner: Arc<SessionInner<C>>,
}

impl<C: StoreConnector> Clone for Session<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: StoreConnector> fmt::Debug for Session<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("key", &self.inner.key)
            .field("state", &self.state())
            .finish()
    }
}

/// A non-owning session handle.
pub(crate) struct WeakSession<C: StoreConnector> {
    inner: Weak<SessionInner<C>>,
}

impl<C: StoreConnector> WeakSession<C> {
    pub(crate) fn upgrade(&self) -> Option<Session<C>> {
        self.inner.upgrade().map(|inner| Session { inner })
    }
}

struct SessionInner<C: StoreConnector> {
    key: String,
    endpoints: Vec<String>,
    options: SessionOptions,
    connector: Arc<C>,
    core: Mutex<SessionCore<C::Store>>,
    state_tx: watch::Sender<SessionState>,
    lost_tx: watch::Sender<bool>,
    watches: WatchRegistry,
    locks: LockTable,
}

struct SessionCore<S> {
    state: SessionState,
    store: Option<Arc<S>>,
    session_id: Option<i64>,
    /// Bumped per opened store handle; events from older handles are ignored.
    generation: u64,
    opened: bool,
    connected_once: bool,
    closing: bool,
    failure: Option<String>,
    waiters: Vec<oneshot::Sender<LockResult<()>>>,
}

impl<C: StoreConnector> Session<C> {
    /// Creates a session in the CLOSED state. Nothing is sent to the store
    /// until [`connect`](Self::connect) or the first lock operation.
    pub fn new(endpoints: Vec<String>, options: SessionOptions, connector: Arc<C>) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Closed);
        let (lost_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(SessionInner {
                key: endpoint_key(&endpoints),
                endpoints,
                options,
                connector,
                core: Mutex::new(SessionCore {
                    state: SessionState::Closed,
                    store: None,
                    session_id: None,
                    generation: 0,
                    opened: false,
                    connected_once: false,
                    closing: false,
                    failure: None,
                    waiters: Vec::new(),
                }),
                state_tx,
                lost_tx,
                watches: WatchRegistry::new(),
                locks: LockTable::new(),
            }),
        }
    }

    /// The endpoint-set key this session is registered under.
    pub fn key(&self) -> &str {
        &self.inner.key
    }

    pub fn endpoints(&self) -> &[String] {
        &self.inner.endpoints
    }

    pub fn options(&self) -> &SessionOptions {
        &self.inner.options
    }

    pub fn state(&self) -> SessionState {
        self.inner.core.lock().state
    }

    /// Store-assigned session id while connected.
    pub fn session_id(&self) -> Option<i64> {
        self.inner.core.lock().session_id
    }

    /// Subscribes to state transitions. Every transition is announced, and
    /// ERROR is re-announced whenever a caller runs into it.
    pub fn state_changes(&self) -> watch::Receiver<SessionState> {
        self.inner.state_tx.subscribe()
    }

    /// A receiver that flips to `true` once the session has failed or closed,
    /// taking every lock node it owned with it.
    pub fn lost_token(&self) -> watch::Receiver<bool> {
        self.inner.lost_tx.subscribe()
    }

    /// Locks held by this session as `(lock path, node path)` pairs.
    pub fn held_locks(&self) -> Vec<(String, String)> {
        self.inner.locks.held()
    }

    pub(crate) fn downgrade(&self) -> WeakSession<C> {
        WeakSession {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Whether two handles refer to the same session instance.
    pub fn same_session(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// True once the session can no longer be used: it failed, or it was
    /// closed after (or instead of) connecting.
    pub fn is_spent(&self) -> bool {
        let core = self.inner.core.lock();
        match core.state {
            SessionState::Error => true,
            SessionState::Closed => core.opened || core.closing,
            _ => false,
        }
    }

    pub(crate) fn has_connected(&self) -> bool {
        self.inner.core.lock().connected_once
    }

    pub(crate) fn watches(&self) -> &WatchRegistry {
        &self.inner.watches
    }

    pub(crate) fn locks(&self) -> &LockTable {
        &self.inner.locks
    }

    /// The open store handle.
    pub(crate) fn store(&self) -> LockResult<Arc<C::Store>> {
        self.inner
            .core
            .lock()
            .store
            .clone()
            .ok_or_else(|| {
                LockError::Session(format!(
                    "session '{}' has no open store handle",
                    self.inner.key
                ))
            })
    }

    /// Starts connecting. Returns immediately; progress arrives through the
    /// store's event stream.
    ///
    /// A no-op while CONNECTING or CONNECTED. A session that has failed, or
    /// was closed, cannot be connected again: obtain a new one from the
    /// registry instead.
    pub fn connect(&self) -> LockResult<()> {
        let mut core = self.inner.core.lock();
        match core.state {
            SessionState::Connecting | SessionState::Connected => return Ok(()),
            SessionState::Error => {
                self.inner.state_tx.send_replace(SessionState::Error);
                return Err(LockError::Session(format!(
                    "session '{}' has failed and cannot be reconnected",
                    self.inner.key
                )));
            }
            SessionState::Closed => {}
        }
        if core.opened || core.closing {
            return Err(LockError::Session(format!(
                "session '{}' was closed and cannot be reused",
                self.inner.key
            )));
        }

        let runtime = Handle::try_current()
            .map_err(|_| LockError::Session("connecting requires a Tokio runtime".to_string()))?;
        let (store, events) = match self
            .inner
            .connector
            .open(&self.inner.endpoints, self.inner.options.session_timeout)
        {
            Ok(opened) => opened,
            Err(e) => {
                self.inner.fail(&mut core, format!("failed to open session: {e}"));
                return Err(e.into());
            }
        };

        core.opened = true;
        core.generation += 1;
        core.store = Some(Arc::new(store));
        let generation = core.generation;
        self.inner.set_state(&mut core, SessionState::Connecting);
        drop(core);

        runtime.spawn(pump_events(Arc::downgrade(&self.inner), generation, events));
        Ok(())
    }

    /// Waits until the session is CONNECTED.
    ///
    /// Resolves immediately when already connected, fails immediately when
    /// the session is in ERROR, and otherwise fails with
    /// [`LockError::Timeout`] if the session does not connect within the
    /// configured timeout, which also moves it to ERROR.
    pub async fn on_connection(&self) -> LockResult<()> {
        if self.state() == SessionState::Closed {
            self.connect()?;
        }

        let receiver = {
            let mut core = self.inner.core.lock();
            let state = core.state;
            match state {
                SessionState::Connected => return Ok(()),
                SessionState::Error => {
                    self.inner.state_tx.send_replace(SessionState::Error);
                    return Err(LockError::Session(
                        core.failure
                            .clone()
                            .unwrap_or_else(|| "session failed".to_string()),
                    ));
                }
                SessionState::Closed => {
                    return Err(LockError::Session(format!(
                        "session '{}' is closed",
                        self.inner.key
                    )));
                }
                SessionState::Connecting => {
                    let (notify, receiver) = oneshot::channel();
                    core.waiters.push(notify);
                    receiver
                }
            }
        };

        let timeout = self.inner.options.timeout;
        match tokio::time::timeout(timeout, receiver).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(LockError::Session(
                "connection waiter was dropped".to_string(),
            )),
            Err(_) => self.inner.gate_timed_out(timeout),
        }
    }

    /// Closes the session, releasing the store handle. Every lock node the
    /// session owned disappears with it. Closing an already closed session is
    /// a no-op.
    #[instrument(skip(self), fields(session.key = %self.inner.key))]
    pub async fn close(&self) -> LockResult<()> {
        let store = {
            let mut core = self.inner.core.lock();
            core.closing = true;
            if core.state == SessionState::Closed {
                return Ok(());
            }
            let store = core.store.take();
            core.session_id = None;
            self.inner
                .abort_waiters(&mut core, &LockError::Session("session was closed".to_string()));
            self.inner.set_state(&mut core, SessionState::Closed);
            store
        };

        if let Some(store) = store {
            store.close().await?;
        }
        debug!("session closed");
        Ok(())
    }
}

impl<C: StoreConnector> SessionInner<C> {
    fn set_state(&self, core: &mut SessionCore<C::Store>, state: SessionState) {
        let previous = core.state;
        core.state = state;
        self.state_tx.send_replace(state);
        debug!(session.key = %self.key, %previous, %state, "session state changed");
    }

    /// Fails connection waiters and watch waiters, and forgets held locks.
    fn abort_waiters(&self, core: &mut SessionCore<C::Store>, error: &LockError) {
        for waiter in core.waiters.drain(..) {
            let _ = waiter.send(Err(error.clone()));
        }
        self.watches.fail_all(error);
        self.locks.clear();
        self.lost_tx.send_replace(true);
    }

    /// Moves to ERROR and releases the store handle.
    fn fail(&self, core: &mut SessionCore<C::Store>, reason: String) {
        let store = core.store.take();
        core.session_id = None;
        core.failure = Some(reason.clone());
        self.abort_waiters(core, &LockError::Session(reason));
        self.set_state(core, SessionState::Error);

        if let (Some(store), Ok(runtime)) = (store, Handle::try_current()) {
            runtime.spawn(async move {
                if let Err(e) = store.close().await {
                    trace!(error = %e, "closing failed store handle");
                }
            });
        }
    }

    fn gate_timed_out(&self, timeout: Duration) -> LockResult<()> {
        let mut core = self.core.lock();
        let state = core.state;
        match state {
            SessionState::Connected => Ok(()),
            SessionState::Connecting => {
                warn!(session.key = %self.key, ?timeout, "session did not connect in time");
                self.fail(&mut core, format!("session did not connect within {timeout:?}"));
                Err(LockError::Timeout(timeout))
            }
            _ => Err(LockError::Timeout(timeout)),
        }
    }

    fn handle_event(&self, generation: u64, event: SessionEvent) {
        let mut core = self.core.lock();
        if core.generation != generation {
            return;
        }
        let state = core.state;
        match event {
            SessionEvent::Connecting => match state {
                SessionState::Connecting => {
                    self.state_tx.send_replace(SessionState::Connecting);
                }
                SessionState::Connected => {
                    debug!(session.key = %self.key, "store is reconnecting");
                    self.set_state(&mut core, SessionState::Connecting);
                }
                _ => {}
            },
            SessionEvent::Connected { session_id } => {
                if state == SessionState::Connecting {
                    core.session_id = Some(session_id);
                    core.connected_once = true;
                    self.set_state(&mut core, SessionState::Connected);
                    for waiter in core.waiters.drain(..) {
                        let _ = waiter.send(Ok(()));
                    }
                }
            }
            SessionEvent::Closed => {
                if core.closing || matches!(state, SessionState::Closed | SessionState::Error) {
                    trace!(session.key = %self.key, "store session closed");
                } else {
                    warn!(session.key = %self.key, %state, "store session lost");
                    self.fail(&mut core, "session was lost".to_string());
                }
            }
            SessionEvent::NodeDeleted(path) => {
                drop(core);
                self.watches.fire(&path);
            }
        }
    }
}

async fn pump_events<C: StoreConnector>(
    session: Weak<SessionInner<C>>,
    generation: u64,
    mut events: SessionEvents,
) {
    while let Some(event) = events.recv().await {
        let Some(inner) = session.upgrade() else {
            return;
        };
        inner.handle_event(generation, event);
    }
    trace!(generation, "session event stream ended");
}

#[cfg(test)]
mod tests {
    use super::*;
    use znode_lock_core::error::ErrorKind;
    use znode_lock_memory::{MemoryConnector, MemoryCoordinationService};

    fn session(
        service: &MemoryCoordinationService,
        endpoint: &str,
        timeout: Duration,
    ) -> Session<MemoryConnector> {
        Session::new(
            vec![endpoint.to_string()],
            SessionOptions::default().with_timeout(timeout),
            Arc::new(service.connector()),
        )
    }

    #[tokio::test]
    async fn test_connects_on_first_gate() {
        let service = MemoryCoordinationService::new();
        let session = session(&service, "mem:1", Duration::from_secs(1));
        assert_eq!(session.state(), SessionState::Closed);

        session.on_connection().await.unwrap();
        assert_eq!(session.state(), SessionState::Connected);
        assert!(session.session_id().is_some());

        session.connect().unwrap();
        session.on_connection().await.unwrap();
        assert_eq!(service.session_count(), 1);
    }

    #[tokio::test]
    async fn test_gate_times_out_and_session_becomes_terminal() {
        let service = MemoryCoordinationService::new();
        service.set_reachable("mem:down", false);
        let session = session(&service, "mem:down", Duration::from_millis(50));

        let err = session.on_connection().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert_eq!(session.state(), SessionState::Error);

        let err = session.on_connection().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Session);
        assert!(session.connect().is_err());
    }

    #[tokio::test]
    async fn test_unexpected_loss_moves_to_error() {
        let service = MemoryCoordinationService::new();
        let session = session(&service, "mem:1", Duration::from_secs(1));
        session.on_connection().await.unwrap();
        let mut lost = session.lost_token();

        let id = session.session_id().unwrap();
        assert!(service.expire_session(id));
        lost.wait_for(|lost| *lost).await.unwrap();

        assert_eq!(session.state(), SessionState::Error);
        assert!(session.is_spent());
    }

    #[tokio::test]
    async fn test_explicit_close_does_not_resurrect() {
        let service = MemoryCoordinationService::new();
        let session = session(&service, "mem:1", Duration::from_secs(1));
        session.on_connection().await.unwrap();

        session.close().await.unwrap();
        tokio::task::yield_now().await;
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(service.session_count(), 0);

        session.close().await.unwrap();
        let err = session.on_connection().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Session);
    }

    #[tokio::test]
    async fn test_close_before_connect_blocks_later_connect() {
        let service = MemoryCoordinationService::new();
        let session = session(&service, "mem:1", Duration::from_secs(1));
        session.close().await.unwrap();
        assert!(session.connect().is_err());
        assert_eq!(service.session_count(), 0);
    }
}
