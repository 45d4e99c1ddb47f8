//! Interface to the hierarchical coordination store.
//!
//! The lock recipe only needs a handful of primitives: node creation with
//! ephemeral/sequential flags, deletion, existence checks and child listings
//! with optional one-shot watches, plus a stream of session events. Anything
//! that can provide these (a ZooKeeper client, the in-memory store used by the
//! tests) can back a lock session.

use std::future::Future;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::error::StoreError;

/// Path separator used by the store.
pub const PATH_SEPARATOR: char = '/';

/// Determines how a node is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateMode {
    /// Survives the creating session.
    Persistent,
    /// Removed when the creating session ends.
    Ephemeral,
    /// Persistent, with a store-assigned sequence suffix.
    PersistentSequential,
    /// Ephemeral, with a store-assigned sequence suffix.
    EphemeralSequential,
}

impl CreateMode {
    pub fn is_ephemeral(self) -> bool {
        matches!(self, Self::Ephemeral | Self::EphemeralSequential)
    }

    pub fn is_sequential(self) -> bool {
        matches!(self, Self::PersistentSequential | Self::EphemeralSequential)
    }
}

/// Events emitted by a store session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The client is (re)establishing its session.
    Connecting,
    /// The session is established.
    Connected { session_id: i64 },
    /// The session is gone; ephemeral nodes it owned have been removed.
    Closed,
    /// A node with an armed existence watch was deleted.
    NodeDeleted(String),
}

/// Receiving side of a store session's event stream.
pub type SessionEvents = mpsc::UnboundedReceiver<SessionEvent>;

/// Operations the lock recipe performs against an open store session.
///
/// Paths are absolute (`/a/b`). Watches are one-shot: an armed existence
/// watch produces exactly one [`SessionEvent::NodeDeleted`] when the node is
/// deleted.
pub trait CoordinationStore: Send + Sync + 'static {
    /// Creates a node and returns its actual path, including any sequence suffix.
    fn create(
        &self,
        path: &str,
        data: &[u8],
        mode: CreateMode,
    ) -> impl Future<Output = Result<String, StoreError>> + Send;

    /// Deletes a node. `version` of `None` matches any version.
    fn delete(
        &self,
        path: &str,
        version: Option<i32>,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Checks whether a node exists, optionally arming an existence watch.
    fn exists(&self, path: &str, watch: bool)
    -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// Lists the names (not paths) of a node's children.
    fn get_children(
        &self,
        path: &str,
        watch: bool,
    ) -> impl Future<Output = Result<Vec<String>, StoreError>> + Send;

    /// Ends the session. The event stream reports [`SessionEvent::Closed`].
    fn close(&self) -> impl Future<Output = Result<(), StoreError>> + Send;
}

/// Opens store sessions.
///
/// `open` must not block: it hands back the session handle and its event
/// stream immediately, and connection progress is reported through the stream.
pub trait StoreConnector: Send + Sync + 'static {
    /// Store handle produced by this connector.
    type Store: CoordinationStore;

    fn open(
        &self,
        endpoints: &[String],
        session_timeout: Duration,
    ) -> Result<(Self::Store, SessionEvents), StoreError>;
}

/// Joins a parent path and a child name.
pub fn join_path(parent: &str, child: &str) -> String {
    if parent.is_empty() || parent == "/" {
        format!("/{child}")
    } else {
        format!("{parent}/{child}")
    }
}
