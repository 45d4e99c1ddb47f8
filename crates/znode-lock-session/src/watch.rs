//! Per-path fan-out of node-deletion notifications.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::trace;
use znode_lock_core::error::{LockError, LockResult};

#[derive(Debug)]
struct Waiter {
    id: u64,
    notify: oneshot::Sender<LockResult<()>>,
}

/// Maps watched node paths to the waiters parked on their deletion.
///
/// Each waiter is notified at most once. A deletion drains every waiter of
/// that path in registration order and removes the entry.
#[derive(Debug, Default)]
pub struct WatchRegistry {
    waiters: Mutex<HashMap<String, Vec<Waiter>>>,
    next_id: AtomicU64,
}

impl WatchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parks a waiter on `path`. Register before arming the store watch so a
    /// deletion racing the existence check cannot be missed.
    pub fn register(&self, path: &str) -> WatchTicket<'_> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (notify, receiver) = oneshot::channel();
        self.waiters
            .lock()
            .entry(path.to_string())
            .or_default()
            .push(Waiter { id, notify });
        WatchTicket {
            registry: self,
            path: path.to_string(),
            id,
            receiver,
        }
    }

    /// Handles a node-deleted event: wakes every waiter of `path`.
    /// Returns how many waiters were woken.
    pub fn fire(&self, path: &str) -> usize {
        let Some(waiters) = self.waiters.lock().remove(path) else {
            return 0;
        };
        trace!(path, waiters = waiters.len(), "node deleted, waking waiters");
        let count = waiters.len();
        for waiter in waiters {
            let _ = waiter.notify.send(Ok(()));
        }
        count
    }

    /// Fails every parked waiter, for example when the session is lost.
    pub fn fail_all(&self, error: &LockError) {
        let drained: Vec<Waiter> = self
            .waiters
            .lock()
            .drain()
            .flat_map(|(_, waiters)| waiters)
            .collect();
        for waiter in drained {
            let _ = waiter.notify.send(Err(error.clone()));
        }
    }

    /// Number of waiters parked on `path`.
    pub fn pending(&self, path: &str) -> usize {
        self.waiters.lock().get(path).map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.waiters.lock().is_empty()
    }

    fn cancel(&self, path: &str, id: u64) {
        let mut waiters = self.waiters.lock();
        if let Some(list) = waiters.get_mut(path) {
            list.retain(|w| w.id != id);
            if list.is_empty() {
                waiters.remove(path);
            }
        }
    }
}

/// A registered waiter. Dropping it before it fires withdraws it.
#[derive(Debug)]
pub struct WatchTicket<'a> {
    registry: &'a WatchRegistry,
    path: String,
    id: u64,
    receiver: oneshot::Receiver<LockResult<()>>,
}

impl WatchTicket<'_> {
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Waits until the watched node is deleted or the registry is failed.
    pub async fn fired(&mut self) -> LockResult<()> {
        match (&mut self.receiver).await {
            Ok(result) => result,
            Err(_) => Err(LockError::Session(format!(
                "watch on '{}' was dropped",
                self.path
            ))),
        }
    }
}

impl Drop for WatchTicket<'_> {
    fn drop(&mut self) {
        self.registry.cancel(&self.path, self.id);
    }
}
