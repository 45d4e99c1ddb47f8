//! Per-session record of lock nodes.

use std::collections::HashMap;

use parking_lot::Mutex;
use znode_lock_core::error::{LockResult, ProtocolViolation};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Entry {
    /// Negotiation in progress.
    Pending,
    /// Held through the given ephemeral node.
    Held(String),
}

/// Maps logical lock paths to the ephemeral nodes created for them.
#[derive(Debug, Default)]
pub struct LockTable {
    entries: Mutex<HashMap<String, Entry>>,
}

impl LockTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims `path` for a new negotiation. Fails if the path is already held
    /// or being negotiated on this session.
    pub fn reserve(&self, path: &str) -> LockResult<()> {
        let mut entries = self.entries.lock();
        if entries.contains_key(path) {
            return Err(ProtocolViolation::AlreadyHeld(path.to_string()).into());
        }
        entries.insert(path.to_string(), Entry::Pending);
        Ok(())
    }

    /// Records that `path` is held through `node`.
    ///
    /// Only a pending reservation is upgraded. Returns `false` when the
    /// reservation is gone, e.g. because the table was cleared on session loss.
    pub fn commit(&self, path: &str, node: &str) -> bool {
        let mut entries = self.entries.lock();
        match entries.get_mut(path) {
            Some(entry @ Entry::Pending) => {
                *entry = Entry::Held(node.to_string());
                true
            }
            _ => false,
        }
    }

    /// Drops a reservation that never became a held lock.
    pub fn abandon(&self, path: &str) {
        let mut entries = self.entries.lock();
        if entries.get(path) == Some(&Entry::Pending) {
            entries.remove(path);
        }
    }

    /// The node holding `path`, if the lock is held.
    pub fn held_node(&self, path: &str) -> Option<String> {
        match self.entries.lock().get(path) {
            Some(Entry::Held(node)) => Some(node.clone()),
            _ => None,
        }
    }

    /// Removes the entry for `path` if it is still held through `node`.
    pub fn release(&self, path: &str, node: &str) -> bool {
        let mut entries = self.entries.lock();
        match entries.get(path) {
            Some(Entry::Held(held)) if held == node => {
                entries.remove(path);
                true
            }
            _ => false,
        }
    }

    /// Held locks as `(path, node)` pairs, sorted by path.
    pub fn held(&self) -> Vec<(String, String)> {
        let mut held: Vec<(String, String)> = self
            .entries
            .lock()
            .iter()
            .filter_map(|(path, entry)| match entry {
                Entry::Held(node) => Some((path.clone(), node.clone())),
                Entry::Pending => None,
            })
            .collect();
        held.sort();
        held
    }

    /// Forgets every entry; the store has already removed the nodes.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}
