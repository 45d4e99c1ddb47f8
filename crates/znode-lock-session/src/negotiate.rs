//! Fair lock negotiation over sequential ephemeral nodes.
//!
//! Each contender creates `<parent>/<leaf><sequence>` and ranks itself among
//! its siblings. The lowest sequence holds the lock; everyone else watches the
//! sibling immediately below and re-ranks once it is deleted. Acquisition
//! order is therefore the order in which the store assigned sequence numbers.

use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, field::Empty, instrument, trace, warn, Span};

use znode_lock_core::error::{LockError, LockResult, ProtocolViolation};
use znode_lock_core::store::{join_path, CoordinationStore, CreateMode, StoreConnector};

use crate::path::{ensure_path, LockPath};
use crate::sequence::{rank, Rank};
use crate::session::Session;
use crate::table::LockTable;
use crate::watch::WatchRegistry;

/// Consecutive listings without our own node before giving up on it.
const UNRANKED_LIMIT: u32 = 3;

impl<C: StoreConnector> Session<C> {
    /// Acquires the lock at `path`, waiting as long as it takes for every
    /// earlier contender to release. `payload` is stored in the lock node.
    ///
    /// Returns the path of the ephemeral node that holds the lock.
    pub async fn lock(&self, path: &str, payload: &[u8]) -> LockResult<String> {
        let (_cancel_tx, cancel_rx) = watch::channel(false);
        self.lock_cancellable(path, payload, cancel_rx).await
    }

    /// Like [`lock`](Self::lock), but gives up with [`LockError::Cancelled`]
    /// once `cancel` turns `true`. The token is checked while waiting for the
    /// connection, at every negotiation round and while parked on a watch.
    #[instrument(
        skip(self, payload, cancel),
        fields(lock.path = %path, session.key = %self.key(), backend = "znode", node = Empty, acquired = Empty, elapsed_ms = Empty)
    )]
    pub async fn lock_cancellable(
        &self,
        path: &str,
        payload: &[u8],
        mut cancel: watch::Receiver<bool>,
    ) -> LockResult<String> {
        let start = Instant::now();
        let lock_path = LockPath::parse(path)?;
        let (claim, store, node) = self.contend(&lock_path, payload, &mut cancel).await?;

        let result = negotiate(&*store, self.watches(), &lock_path, &node, &mut cancel, true).await;
        if let Err(e) = result {
            Span::current().record("acquired", false);
            debug!(%node, error = %e, "lock negotiation failed");
            return Err(e);
        }

        if !claim.commit() {
            Span::current().record("acquired", false);
            debug!(%node, "session lost before the lock could be recorded");
            return Err(lost_while_acquiring());
        }
        Span::current().record("acquired", true);
        Span::current().record("elapsed_ms", start.elapsed().as_millis() as u64);
        debug!(%node, "lock acquired");
        Ok(node)
    }

    /// Acquires the lock at `path` only if no other contender is queued ahead.
    ///
    /// Returns `Ok(None)` (after deleting the node it created) when the lock is
    /// held elsewhere.
    #[instrument(
        skip(self, payload),
        fields(lock.path = %path, session.key = %self.key(), backend = "znode", acquired = Empty)
    )]
    pub async fn try_lock(&self, path: &str, payload: &[u8]) -> LockResult<Option<String>> {
        let lock_path = LockPath::parse(path)?;
        let (_cancel_tx, mut cancel) = watch::channel(false);
        let (claim, store, node) = self.contend(&lock_path, payload, &mut cancel).await?;

        if negotiate(&*store, self.watches(), &lock_path, &node, &mut cancel, false).await? {
            if !claim.commit() {
                Span::current().record("acquired", false);
                return Err(lost_while_acquiring());
            }
            Span::current().record("acquired", true);
            Ok(Some(node))
        } else {
            claim.withdraw().await;
            Span::current().record("acquired", false);
            Ok(None)
        }
    }

    /// Releases the lock at `path` by deleting its node.
    ///
    /// Fails with [`ProtocolViolation::NotHeld`] if this session does not hold
    /// the lock. A failed delete leaves the lock recorded so the caller can
    /// retry. Returns the lock path.
    #[instrument(skip(self), fields(lock.path = %path, session.key = %self.key(), backend = "znode"))]
    pub async fn unlock(&self, path: &str) -> LockResult<String> {
        let lock_path = LockPath::parse(path)?;
        self.on_connection().await?;

        let node = self
            .locks()
            .held_node(lock_path.as_str())
            .ok_or_else(|| ProtocolViolation::NotHeld(lock_path.to_string()))?;
        let store = self.store()?;
        store.delete(&node, None).await?;

        self.locks().release(lock_path.as_str(), &node);
        debug!(%node, "lock released");
        Ok(path.to_string())
    }

    /// Reserves the path, passes the connection gate and creates this
    /// contender's sequential node.
    async fn contend(
        &self,
        lock_path: &LockPath,
        payload: &[u8],
        cancel: &mut watch::Receiver<bool>,
    ) -> LockResult<(Claim<'_, C::Store>, Arc<C::Store>, String)> {
        let mut claim = Claim::reserve(self.locks(), lock_path.as_str())?;

        tokio::select! {
            gate = self.on_connection() => gate?,
            () = cancelled(cancel) => return Err(LockError::Cancelled),
        }

        let store = self.store()?;
        ensure_path(&*store, lock_path.parent(), &[], CreateMode::Persistent).await?;
        let node = store
            .create(lock_path.as_str(), payload, CreateMode::EphemeralSequential)
            .await?;
        Span::current().record("node", node.as_str());
        trace!(%node, "created lock node");

        claim.created(Arc::clone(&store), node.clone());
        Ok((claim, store, node))
    }
}

/// Runs negotiation rounds for `node` until it holds the lowest sequence.
///
/// With `wait` unset, returns `Ok(false)` as soon as another contender is
/// found ahead instead of parking on its deletion.
async fn negotiate<S: CoordinationStore>(
    store: &S,
    watches: &WatchRegistry,
    lock_path: &LockPath,
    node: &str,
    cancel: &mut watch::Receiver<bool>,
    wait: bool,
) -> LockResult<bool> {
    let own = node.rsplit('/').next().unwrap_or(node);
    let mut round: u32 = 0;
    let mut unranked: u32 = 0;

    loop {
        if *cancel.borrow() {
            return Err(LockError::Cancelled);
        }
        round += 1;

        let children = store.get_children(lock_path.parent_dir(), false).await?;
        let predecessor = match rank(&children, lock_path.leaf(), own)? {
            Rank::Holder => {
                trace!(%node, round, "holding lowest sequence");
                return Ok(true);
            }
            Rank::Unranked => {
                unranked += 1;
                if unranked >= UNRANKED_LIMIT {
                    warn!(%node, round, "own node missing from listing");
                    return Err(ProtocolViolation::NodeVanished(node.to_string()).into());
                }
                trace!(%node, round, "own node not listed yet, listing again");
                tokio::task::yield_now().await;
                continue;
            }
            Rank::Waiting { .. } if !wait => return Ok(false),
            Rank::Waiting { predecessor } => join_path(lock_path.parent(), &predecessor),
        };
        unranked = 0;

        let mut ticket = watches.register(&predecessor);
        if !store.exists(&predecessor, true).await? {
            trace!(%node, %predecessor, "predecessor gone before watch was armed");
            continue;
        }

        trace!(%node, %predecessor, round, "waiting for predecessor");
        tokio::select! {
            fired = ticket.fired() => fired?,
            () = cancelled(cancel) => return Err(LockError::Cancelled),
        }
    }
}

fn lost_while_acquiring() -> LockError {
    LockError::Session("session was lost while acquiring the lock".to_string())
}

/// Resolves once `cancel` reads `true`; never resolves if its sender is gone.
async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    let sender_dropped = cancel.wait_for(|cancelled| *cancelled).await.is_err();
    if sender_dropped {
        std::future::pending::<()>().await;
    }
}

/// A lock-table reservation plus the node created under it.
///
/// Dropped without [`commit`](Claim::commit), it abandons the reservation and
/// deletes the node in the background so no orphan blocks other contenders.
struct Claim<'a, S: CoordinationStore> {
    table: &'a LockTable,
    path: String,
    node: Option<(Arc<S>, String)>,
    committed: bool,
}

impl<'a, S: CoordinationStore> Claim<'a, S> {
    fn reserve(table: &'a LockTable, path: &str) -> LockResult<Self> {
        table.reserve(path)?;
        Ok(Self {
            table,
            path: path.to_string(),
            node: None,
            committed: false,
        })
    }

    fn created(&mut self, store: Arc<S>, node: String) {
        self.node = Some((store, node));
    }

    /// Records the lock as held. Returns `false`, leaving the node to be
    /// cleaned up on drop, if the reservation did not survive negotiation.
    fn commit(mut self) -> bool {
        let Some((_, node)) = &self.node else {
            return false;
        };
        self.committed = self.table.commit(&self.path, node);
        if self.committed {
            self.node = None;
        }
        self.committed
    }

    /// Deletes the created node before giving up the reservation.
    async fn withdraw(mut self) {
        if let Some((store, node)) = self.node.take()
            && let Err(e) = store.delete(&node, None).await
        {
            warn!(%node, error = %e, "failed to delete withdrawn lock node");
        }
    }
}

impl<S: CoordinationStore> Drop for Claim<'_, S> {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        self.table.abandon(&self.path);
        if let Some((store, node)) = self.node.take() {
            let Ok(runtime) = Handle::try_current() else {
                warn!(%node, "no runtime to delete abandoned lock node");
                return;
            };
            runtime.spawn(async move {
                if let Err(e) = store.delete(&node, None).await {
                    debug!(%node, error = %e, "failed to delete abandoned lock node");
                }
            });
        }
    }
}
