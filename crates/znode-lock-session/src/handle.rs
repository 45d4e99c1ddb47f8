//! Handle for a held lock.

use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{debug, instrument};

use znode_lock_core::error::LockResult;
use znode_lock_core::store::StoreConnector;
use znode_lock_core::traits::LockHandle;

use crate::session::Session;

/// Handle for a lock held through an ephemeral node.
///
/// The lock lasts until [`release`](LockHandle::release) is called, the handle
/// is dropped, or the owning session is lost. Dropping schedules a
/// best-effort unlock; call `release()` to observe its outcome.
pub struct ZnodeLockHandle<C: StoreConnector> {
    session: Session<C>,
    path: String,
    node: String,
    /// Flips to `true` when the owning session fails or closes.
    lost_receiver: watch::Receiver<bool>,
    released: bool,
}

impl<C: StoreConnector> ZnodeLockHandle<C> {
    pub(crate) fn new(session: Session<C>, path: String, node: String) -> Self {
        let lost_receiver = session.lost_token();
        Self {
            session,
            path,
            node,
            lost_receiver,
            released: false,
        }
    }

    /// The logical lock path.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The ephemeral node that holds the lock.
    pub fn node(&self) -> &str {
        &self.node
    }

    pub fn session(&self) -> &Session<C> {
        &self.session
    }

    /// True while the session still records this node as the holder.
    fn still_held(&self) -> bool {
        self.session.locks().held_node(&self.path).as_deref() == Some(self.node.as_str())
    }
}

impl<C: StoreConnector> LockHandle for ZnodeLockHandle<C> {
    fn lost_token(&self) -> &watch::Receiver<bool> {
        &self.lost_receiver
    }

    #[instrument(skip(self), fields(lock.path = %self.path, node = %self.node, backend = "znode"))]
    async fn release(self) -> LockResult<()> {
        let mut this = self;
        this.released = true;
        this.session.unlock(&this.path).await.map(|_| ())
    }
}

impl<C: StoreConnector> Drop for ZnodeLockHandle<C> {
    fn drop(&mut self) {
        if self.released || !self.still_held() {
            return;
        }
        let Ok(runtime) = Handle::try_current() else {
            return;
        };
        let session = self.session.clone();
        let path = std::mem::take(&mut self.path);
        runtime.spawn(async move {
            if let Err(e) = session.unlock(&path).await {
                debug!(lock.path = %path, error = %e, "best-effort release on drop failed");
            }
        });
    }
}
