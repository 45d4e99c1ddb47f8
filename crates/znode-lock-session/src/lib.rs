//! Sequential-node lock negotiation over a coordination store.
//!
//! A [`Session`] tracks one store session and negotiates locks by creating
//! ephemeral sequential nodes under the lock's parent. Contenders are served
//! strictly in the order the store assigned their sequence numbers. Sessions
//! are shared per endpoint set through a [`SessionRegistry`].
//!
//! [`ZnodeLockProvider`] adapts this to the backend-agnostic
//! [`DistributedLock`](znode_lock_core::DistributedLock) traits.

pub mod handle;
pub mod lock;
mod negotiate;
pub mod options;
pub mod path;
pub mod provider;
pub mod registry;
pub mod sequence;
pub mod session;
pub mod table;
pub mod watch;

pub use handle::ZnodeLockHandle;
pub use lock::ZnodeDistributedLock;
pub use options::SessionOptions;
pub use path::LockPath;
pub use provider::{ZnodeLockProvider, ZnodeLockProviderBuilder};
pub use registry::SessionRegistry;
pub use session::{Session, SessionState};
