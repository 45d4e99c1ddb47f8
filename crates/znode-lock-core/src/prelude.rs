//! Convenience prelude for lock types.

pub use crate::error::{ErrorKind, LockError, LockResult, ProtocolViolation, StoreError, StoreErrorCode};
pub use crate::store::{CoordinationStore, CreateMode, SessionEvent, SessionEvents, StoreConnector};
pub use crate::traits::{DistributedLock, LockHandle, LockProvider, LockProviderExt};
