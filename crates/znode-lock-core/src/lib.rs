//! Core traits and types for coordination-store locks.

pub mod error;
pub mod prelude;
pub mod store;
pub mod timeout;
pub mod traits;

pub use error::{ErrorKind, LockError, LockResult, ProtocolViolation, StoreError, StoreErrorCode};
pub use prelude::*;
