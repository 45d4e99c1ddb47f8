//! Error types for coordination-store lock operations.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Return codes reported by the coordination store.
///
/// The numeric values follow the ZooKeeper protocol so that errors surfaced by
/// a real client map onto the same discriminants as the in-memory store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreErrorCode {
    /// Unclassified server-side failure.
    SystemError,
    /// The connection to the store was lost mid-operation.
    ConnectionLoss,
    /// The operation did not complete in time.
    OperationTimeout,
    /// Malformed arguments (for example a relative path).
    BadArguments,
    /// The node (or its parent) does not exist.
    NoNode,
    /// The expected node version did not match.
    BadVersion,
    /// Ephemeral nodes cannot have children.
    NoChildrenForEphemerals,
    /// The node already exists.
    NodeExists,
    /// The node still has children.
    NotEmpty,
    /// The session backing the operation has expired.
    SessionExpired,
}

impl StoreErrorCode {
    /// Returns the store's numeric return code.
    pub fn as_i32(self) -> i32 {
        match self {
            Self::SystemError => -1,
            Self::ConnectionLoss => -4,
            Self::OperationTimeout => -7,
            Self::BadArguments => -8,
            Self::NoNode => -101,
            Self::BadVersion => -103,
            Self::NoChildrenForEphemerals => -108,
            Self::NodeExists => -110,
            Self::NotEmpty => -111,
            Self::SessionExpired => -112,
        }
    }

    /// Maps a numeric return code back to a known code.
    pub fn from_i32(code: i32) -> Option<Self> {
        Some(match code {
            -1 => Self::SystemError,
            -4 => Self::ConnectionLoss,
            -7 => Self::OperationTimeout,
            -8 => Self::BadArguments,
            -101 => Self::NoNode,
            -103 => Self::BadVersion,
            -108 => Self::NoChildrenForEphemerals,
            -110 => Self::NodeExists,
            -111 => Self::NotEmpty,
            -112 => Self::SessionExpired,
            _ => return None,
        })
    }
}

impl fmt::Display for StoreErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::SystemError => "SYSTEM_ERROR",
            Self::ConnectionLoss => "CONNECTION_LOSS",
            Self::OperationTimeout => "OPERATION_TIMEOUT",
            Self::BadArguments => "BAD_ARGUMENTS",
            Self::NoNode => "NO_NODE",
            Self::BadVersion => "BAD_VERSION",
            Self::NoChildrenForEphemerals => "NO_CHILDREN_FOR_EPHEMERALS",
            Self::NodeExists => "NODE_EXISTS",
            Self::NotEmpty => "NOT_EMPTY",
            Self::SessionExpired => "SESSION_EXPIRED",
        };
        write!(f, "{name} ({})", self.as_i32())
    }
}

/// A failed store operation: the return code plus a message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{code}: {message}")]
pub struct StoreError {
    /// Store-supplied return code.
    pub code: StoreErrorCode,
    /// Human readable detail, usually naming the path involved.
    pub message: String,
}

impl StoreError {
    pub fn new(code: StoreErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn no_node(path: &str) -> Self {
        Self::new(StoreErrorCode::NoNode, format!("node '{path}' does not exist"))
    }

    pub fn node_exists(path: &str) -> Self {
        Self::new(StoreErrorCode::NodeExists, format!("node '{path}' already exists"))
    }

    pub fn is_node_exists(&self) -> bool {
        self.code == StoreErrorCode::NodeExists
    }

    pub fn is_no_node(&self) -> bool {
        self.code == StoreErrorCode::NoNode
    }
}

/// Broken lock-protocol invariants.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolViolation {
    /// Unlock of a path this session does not hold.
    #[error("lock '{0}' is not held by this session")]
    NotHeld(String),

    /// A second lock on a path this session already holds or is negotiating.
    #[error("lock '{0}' is already held or pending on this session")]
    AlreadyHeld(String),

    /// Sibling sequence suffixes were assigned with different widths.
    #[error("sequence suffix '{found}' does not match the expected width {expected}")]
    SequenceWidthMismatch { expected: usize, found: String },

    /// A created lock node carries no numeric sequence suffix.
    #[error("node '{0}' has no sequence suffix")]
    MissingSequence(String),

    /// This contender's own node kept missing from its parent's listing.
    #[error("lock node '{0}' disappeared while negotiating")]
    NodeVanished(String),
}

/// Errors that can occur during lock operations.
#[derive(Error, Debug, Clone)]
pub enum LockError {
    /// Malformed lock path; reported before contacting the store.
    #[error("invalid lock path: {0}")]
    InvalidPath(String),

    /// The connection gate (or a caller-supplied acquire timeout) expired.
    #[error("lock operation timed out after {0:?}")]
    Timeout(Duration),

    /// Terminal session failure, or reuse of a failed session.
    #[error("session error: {0}")]
    Session(String),

    /// A store operation failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// A lock-protocol invariant was violated.
    #[error("protocol violation: {0}")]
    Protocol(#[from] ProtocolViolation),

    /// Lock negotiation was cancelled.
    #[error("lock operation was cancelled")]
    Cancelled,
}

/// Discriminant of [`LockError`] without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    Timeout,
    Session,
    StoreOperation,
    ProtocolInvariant,
    Cancelled,
}

impl LockError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidPath(_) => ErrorKind::Validation,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::Session(_) => ErrorKind::Session,
            Self::Store(_) => ErrorKind::StoreOperation,
            Self::Protocol(_) => ErrorKind::ProtocolInvariant,
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Returns the store return code if this error came from the store.
    pub fn store_code(&self) -> Option<StoreErrorCode> {
        match self {
            Self::Store(e) => Some(e.code),
            _ => None,
        }
    }
}

/// Result type for lock operations.
pub type LockResult<T> = Result<T, LockError>;
