//! In-memory coordination store for znode-lock.
//!
//! Provides ephemeral and sequential nodes, one-shot existence watches and
//! session events without a running ZooKeeper ensemble. Useful for tests,
//! demos and single-process deployments. Faults can be injected per operation
//! with [`MemoryCoordinationService::fail_next`], and session loss simulated
//! with [`MemoryCoordinationService::expire_session`].

pub mod service;
pub mod store;

pub use service::{MemoryCoordinationService, StoreOp, SEQUENCE_WIDTH};
pub use store::{MemoryConnector, MemoryStore};
