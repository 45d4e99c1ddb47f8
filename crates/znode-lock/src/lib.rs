//! Fair distributed locks over ZooKeeper-style coordination stores.
//!
//! Each lock is a path in the store's hierarchical namespace. Contenders create
//! ephemeral sequential nodes beneath its parent and are served in sequence
//! order: the lowest sequence holds the lock, every other contender watches the
//! node just ahead of it. Because the nodes are ephemeral, a lock disappears
//! together with the session that held it.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use znode_lock::*;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // An in-process store; any `StoreConnector` works the same way
//!     let service = MemoryCoordinationService::new();
//!     let provider = ZnodeLockProviderBuilder::new()
//!         .endpoint("mem:1")
//!         .timeout(Duration::from_secs(5))
//!         .build(service.connector())?;
//!
//!     let lock = provider.create_lock("/locks/my-resource");
//!     let handle = lock.acquire(Some(Duration::from_secs(5))).await?;
//!
//!     // Critical section - we have exclusive access
//!     println!("Doing critical work...");
//!
//!     handle.release().await?;
//!     provider.shutdown().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Sessions
//!
//! The lower-level [`Session`] API exposes the lock operations directly:
//!
//! ```rust,no_run
//! # use znode_lock::*;
//! # async fn run(registry: SessionRegistry<MemoryConnector>) -> LockResult<()> {
//! let session = registry.get_session(&["zk1:2181", "zk2:2181"], None);
//! let node = session.lock("/locks/jobs/nightly", b"worker-7").await?;
//! println!("holding {node}");
//! session.unlock("/locks/jobs/nightly").await?;
//! registry.shutdown_all().await
//! # }
//! ```
//!
//! # Crate Organization
//!
//! This is a meta-crate that re-exports types from:
//! - `znode-lock-core`: errors, traits and the coordination-store interface
//! - `znode-lock-session`: sessions, negotiation and the provider
//! - `znode-lock-memory`: in-memory coordination store (feature `memory`)
//!
//! For fine-grained control, you can depend on individual crates instead.

// Re-export core types and traits
pub use znode_lock_core::*;

// Re-export sessions and the provider
pub use znode_lock_session::*;

// Re-export the in-memory store
#[cfg(feature = "memory")]
#[allow(ambiguous_glob_reexports)]
pub use znode_lock_memory::*;
