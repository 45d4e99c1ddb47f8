//! Lock path validation and ancestor provisioning.

use std::fmt;

use tracing::trace;
use znode_lock_core::error::{LockError, LockResult};
use znode_lock_core::store::{CoordinationStore, CreateMode, PATH_SEPARATOR};

/// A validated logical lock path, split into parent directory and leaf prefix.
///
/// `/locks/orders` negotiates through sequential children of `/locks` named
/// `orders0000000000`, `orders0000000001`, ...
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockPath {
    full: String,
    split: usize,
}

impl LockPath {
    /// Parses a caller-supplied lock path.
    ///
    /// The path must contain a separator and end in a non-empty leaf. A
    /// missing leading separator is added.
    pub fn parse(path: &str) -> LockResult<Self> {
        if !path.contains(PATH_SEPARATOR) {
            return Err(LockError::InvalidPath(format!(
                "'{path}' must contain a '{PATH_SEPARATOR}' separating parent and lock name"
            )));
        }
        let full = if path.starts_with(PATH_SEPARATOR) {
            path.to_string()
        } else {
            format!("{PATH_SEPARATOR}{path}")
        };
        if full[1..].split(PATH_SEPARATOR).any(str::is_empty) {
            return Err(LockError::InvalidPath(format!(
                "'{path}' contains an empty path segment"
            )));
        }
        let split = full.rfind(PATH_SEPARATOR).unwrap_or(0);
        Ok(Self { full, split })
    }

    pub fn as_str(&self) -> &str {
        &self.full
    }

    /// Parent directory; empty for a lock directly under the root.
    pub fn parent(&self) -> &str {
        &self.full[..self.split]
    }

    /// Parent directory in the form accepted by child listings.
    pub fn parent_dir(&self) -> &str {
        if self.split == 0 { "/" } else { self.parent() }
    }

    /// Leaf name used as the prefix of every contender's sequential node.
    pub fn leaf(&self) -> &str {
        &self.full[self.split + 1..]
    }
}

impl fmt::Display for LockPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full)
    }
}

/// Ensures every node along `path` exists, creating missing ones front to
/// back with `value` and `mode`.
///
/// Nodes that already exist are accepted. Any other creation error stops the
/// walk. An empty path (or `/`) is the implicit root and succeeds immediately.
pub async fn ensure_path<S: CoordinationStore>(
    store: &S,
    path: &str,
    value: &[u8],
    mode: CreateMode,
) -> LockResult<()> {
    let mut current = String::with_capacity(path.len());
    for segment in path.split(PATH_SEPARATOR).filter(|s| !s.is_empty()) {
        current.push(PATH_SEPARATOR);
        current.push_str(segment);
        match store.create(&current, value, mode).await {
            Ok(_) => trace!(path = %current, "created ancestor node"),
            Err(e) if e.is_node_exists() => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use znode_lock_core::error::{ErrorKind, StoreErrorCode};
    use znode_lock_core::store::StoreConnector;
    use znode_lock_memory::{MemoryCoordinationService, StoreOp};

    #[test]
    fn test_parse_splits_parent_and_leaf() {
        let path = LockPath::parse("/app/locks/orders").unwrap();
        assert_eq!(path.parent(), "/app/locks");
        assert_eq!(path.parent_dir(), "/app/locks");
        assert_eq!(path.leaf(), "orders");
    }

    #[test]
    fn test_parse_root_level_lock() {
        let path = LockPath::parse("/orders").unwrap();
        assert_eq!(path.parent(), "");
        assert_eq!(path.parent_dir(), "/");
        assert_eq!(path.leaf(), "orders");
    }

    #[test]
    fn test_parse_adds_leading_separator() {
        let path = LockPath::parse("app/orders").unwrap();
        assert_eq!(path.as_str(), "/app/orders");
        assert_eq!(path.parent(), "/app");
    }

    #[test]
    fn test_parse_rejects_malformed_paths() {
        for bad in ["orders", "", "/app/", "/app//orders", "/"] {
            let err = LockPath::parse(bad).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Validation, "path {bad:?}");
        }
    }

    #[tokio::test]
    async fn test_ensure_path_creates_ancestors_and_is_idempotent() {
        let service = MemoryCoordinationService::new();
        let (store, _events) = service
            .connector()
            .open(&["mem".to_string()], Duration::from_secs(1))
            .unwrap();

        ensure_path(&store, "/a/b/c", b"", CreateMode::Persistent).await.unwrap();
        assert!(service.node_exists("/a"));
        assert!(service.node_exists("/a/b"));
        assert!(service.node_exists("/a/b/c"));

        ensure_path(&store, "/a/b/c/d", b"", CreateMode::Persistent).await.unwrap();
        assert!(service.node_exists("/a/b/c/d"));
        ensure_path(&store, "", b"", CreateMode::Persistent).await.unwrap();
    }

    #[tokio::test]
    async fn test_ensure_path_stops_at_first_real_failure() {
        let service = MemoryCoordinationService::new();
        let (store, _events) = service
            .connector()
            .open(&["mem".to_string()], Duration::from_secs(1))
            .unwrap();
        service.fail_next(StoreOp::Create, StoreErrorCode::SystemError);

        let err = ensure_path(&store, "/x/y", b"", CreateMode::Persistent).await.unwrap_err();
        assert_eq!(err.store_code(), Some(StoreErrorCode::SystemError));
        assert!(!service.node_exists("/x"));
        assert!(!service.node_exists("/x/y"));
    }
}
