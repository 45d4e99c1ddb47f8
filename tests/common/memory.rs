//! Helpers for tests against the in-memory coordination store.

use std::time::Duration;

use znode_lock::*;

/// Default connection-gate timeout used by tests.
pub const GATE_TIMEOUT: Duration = Duration::from_secs(2);

/// A store plus a registry bound to it.
pub fn registry() -> (MemoryCoordinationService, SessionRegistry<MemoryConnector>) {
    let service = MemoryCoordinationService::new();
    let registry = SessionRegistry::new(service.connector());
    (service, registry)
}

/// A connected session for `endpoint`.
pub async fn connected(
    registry: &SessionRegistry<MemoryConnector>,
    endpoint: &str,
) -> Session<MemoryConnector> {
    let session = registry.get_session(&[endpoint], Some(GATE_TIMEOUT));
    session.on_connection().await.unwrap();
    session
}

/// Polls until `parent` has exactly `count` children.
pub async fn wait_for_children(service: &MemoryCoordinationService, parent: &str, count: usize) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while service.children(parent).len() != count {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| {
        panic!(
            "expected {count} children under {parent}, found {:?}",
            service.children(parent)
        )
    });
}

/// Polls until the store has exactly `count` live sessions.
pub async fn wait_for_sessions(service: &MemoryCoordinationService, count: usize) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while service.session_count() != count {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("expected {count} sessions, found {}", service.session_count()));
}
