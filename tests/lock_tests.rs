//! Integration tests for lock negotiation on the in-memory store.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use znode_lock::*;

mod common;
use common::memory::{connected, registry, wait_for_children, GATE_TIMEOUT};

#[tokio::test]
async fn test_lock_unlock_leaves_no_residue() {
    let (service, registry) = registry();
    let session = connected(&registry, "mem:1").await;

    let node = session.lock("/locks/orders", b"host-a").await.unwrap();
    assert_eq!(node, "/locks/orders0000000000");
    assert_eq!(service.node_data(&node).as_deref(), Some(&b"host-a"[..]));
    assert_eq!(session.held_locks(), vec![("/locks/orders".to_string(), node.clone())]);

    assert_eq!(session.unlock("/locks/orders").await.unwrap(), "/locks/orders");
    assert!(service.children("/locks").is_empty());
    assert!(session.held_locks().is_empty());

    let fresh = connected(&registry, "mem:2").await;
    assert!(!fresh.same_session(&session));
    let node = tokio::time::timeout(Duration::from_secs(1), fresh.lock("/locks/orders", b""))
        .await
        .expect("fresh session should not block")
        .unwrap();
    assert_eq!(node, "/locks/orders0000000001");
}

#[tokio::test]
async fn test_invalid_path_fails_without_store_contact() {
    let (service, registry) = registry();
    let session = registry.get_session(&["mem:1"], Some(GATE_TIMEOUT));
    let sessions = service.session_count();

    for path in ["orders", "", "/locks//orders", "/locks/"] {
        let err = session.lock(path, b"").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation, "path {path:?}");
    }
    assert_eq!(service.session_count(), sessions);
    assert!(service.children("/").is_empty());
    assert!(session.held_locks().is_empty());
}

#[tokio::test]
async fn test_missing_ancestors_are_created() {
    let (service, registry) = registry();
    let session = connected(&registry, "mem:1").await;

    let node = session.lock("/a/b/c/job", b"").await.unwrap();
    assert!(service.node_exists("/a"));
    assert!(service.node_exists("/a/b"));
    assert!(service.node_exists("/a/b/c"));
    assert_eq!(node, "/a/b/c/job0000000000");

    // Parent nodes outlive the lock
    session.unlock("/a/b/c/job").await.unwrap();
    assert!(service.node_exists("/a/b/c"));
}

#[tokio::test]
async fn test_waiter_is_granted_only_after_release() {
    let (service, registry) = registry();
    let a = connected(&registry, "mem:a").await;
    let b = connected(&registry, "mem:b").await;

    a.lock("/locks/report", b"").await.unwrap();

    let start = Instant::now();
    let waiter = tokio::spawn(async move {
        b.lock("/locks/report", b"").await.unwrap();
        Instant::now()
    });
    wait_for_children(&service, "/locks", 2).await;

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!waiter.is_finished());

    let unlock_started = Instant::now();
    a.unlock("/locks/report").await.unwrap();
    let acquired_at = waiter.await.unwrap();

    assert!(acquired_at >= unlock_started);
    assert!(acquired_at.duration_since(start) >= Duration::from_millis(200));
}

#[tokio::test]
async fn test_contenders_are_served_in_creation_order() {
    let (service, registry) = registry();
    let a = connected(&registry, "mem:a").await;
    let events = Arc::new(Mutex::new(Vec::new()));

    a.lock("/fifo/lock", b"").await.unwrap();

    let mut contenders = Vec::new();
    for (count, name) in [(2, "B"), (3, "C")] {
        let session = connected(&registry, &format!("mem:{name}")).await;
        let events = Arc::clone(&events);
        contenders.push(tokio::spawn(async move {
            session.lock("/fifo/lock", b"").await.unwrap();
            events.lock().unwrap().push(format!("{name} acquired"));
            tokio::time::sleep(Duration::from_millis(20)).await;
            events.lock().unwrap().push(format!("{name} released"));
            session.unlock("/fifo/lock").await.unwrap();
        }));
        wait_for_children(&service, "/fifo", count).await;
    }

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(events.lock().unwrap().is_empty());

    events.lock().unwrap().push("A released".to_string());
    a.unlock("/fifo/lock").await.unwrap();
    for contender in contenders {
        contender.await.unwrap();
    }

    assert_eq!(
        *events.lock().unwrap(),
        ["A released", "B acquired", "B released", "C acquired", "C released"]
    );
    assert!(service.children("/fifo").is_empty());
}

#[tokio::test]
async fn test_one_session_locks_two_paths_concurrently() {
    let (_service, registry) = registry();
    let session = connected(&registry, "mem:1").await;

    let (first, second) = tokio::join!(
        session.lock("/locks/left", b""),
        session.lock("/locks/right", b"")
    );
    first.unwrap();
    second.unwrap();
    assert_eq!(session.held_locks().len(), 2);

    let (first, second) = tokio::join!(session.unlock("/locks/left"), session.unlock("/locks/right"));
    first.unwrap();
    second.unwrap();
    assert!(session.held_locks().is_empty());
}

#[tokio::test]
async fn test_unrelated_siblings_do_not_block() {
    let (service, registry) = registry();
    let a = connected(&registry, "mem:a").await;
    let b = connected(&registry, "mem:b").await;

    a.lock("/locks/jobbar", b"").await.unwrap();
    let node = tokio::time::timeout(Duration::from_secs(1), b.lock("/locks/job", b""))
        .await
        .expect("lock with a shared prefix should not queue")
        .unwrap();
    assert_eq!(node, "/locks/job0000000001");
    assert_eq!(service.children("/locks").len(), 2);
}

#[tokio::test]
async fn test_lock_with_digit_extended_name_does_not_interfere() {
    let (service, registry) = registry();
    let a = connected(&registry, "mem:a").await;
    let b = connected(&registry, "mem:b").await;

    let held = a.lock("/locks/job1", b"").await.unwrap();
    assert_eq!(held, "/locks/job10000000000");
    let node = tokio::time::timeout(Duration::from_secs(1), b.lock("/locks/job", b""))
        .await
        .expect("lock with a digit-extended sibling should not queue")
        .unwrap();
    assert_eq!(node, "/locks/job0000000001");

    // The longer-named lock still queues on its own nodes only
    let c = connected(&registry, "mem:c").await;
    assert_eq!(c.try_lock("/locks/job1", b"").await.unwrap(), None);
    assert_eq!(service.children("/locks").len(), 2);
}

#[tokio::test]
async fn test_shutdown_all_releases_locks() {
    let (service, registry) = registry();
    let a = connected(&registry, "mem:a").await;
    let b = connected(&registry, "mem:b").await;
    a.lock("/locks/one", b"").await.unwrap();
    b.lock("/locks/two", b"").await.unwrap();

    registry.shutdown_all().await.unwrap();
    assert!(registry.is_empty());
    assert_eq!(a.state(), SessionState::Closed);
    assert!(service.children("/locks").is_empty());
    assert_eq!(service.session_count(), 0);

    let fresh = registry.get_session(&["mem:a"], Some(GATE_TIMEOUT));
    assert!(!fresh.same_session(&a));
    tokio::time::timeout(Duration::from_secs(1), fresh.lock("/locks/one", b""))
        .await
        .expect("released lock should be free")
        .unwrap();
}

#[tokio::test]
async fn test_unreachable_endpoints_time_out() {
    let (service, registry) = registry();
    service.set_reachable("mem:down", false);
    let timeout = Duration::from_millis(200);
    let session = registry.get_session(&["mem:down"], Some(timeout));

    let start = Instant::now();
    let err = session.lock("/locks/any", b"").await.unwrap_err();
    let elapsed = start.elapsed();

    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert!(matches!(err, LockError::Timeout(t) if t == timeout));
    assert!(elapsed >= timeout);
    assert!(elapsed < Duration::from_secs(2));
    assert_eq!(session.state(), SessionState::Error);
    assert!(session.held_locks().is_empty());
}

#[tokio::test]
async fn test_listing_failure_surfaces_to_caller() {
    let (service, registry) = registry();
    let session = connected(&registry, "mem:1").await;

    service.fail_next(StoreOp::GetChildren, StoreErrorCode::SystemError);
    let err = tokio::time::timeout(Duration::from_secs(1), session.lock("/locks/faulty", b""))
        .await
        .expect("lock should fail, not hang")
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::StoreOperation);
    assert_eq!(err.store_code(), Some(StoreErrorCode::SystemError));
    assert!(session.held_locks().is_empty());

    // The orphaned node is cleaned up and the path can be locked again
    wait_for_children(&service, "/locks", 0).await;
    session.lock("/locks/faulty", b"").await.unwrap();
}

#[tokio::test]
async fn test_creation_failure_surfaces_to_caller() {
    let (service, registry) = registry();
    let session = connected(&registry, "mem:1").await;
    session.lock("/locks/warm", b"").await.unwrap();

    service.fail_next(StoreOp::Create, StoreErrorCode::NoChildrenForEphemerals);
    let err = session.lock("/locks/cold", b"").await.unwrap_err();
    assert_eq!(err.store_code(), Some(StoreErrorCode::NoChildrenForEphemerals));
    session.lock("/locks/cold", b"").await.unwrap();
}

#[tokio::test]
async fn test_unlock_of_unheld_path_is_protocol_violation() {
    let (_service, registry) = registry();
    let session = connected(&registry, "mem:1").await;
    session.lock("/locks/held", b"").await.unwrap();
    let before = session.held_locks();

    let err = session.unlock("/locks/other").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ProtocolInvariant);
    assert!(matches!(err, LockError::Protocol(ProtocolViolation::NotHeld(_))));
    assert_eq!(session.held_locks(), before);
}

#[tokio::test]
async fn test_failed_delete_keeps_lock_recorded() {
    let (service, registry) = registry();
    let session = connected(&registry, "mem:1").await;
    let node = session.lock("/locks/sticky", b"").await.unwrap();

    service.fail_next(StoreOp::Delete, StoreErrorCode::OperationTimeout);
    let err = session.unlock("/locks/sticky").await.unwrap_err();
    assert_eq!(err.store_code(), Some(StoreErrorCode::OperationTimeout));
    assert!(service.node_exists(&node));
    assert_eq!(session.held_locks().len(), 1);

    session.unlock("/locks/sticky").await.unwrap();
    assert!(!service.node_exists(&node));
}

#[tokio::test]
async fn test_double_lock_is_rejected() {
    let (service, registry) = registry();
    let session = connected(&registry, "mem:1").await;
    session.lock("/locks/once", b"").await.unwrap();

    let err = session.lock("/locks/once", b"").await.unwrap_err();
    assert!(matches!(err, LockError::Protocol(ProtocolViolation::AlreadyHeld(_))));
    assert_eq!(service.children("/locks").len(), 1);
}

#[tokio::test]
async fn test_try_lock_does_not_queue() {
    let (service, registry) = registry();
    let a = connected(&registry, "mem:a").await;
    let b = connected(&registry, "mem:b").await;

    assert!(a.try_lock("/locks/busy", b"").await.unwrap().is_some());
    assert_eq!(b.try_lock("/locks/busy", b"").await.unwrap(), None);
    assert_eq!(service.children("/locks").len(), 1);
    assert!(b.held_locks().is_empty());

    a.unlock("/locks/busy").await.unwrap();
    assert!(b.try_lock("/locks/busy", b"").await.unwrap().is_some());
}

#[tokio::test]
async fn test_cancelled_waiter_withdraws_its_node() {
    let (service, registry) = registry();
    let a = connected(&registry, "mem:a").await;
    let b = connected(&registry, "mem:b").await;
    a.lock("/locks/slow", b"").await.unwrap();

    let (cancel, cancel_rx) = watch::channel(false);
    let waiter = tokio::spawn(async move { b.lock_cancellable("/locks/slow", b"", cancel_rx).await });
    wait_for_children(&service, "/locks", 2).await;

    cancel.send(true).unwrap();
    let err = waiter.await.unwrap().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Cancelled);
    wait_for_children(&service, "/locks", 1).await;

    // The holder is unaffected
    a.unlock("/locks/slow").await.unwrap();
}

#[tokio::test]
async fn test_lost_session_fails_waiters_and_frees_locks() {
    let (service, registry) = registry();
    let a = connected(&registry, "mem:a").await;
    let b = connected(&registry, "mem:b").await;
    a.lock("/locks/shared", b"").await.unwrap();

    let waiter = {
        let b = b.clone();
        tokio::spawn(async move { b.lock("/locks/shared", b"").await })
    };
    wait_for_children(&service, "/locks", 2).await;
    // Let the waiter park on its predecessor
    tokio::time::sleep(Duration::from_millis(100)).await;

    let mut lost = b.lost_token();
    assert!(service.expire_session(b.session_id().unwrap()));
    lost.wait_for(|lost| *lost).await.unwrap();

    let err = waiter.await.unwrap().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Session);
    assert_eq!(b.state(), SessionState::Error);
    assert!(b.lock("/locks/shared", b"").await.is_err());

    // Expiring the holder frees the lock for everyone else
    let c = connected(&registry, "mem:c").await;
    let mut a_lost = a.lost_token();
    service.expire_session(a.session_id().unwrap());
    a_lost.wait_for(|lost| *lost).await.unwrap();
    assert!(a.held_locks().is_empty());
    tokio::time::timeout(Duration::from_secs(1), c.lock("/locks/shared", b""))
        .await
        .expect("lock of an expired holder should be free")
        .unwrap();
}
