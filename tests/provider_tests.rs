//! Tests for provider abstraction.

use std::time::Duration;

use znode_lock::*;

mod common;
use common::memory::{wait_for_children, GATE_TIMEOUT};

fn provider(service: &MemoryCoordinationService) -> ZnodeLockProvider<MemoryConnector> {
    provider_for(service, "mem:1")
}

fn provider_for(service: &MemoryCoordinationService, endpoint: &str) -> ZnodeLockProvider<MemoryConnector> {
    ZnodeLockProviderBuilder::new()
        .endpoint(endpoint)
        .timeout(GATE_TIMEOUT)
        .payload("provider-test")
        .build(service.connector())
        .unwrap()
}

/// Tests that any provider can be used with the same code.
async fn test_provider_abstraction<P: LockProvider>(provider: &P, name: &str)
where
    P::Lock: DistributedLock,
{
    // Create a lock using the provider
    let lock = provider.create_lock(name);
    assert_eq!(lock.name(), name);

    // Try to acquire the lock
    let handle = lock.try_acquire().await.unwrap();
    assert!(handle.is_some());

    // Release the lock
    handle.unwrap().release().await.unwrap();

    // Now we should be able to acquire it again
    let handle2 = lock.try_acquire().await.unwrap();
    assert!(handle2.is_some());
    handle2.unwrap().release().await.unwrap();
}

/// Tests provider extension methods work with any provider.
async fn test_provider_extensions<P: LockProvider + LockProviderExt>(provider: &P, name: &str)
where
    P::Lock: DistributedLock,
{
    // Test acquire_lock extension method
    let handle = provider
        .acquire_lock(name, Some(Duration::from_millis(500)))
        .await
        .unwrap();
    handle.release().await.unwrap();

    let handle = provider.try_acquire_lock(name).await.unwrap();
    assert!(handle.is_some());
    handle.unwrap().release().await.unwrap();
}

#[tokio::test]
async fn test_znode_provider_abstraction() {
    let service = MemoryCoordinationService::new();
    let provider = provider(&service);
    test_provider_abstraction(&provider, "/locks/abstraction").await;
    test_provider_extensions(&provider, "/locks/extensions").await;
    assert!(service.children("/locks").is_empty());
}

#[tokio::test]
async fn test_builder_requires_an_endpoint() {
    let service = MemoryCoordinationService::new();
    let result = ZnodeLockProviderBuilder::new().build(service.connector());
    assert!(matches!(result, Err(LockError::Session(_))));
}

#[tokio::test]
async fn test_payload_is_stored_in_lock_node() {
    let service = MemoryCoordinationService::new();
    let provider = provider(&service);

    let handle = provider.create_lock("/locks/payload").acquire(None).await.unwrap();
    assert_eq!(handle.path(), "/locks/payload");
    assert_eq!(service.node_data(handle.node()).as_deref(), Some(&b"provider-test"[..]));
    handle.release().await.unwrap();
}

#[tokio::test]
async fn test_acquire_times_out_behind_holder() {
    let service = MemoryCoordinationService::new();
    let provider = provider(&service);
    let holder = provider.create_lock("/locks/held").acquire(None).await.unwrap();

    let contender = provider_for(&service, "mem:2");
    assert!(contender.create_lock("/locks/held").try_acquire().await.unwrap().is_none());

    let timeout = Duration::from_millis(150);
    let err = contender
        .create_lock("/locks/held")
        .acquire(Some(timeout))
        .await
        .err()
        .unwrap();
    assert!(matches!(err, LockError::Timeout(t) if t == timeout));

    // The timed-out contender withdrew its node
    wait_for_children(&service, "/locks", 1).await;
    holder.release().await.unwrap();
}

#[tokio::test]
async fn test_locks_from_one_provider_share_a_session() {
    let service = MemoryCoordinationService::new();
    let provider = provider(&service);

    let first = provider.create_lock("/locks/a").acquire(None).await.unwrap();
    let second = provider.create_lock("/locks/b").acquire(None).await.unwrap();
    assert!(first.session().same_session(second.session()));
    assert_eq!(service.session_count(), 1);
    assert_eq!(provider.session().held_locks().len(), 2);

    first.release().await.unwrap();
    second.release().await.unwrap();
}

#[tokio::test]
async fn test_dropped_handle_releases_lock() {
    let service = MemoryCoordinationService::new();
    let provider = provider(&service);

    let handle = provider.create_lock("/locks/dropped").acquire(None).await.unwrap();
    drop(handle);

    wait_for_children(&service, "/locks", 0).await;
    assert!(provider.session().held_locks().is_empty());
}

#[tokio::test]
async fn test_lost_token_signals_session_loss() {
    let service = MemoryCoordinationService::new();
    let provider = provider(&service);

    let handle = provider.create_lock("/locks/lost").acquire(None).await.unwrap();
    let mut lost = handle.lost_token().clone();
    assert!(!*lost.borrow());

    service.expire_session(handle.session().session_id().unwrap());
    tokio::time::timeout(Duration::from_secs(1), lost.wait_for(|lost| *lost))
        .await
        .unwrap()
        .unwrap();

    // Releasing through the failed session reports the loss
    let err = handle.release().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Session);
}

#[tokio::test]
async fn test_shutdown_releases_provider_locks() {
    let service = MemoryCoordinationService::new();
    let provider = provider(&service);
    let _handle = provider.create_lock("/locks/shutdown").acquire(None).await.unwrap();

    provider.shutdown().await.unwrap();
    assert!(service.children("/locks").is_empty());
    assert!(provider.registry().is_empty());

    let handle = provider
        .create_lock("/locks/shutdown")
        .acquire(Some(Duration::from_secs(1)))
        .await
        .unwrap();
    handle.release().await.unwrap();
}
