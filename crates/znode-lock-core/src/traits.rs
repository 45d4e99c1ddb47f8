//! Backend-agnostic lock traits.

use std::future::Future;
use std::time::Duration;

use crate::error::LockResult;

// ============================================================================
// Lock Handle Trait
// ============================================================================

/// Handle to a held distributed lock.
///
/// For proper error handling in async contexts, call `release()` explicitly;
/// dropping the handle only schedules a best-effort release.
///
/// # Example
///
/// ```rust,ignore
/// let handle = lock.acquire(None).await?;
/// do_work().await;
/// handle.release().await?;
/// ```
pub trait LockHandle: Send + Sync + Sized {
    /// Returns a receiver that signals when the lock is lost.
    ///
    /// The receiver yields `true` once the session owning the lock node has
    /// failed or closed, at which point the store has removed the node and
    /// another contender may already hold the lock.
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// let mut lost = handle.lost_token().clone();
    /// tokio::select! {
    ///     _ = lost.changed() => eprintln!("lock was lost"),
    ///     _ = do_work() => {}
    /// }
    /// ```
    fn lost_token(&self) -> &tokio::sync::watch::Receiver<bool>;

    /// Explicitly releases the lock.
    fn release(self) -> impl Future<Output = LockResult<()>> + Send;
}

// ============================================================================
// Distributed Lock Trait
// ============================================================================

/// A distributed mutual exclusion lock identified by a store path.
///
/// # Example
///
/// ```rust,ignore
/// use znode_lock_core::DistributedLock;
///
/// async fn protected_operation(lock: &impl DistributedLock) -> LockResult<()> {
///     let handle = lock.acquire(Some(Duration::from_secs(5))).await?;
///     perform_critical_section().await?;
///     handle.release().await
/// }
/// ```
pub trait DistributedLock: Send + Sync {
    /// The handle type returned when the lock is acquired.
    type Handle: LockHandle + Send;

    /// Returns the logical lock path.
    fn name(&self) -> &str;

    /// Acquires the lock, waiting up to `timeout`.
    ///
    /// # Returns
    ///
    /// * `Ok(handle)` - Lock acquired; every earlier contender has released
    /// * `Err(LockError::Timeout)` - The connection gate or `timeout` expired
    /// * `Err(LockError::Session)` - The session failed while waiting
    /// * `Err(LockError::Store)` - A store operation failed
    fn acquire(
        &self,
        timeout: Option<Duration>,
    ) -> impl Future<Output = LockResult<Self::Handle>> + Send;

    /// Attempts to acquire the lock without queueing behind other contenders.
    ///
    /// # Returns
    ///
    /// * `Ok(Some(handle))` - Lock acquired
    /// * `Ok(None)` - Another contender is ahead in the queue
    /// * `Err(...)` - Error occurred during attempt
    fn try_acquire(&self) -> impl Future<Output = LockResult<Option<Self::Handle>>> + Send;
}

// ============================================================================
// Provider Traits
// ============================================================================

/// Factory for creating distributed locks by path.
///
/// # Example
///
/// ```rust,ignore
/// let provider = ZnodeLockProviderBuilder::new()
///     .endpoint("zk1:2181")
///     .build(connector)?;
///
/// let lock = provider.create_lock("/locks/my-resource");
/// let handle = lock.acquire(None).await?;
/// ```
pub trait LockProvider: Send + Sync {
    /// The lock type created by this provider.
    type Lock: DistributedLock;

    /// Creates a lock for the given path.
    fn create_lock(&self, name: &str) -> Self::Lock;
}

// ============================================================================
// Convenience Extensions
// ============================================================================

/// Extension trait providing convenience methods for lock providers.
pub trait LockProviderExt: LockProvider {
    /// Acquires a lock by path, returning the handle.
    fn acquire_lock(
        &self,
        name: &str,
        timeout: Option<Duration>,
    ) -> impl Future<Output = LockResult<<Self::Lock as DistributedLock>::Handle>> + Send
    where
        Self: Sync,
    {
        async move {
            let lock = self.create_lock(name);
            lock.acquire(timeout).await
        }
    }

    /// Tries to acquire a lock by path.
    fn try_acquire_lock(
        &self,
        name: &str,
    ) -> impl Future<Output = LockResult<Option<<Self::Lock as DistributedLock>::Handle>>> + Send
    where
        Self: Sync,
    {
        async move {
            let lock = self.create_lock(name);
            lock.try_acquire().await
        }
    }
}

impl<T: LockProvider> LockProviderExt for T {}
