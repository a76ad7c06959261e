//! The storage contract and its lock-and-notify implementation.
//!
//! # Commit path (strict order, under the identity's commit lock)
//!
//! 1. Conditional replace/delete in the backing store
//! 2. Release the identity's waiters with the committed outcome
//!
//! # Long-poll path (under the same lock)
//!
//! 1. Register a waiter
//! 2. Re-read the current version; return at once if it already moved
//!
//! The waiter then blocks with the lock released. Because registration and
//! draining share a lock, a waiter registered before a commit always observes
//! that commit, and one registered after it takes the fast path.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::backend::{BackingStore, CasOutcome};
use crate::error::{StorageError, StorageResult};
use crate::hub::{Notification, NotificationHub, WaitOutcome};
use crate::retry::RetryPolicy;
use crate::stored::Stored;
use crate::token::{Identity, Version};

/// Number of commit-lock stripes per store.
const COMMIT_STRIPES: usize = 64;

/// Versioned save/get/update/delete for one aggregate type.
pub trait Storage<T> {
    /// Allocates a fresh identity and version and persists `value`.
    fn save(&self, value: T) -> StorageResult<T>;

    /// Returns the live record for `identity`.
    fn get(&self, identity: &Identity) -> StorageResult<T>;

    /// Compare-and-swap on `(identity, expected.version)`.
    ///
    /// # Errors
    ///
    /// `Conflict` carrying the current record if the stored version differs
    /// from `expected`, even when `value` equals what is stored. `NotFound` if
    /// the identity no longer exists.
    fn update(&self, expected: &Stored<T>, value: T) -> StorageResult<T>;

    /// Removes the record under the same CAS discipline as `update`.
    fn delete(&self, expected: &Stored<T>) -> StorageResult<T, ()>;

    /// Policy used by the retry helpers.
    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::default()
    }

    /// Fetches the current record, applies `f`, and attempts the update,
    /// recomputing from the fresh record on every conflict.
    ///
    /// `NotFound` and backend failures are returned immediately.
    fn update_with<F>(&self, identity: &Identity, f: F) -> StorageResult<T>
    where
        Self: Sized,
        F: FnMut(&T) -> T,
    {
        let current = self.get(identity)?;
        self.update_from(current, f)
    }

    /// Like [`update_with`](Storage::update_with) but starts from a record
    /// the caller already holds.
    fn update_from<F>(&self, record: Stored<T>, mut f: F) -> StorageResult<T>
    where
        Self: Sized,
        F: FnMut(&T) -> T,
    {
        let policy = self.retry_policy();
        let mut current = record;
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            let next = f(current.value());
            match self.update(&current, next) {
                Err(StorageError::Conflict(fresh)) if policy.allows_another(attempts) => {
                    trace!(
                        identity = %fresh.identity(),
                        attempts,
                        "update conflicted, retrying from current version"
                    );
                    policy.pause(attempts);
                    current = *fresh;
                }
                result => return result,
            }
        }
    }

    /// Like [`update_from`](Storage::update_from), but `f` may decline by
    /// returning `None`. Nothing is written then, and `Ok(None)` comes back.
    ///
    /// `f` is re-evaluated against the fresh record after every conflict, so
    /// a decision made on a stale record never commits.
    fn update_if<F>(&self, record: Stored<T>, mut f: F) -> StorageResult<T, Option<Stored<T>>>
    where
        Self: Sized,
        F: FnMut(&T) -> Option<T>,
    {
        let policy = self.retry_policy();
        let mut current = record;
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            let Some(next) = f(current.value()) else {
                return Ok(None);
            };
            match self.update(&current, next) {
                Err(StorageError::Conflict(fresh)) if policy.allows_another(attempts) => {
                    trace!(
                        identity = %fresh.identity(),
                        attempts,
                        "conditional update conflicted, re-evaluating"
                    );
                    policy.pause(attempts);
                    current = *fresh;
                }
                result => return result.map(Some),
            }
        }
    }

    /// Deletes the record, retrying from the current version on conflict.
    fn delete_from(&self, record: Stored<T>) -> StorageResult<T, ()> {
        let policy = self.retry_policy();
        let mut current = record;
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            match self.delete(&current) {
                Err(StorageError::Conflict(fresh)) if policy.allows_another(attempts) => {
                    trace!(
                        identity = %fresh.identity(),
                        attempts,
                        "delete conflicted, retrying from current version"
                    );
                    policy.pause(attempts);
                    current = *fresh;
                }
                result => return result,
            }
        }
    }
}

/// Striped commit locks: one mutex per identity bucket.
struct CommitLocks {
    stripes: Box<[Mutex<()>]>,
}

impl CommitLocks {
    fn new(stripes: usize) -> Self {
        Self {
            stripes: (0..stripes.max(1)).map(|_| Mutex::new(())).collect(),
        }
    }

    fn for_identity(&self, identity: &Identity) -> &Mutex<()> {
        let index = (identity.as_u128() % self.stripes.len() as u128) as usize;
        &self.stripes[index]
    }
}

/// A [`Storage`] over any [`BackingStore`], with commit locks and long-poll
/// notification.
pub struct VersionedStore<T, B> {
    backend: B,
    hub: Arc<NotificationHub<T>>,
    locks: CommitLocks,
    retry: RetryPolicy,
}

impl<T, B> VersionedStore<T, B>
where
    T: Clone,
    B: BackingStore<T>,
{
    /// Creates a store with its own notification hub.
    pub fn new(backend: B) -> Self {
        Self::with_hub(backend, NotificationHub::new())
    }

    /// Creates a store that publishes commits to `hub`.
    pub fn with_hub(backend: B, hub: Arc<NotificationHub<T>>) -> Self {
        Self {
            backend,
            hub,
            locks: CommitLocks::new(COMMIT_STRIPES),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn hub(&self) -> &Arc<NotificationHub<T>> {
        &self.hub
    }

    /// Current version of `identity`.
    pub fn current_version(&self, identity: &Identity) -> StorageResult<T, Version> {
        self.get(identity).map(|record| record.version())
    }

    /// Blocks until `identity` moves past `known`.
    ///
    /// Returns at once with the current record if its version already differs
    /// from `known`. `Ok(None)` means the timeout elapsed and `known` is still
    /// current. A deleted aggregate yields `NotFound`; a hub shut down while
    /// waiting yields `Shutdown`.
    pub fn wait_next_version(
        &self,
        identity: &Identity,
        known: &Version,
        timeout: Option<Duration>,
    ) -> StorageResult<T, Option<Stored<T>>> {
        let waiter = {
            let _commit = self.locks.for_identity(identity).lock();
            let waiter = self.hub.register(*identity);
            match self.backend.fetch(identity)? {
                None => return Err(StorageError::NotFound(*identity)),
                Some(current) if current.version() != *known => {
                    trace!(identity = %identity, version = %current.version(), "long-poll fast path");
                    return Ok(Some(current));
                }
                Some(_) => waiter,
            }
        };

        match waiter.wait(timeout) {
            WaitOutcome::Notified(Notification::Committed(record)) => Ok(Some(record)),
            WaitOutcome::Notified(Notification::Deleted(identity)) => {
                Err(StorageError::NotFound(identity))
            }
            WaitOutcome::TimedOut => Ok(None),
            WaitOutcome::Closed => Err(StorageError::Shutdown),
        }
    }

    /// Commits a new version without changing the value, waking every waiter.
    ///
    /// Used when content referenced by the record changed elsewhere.
    pub fn touch(&self, identity: &Identity) -> StorageResult<T> {
        self.update_with(identity, T::clone)
    }
}

impl<T, B> Storage<T> for VersionedStore<T, B>
where
    T: Clone,
    B: BackingStore<T>,
{
    fn save(&self, value: T) -> StorageResult<T> {
        let record = Stored::new(value);
        self.backend.persist(&record)?;
        debug!(identity = %record.identity(), version = %record.version(), "saved record");
        Ok(record)
    }

    fn get(&self, identity: &Identity) -> StorageResult<T> {
        self.backend
            .fetch(identity)?
            .ok_or(StorageError::NotFound(*identity))
    }

    fn update(&self, expected: &Stored<T>, value: T) -> StorageResult<T> {
        let next = expected.next_version(value);
        let _commit = self.locks.for_identity(&next.identity()).lock();

        match self.backend.conditional_replace(&expected.version(), &next)? {
            CasOutcome::Applied => {
                debug!(
                    identity = %next.identity(),
                    from = %expected.version(),
                    to = %next.version(),
                    "committed update"
                );
                self.hub.publish(&next);
                Ok(next)
            }
            CasOutcome::Conflict(current) => Err(StorageError::conflict(current)),
            CasOutcome::Missing => Err(StorageError::NotFound(expected.identity())),
        }
    }

    fn delete(&self, expected: &Stored<T>) -> StorageResult<T, ()> {
        let identity = expected.identity();
        let _commit = self.locks.for_identity(&identity).lock();

        match self
            .backend
            .conditional_delete(&identity, &expected.version())?
        {
            CasOutcome::Applied => {
                debug!(identity = %identity, version = %expected.version(), "deleted record");
                self.hub.retire(identity);
                Ok(())
            }
            CasOutcome::Conflict(current) => Err(StorageError::conflict(current)),
            CasOutcome::Missing => Err(StorageError::NotFound(identity)),
        }
    }

    fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;

    fn store() -> VersionedStore<String, MemoryBackend<String>> {
        VersionedStore::new(MemoryBackend::new())
    }

    #[test]
    fn save_then_get_returns_same_record() {
        let store = store();
        let saved = store.save("hello".to_string()).unwrap();
        let fetched = store.get(&saved.identity()).unwrap();

        assert_eq!(fetched, saved);
        assert_eq!(fetched.value(), "hello");
    }

    #[test]
    fn get_unknown_is_not_found() {
        let store = store();
        let missing = Identity::new();
        assert!(matches!(
            store.get(&missing),
            Err(StorageError::NotFound(id)) if id == missing
        ));
    }

    #[test]
    fn update_allocates_new_version() {
        let store = store();
        let v1 = store.save("a".to_string()).unwrap();
        let v2 = store.update(&v1, "b".to_string()).unwrap();

        assert_eq!(v2.identity(), v1.identity());
        assert_ne!(v2.version(), v1.version());
        assert_eq!(store.get(&v1.identity()).unwrap(), v2);
    }

    #[test]
    fn stale_update_conflicts_even_with_identical_value() {
        let store = store();
        let v1 = store.save("same".to_string()).unwrap();
        let v2 = store.update(&v1, "same".to_string()).unwrap();

        let err = store.update(&v1, "same".to_string()).unwrap_err();
        assert_eq!(err.current(), Some(&v2));
    }

    #[test]
    fn stale_delete_conflicts_and_leaves_record() {
        let store = store();
        let v1 = store.save("keep".to_string()).unwrap();
        let v2 = store.update(&v1, "kept".to_string()).unwrap();

        let err = store.delete(&v1).unwrap_err();
        assert_eq!(err.current(), Some(&v2));
        assert_eq!(store.get(&v1.identity()).unwrap(), v2);
    }

    #[test]
    fn update_and_delete_after_delete_are_not_found() {
        let store = store();
        let v1 = store.save("gone".to_string()).unwrap();
        store.delete(&v1).unwrap();

        assert!(store.update(&v1, "x".to_string()).unwrap_err().is_not_found());
        assert!(store.delete(&v1).unwrap_err().is_not_found());
        assert!(store.get(&v1.identity()).unwrap_err().is_not_found());
    }

    #[test]
    fn update_from_retries_from_fresh_record() {
        let store = store();
        let v1 = store.save("a".to_string()).unwrap();
        store.update(&v1, "ab".to_string()).unwrap();

        let mut calls = 0;
        let v3 = store
            .update_from(v1, |value| {
                calls += 1;
                format!("{value}!")
            })
            .unwrap();

        assert_eq!(v3.value(), "ab!");
        assert_eq!(calls, 2);
    }

    #[test]
    fn update_with_propagates_not_found_without_retrying() {
        let store = store();
        let mut calls = 0;
        let err = store
            .update_with(&Identity::new(), |v: &String| {
                calls += 1;
                v.clone()
            })
            .unwrap_err();

        assert!(err.is_not_found());
        assert_eq!(calls, 0);
    }

    #[test]
    fn bounded_policy_returns_last_conflict() {
        let store = VersionedStore::new(MemoryBackend::new())
            .with_retry_policy(RetryPolicy::unbounded().with_max_attempts(1));
        let v1 = store.save(1u32).unwrap();
        let v2 = store.update(&v1, 2).unwrap();

        let err = store.update_from(v1, |v| v + 1).unwrap_err();
        assert_eq!(err.current(), Some(&v2));
    }

    #[test]
    fn update_if_declines_after_conflict_reveals_the_change() {
        let store = store();
        let v1 = store.save("a".to_string()).unwrap();
        let v2 = store.update(&v1, "a+b".to_string()).unwrap();

        let mut calls = 0;
        let outcome = store
            .update_if(v1, |value| {
                calls += 1;
                (!value.contains("+b")).then(|| format!("{value}+b"))
            })
            .unwrap();

        assert_eq!(outcome, None);
        assert_eq!(calls, 2);
        assert_eq!(store.get(&v2.identity()).unwrap(), v2);
    }

    #[test]
    fn update_if_commits_when_accepted() {
        let store = store();
        let v1 = store.save("a".to_string()).unwrap();

        let v2 = store
            .update_if(v1.clone(), |value| Some(format!("{value}b")))
            .unwrap()
            .unwrap();
        assert_eq!(v2.value(), "ab");
        assert_ne!(v2.version(), v1.version());
    }

    #[test]
    fn delete_from_retries_past_stale_version() {
        let store = store();
        let v1 = store.save("x".to_string()).unwrap();
        store.update(&v1, "y".to_string()).unwrap();

        store.delete_from(v1.clone()).unwrap();
        assert!(store.get(&v1.identity()).unwrap_err().is_not_found());
    }

    #[test]
    fn touch_bumps_version_and_keeps_value() {
        let store = store();
        let v1 = store.save("body".to_string()).unwrap();
        let v2 = store.touch(&v1.identity()).unwrap();

        assert_ne!(v1.version(), v2.version());
        assert_eq!(v1.value(), v2.value());
        assert_eq!(store.current_version(&v1.identity()).unwrap(), v2.version());
    }

    #[test]
    fn wait_fast_path_returns_current_record() {
        let store = store();
        let v1 = store.save("a".to_string()).unwrap();
        let v2 = store.update(&v1, "b".to_string()).unwrap();

        let seen = store
            .wait_next_version(&v1.identity(), &v1.version(), None)
            .unwrap();
        assert_eq!(seen, Some(v2));
        assert_eq!(store.hub().total_pending(), 0);
    }

    #[test]
    fn wait_times_out_and_unregisters() {
        let store = store();
        let v1 = store.save("a".to_string()).unwrap();

        let seen = store
            .wait_next_version(&v1.identity(), &v1.version(), Some(Duration::from_millis(10)))
            .unwrap();
        assert_eq!(seen, None);
        assert_eq!(store.hub().pending(&v1.identity()), 0);
    }

    #[test]
    fn wait_on_missing_is_not_found() {
        let store = store();
        let err = store
            .wait_next_version(&Identity::new(), &Version::new(), None)
            .unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(store.hub().total_pending(), 0);
    }

    #[test]
    fn wait_after_shutdown_reports_shutdown() {
        let store = store();
        let v1 = store.save("a".to_string()).unwrap();
        store.hub().shutdown();

        let err = store
            .wait_next_version(&v1.identity(), &v1.version(), None)
            .unwrap_err();
        assert!(matches!(err, StorageError::Shutdown));
    }
}
