//! Long-poll notification hub.
//!
//! The hub maps an aggregate identity to the waiters blocked on its next
//! version. Each waiter is a single-fulfillment handle backed by a bounded
//! channel of capacity one, so fulfilling it never blocks the committer.
//!
//! # Lifecycle
//!
//! - A hub is constructed explicitly and shared by the store that commits to it
//! - `publish` and `retire` take the whole queue for an identity at once
//! - `shutdown` releases every waiter and refuses new registrations
//!
//! A waiter is removed from the registry exactly once: by fulfillment, or by
//! its own `Drop` when it timed out or was abandoned.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::debug;

use crate::stored::Stored;
use crate::token::Identity;

/// Identifies one registered waiter.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct WaiterId(u64);

/// What a waiter is fulfilled with.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Notification<T> {
    /// A new version was committed.
    Committed(Stored<T>),
    /// The aggregate was deleted.
    Deleted(Identity),
}

/// Result of blocking on a [`Waiter`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WaitOutcome<T> {
    Notified(Notification<T>),
    TimedOut,
    /// The hub shut down before the waiter was fulfilled.
    Closed,
}

struct Slot<T> {
    id: WaiterId,
    sender: SyncSender<Notification<T>>,
}

struct Registry<T> {
    queues: HashMap<Identity, Vec<Slot<T>>>,
    closed: bool,
}

/// Registry of pending long-poll waiters, keyed by aggregate identity.
pub struct NotificationHub<T> {
    registry: Mutex<Registry<T>>,
    next_id: AtomicU64,
}

impl<T> NotificationHub<T> {
    /// Creates an empty hub.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            registry: Mutex::new(Registry {
                queues: HashMap::new(),
                closed: false,
            }),
            next_id: AtomicU64::new(1),
        })
    }

    /// Registers a new waiter for `identity`.
    ///
    /// After `shutdown` the returned waiter is already closed.
    pub fn register(self: &Arc<Self>, identity: Identity) -> Waiter<T> {
        let id = WaiterId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (sender, receiver) = mpsc::sync_channel(1);

        let mut registry = self.registry.lock();
        if !registry.closed {
            registry
                .queues
                .entry(identity)
                .or_default()
                .push(Slot { id, sender });
        }
        drop(registry);

        Waiter {
            identity,
            id,
            receiver,
            hub: Arc::clone(self),
        }
    }

    /// Fans out a deletion to every waiter of `identity`.
    ///
    /// Returns how many waiters were released.
    pub fn retire(&self, identity: Identity) -> usize {
        let released = self.fulfill(identity, || Notification::Deleted(identity));
        if released > 0 {
            debug!(identity = %identity, released, "released waiters of deleted aggregate");
        }
        released
    }

    /// Releases every pending waiter and refuses further registrations.
    pub fn shutdown(&self) {
        let mut registry = self.registry.lock();
        if registry.closed {
            return;
        }
        registry.closed = true;
        let dropped: usize = registry.queues.values().map(Vec::len).sum();
        registry.queues.clear();
        debug!(dropped, "notification hub shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.registry.lock().closed
    }

    /// Number of waiters pending on `identity`.
    pub fn pending(&self, identity: &Identity) -> usize {
        self.registry
            .lock()
            .queues
            .get(identity)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Number of waiters pending across all identities.
    pub fn total_pending(&self) -> usize {
        self.registry.lock().queues.values().map(Vec::len).sum()
    }

    fn fulfill(&self, identity: Identity, make: impl Fn() -> Notification<T>) -> usize {
        let taken = self.registry.lock().queues.remove(&identity);
        let Some(slots) = taken else {
            return 0;
        };
        let released = slots.len();
        for slot in slots {
            // Capacity is one and each slot is fulfilled once, so this only
            // fails if the waiter already gave up.
            let _ = slot.sender.try_send(make());
        }
        released
    }

    fn cancel(&self, identity: &Identity, id: WaiterId) {
        let mut registry = self.registry.lock();
        if let Some(slots) = registry.queues.get_mut(identity) {
            slots.retain(|slot| slot.id != id);
            if slots.is_empty() {
                registry.queues.remove(identity);
            }
        }
    }
}

impl<T: Clone> NotificationHub<T> {
    /// Fulfills every waiter of the record's identity with the record and
    /// clears the queue.
    ///
    /// Returns how many waiters were released.
    pub fn publish(&self, record: &Stored<T>) -> usize {
        let identity = record.identity();
        let released = self.fulfill(identity, || Notification::Committed(record.clone()));
        if released > 0 {
            debug!(
                identity = %identity,
                version = %record.version(),
                released,
                "released waiters"
            );
        }
        released
    }
}

impl<T> fmt::Debug for NotificationHub<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotificationHub")
            .field("pending", &self.total_pending())
            .finish_non_exhaustive()
    }
}

/// A pending long-poll registration.
///
/// Dropping an unfulfilled waiter removes it from the hub.
pub struct Waiter<T> {
    identity: Identity,
    id: WaiterId,
    receiver: Receiver<Notification<T>>,
    hub: Arc<NotificationHub<T>>,
}

impl<T> Waiter<T> {
    pub fn identity(&self) -> Identity {
        self.identity
    }

    pub fn id(&self) -> WaiterId {
        self.id
    }

    /// Blocks until the waiter is fulfilled, the timeout elapses, or the hub
    /// shuts down. `None` waits without a deadline.
    pub fn wait(self, timeout: Option<Duration>) -> WaitOutcome<T> {
        match timeout {
            None => match self.receiver.recv() {
                Ok(notification) => WaitOutcome::Notified(notification),
                Err(_) => WaitOutcome::Closed,
            },
            Some(timeout) => match self.receiver.recv_timeout(timeout) {
                Ok(notification) => WaitOutcome::Notified(notification),
                Err(RecvTimeoutError::Timeout) => WaitOutcome::TimedOut,
                Err(RecvTimeoutError::Disconnected) => WaitOutcome::Closed,
            },
        }
    }
}

impl<T> Drop for Waiter<T> {
    fn drop(&mut self) {
        self.hub.cancel(&self.identity, self.id);
    }
}

impl<T> fmt::Debug for Waiter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Waiter")
            .field("identity", &self.identity)
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn publish_releases_all_waiters_with_same_record() {
        let hub = NotificationHub::new();
        let record = Stored::new("v2".to_string());

        let first = hub.register(record.identity());
        let second = hub.register(record.identity());
        assert_eq!(hub.pending(&record.identity()), 2);

        assert_eq!(hub.publish(&record), 2);
        assert_eq!(hub.pending(&record.identity()), 0);

        for waiter in [first, second] {
            assert_eq!(
                waiter.wait(Some(Duration::from_secs(1))),
                WaitOutcome::Notified(Notification::Committed(record.clone()))
            );
        }
    }

    #[test]
    fn publish_only_touches_its_identity() {
        let hub = NotificationHub::new();
        let a = Stored::new(1u32);
        let b = Stored::new(2u32);

        let _wa = hub.register(a.identity());
        let wb = hub.register(b.identity());

        assert_eq!(hub.publish(&a), 1);
        assert_eq!(hub.pending(&b.identity()), 1);
        assert_eq!(wb.wait(Some(Duration::from_millis(10))), WaitOutcome::TimedOut);
    }

    #[test]
    fn dropped_waiter_unregisters_itself() {
        let hub: Arc<NotificationHub<u32>> = NotificationHub::new();
        let identity = Identity::new();

        {
            let _waiter = hub.register(identity);
            assert_eq!(hub.pending(&identity), 1);
        }

        assert_eq!(hub.pending(&identity), 0);
        assert_eq!(hub.total_pending(), 0);
    }

    #[test]
    fn timed_out_waiter_unregisters_itself() {
        let hub: Arc<NotificationHub<u32>> = NotificationHub::new();
        let identity = Identity::new();

        let waiter = hub.register(identity);
        assert_eq!(waiter.wait(Some(Duration::from_millis(5))), WaitOutcome::TimedOut);
        assert_eq!(hub.pending(&identity), 0);
    }

    #[test]
    fn retire_signals_deletion() {
        let hub: Arc<NotificationHub<u32>> = NotificationHub::new();
        let identity = Identity::new();
        let waiter = hub.register(identity);

        assert_eq!(hub.retire(identity), 1);
        assert_eq!(
            waiter.wait(None),
            WaitOutcome::Notified(Notification::Deleted(identity))
        );
    }

    #[test]
    fn shutdown_closes_pending_and_future_waiters() {
        let hub: Arc<NotificationHub<u32>> = NotificationHub::new();
        let identity = Identity::new();
        let pending = hub.register(identity);

        hub.shutdown();
        hub.shutdown();

        assert!(hub.is_shut_down());
        assert_eq!(pending.wait(None), WaitOutcome::Closed);
        assert_eq!(hub.register(identity).wait(None), WaitOutcome::Closed);
        assert_eq!(hub.total_pending(), 0);
    }

    #[test]
    fn blocked_waiter_wakes_from_another_thread() {
        let hub = NotificationHub::new();
        let record = Stored::new(42u64);
        let waiter = hub.register(record.identity());

        let publisher = {
            let hub = Arc::clone(&hub);
            let record = record.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                hub.publish(&record)
            })
        };

        assert_eq!(
            waiter.wait(Some(Duration::from_secs(5))),
            WaitOutcome::Notified(Notification::Committed(record))
        );
        assert_eq!(publisher.join().unwrap(), 1);
    }

    #[test]
    fn waiter_ids_are_unique() {
        let hub: Arc<NotificationHub<u32>> = NotificationHub::new();
        let identity = Identity::new();
        let a = hub.register(identity);
        let b = hub.register(identity);
        assert_ne!(a.id(), b.id());
        assert_eq!(a.identity(), identity);
    }
}
