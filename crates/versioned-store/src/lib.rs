//! # Versioned Store
//!
//! Versioned records with optimistic concurrency and long-poll change
//! notification, over any keyed backing store.
//!
//! ## Principles
//!
//! - **A version is never rewritten** - `(identity, version)` determines the value
//! - **Every mutation is a CAS** - A stale version fails with the current record
//! - **Waiters see every commit** - Registration and commit share a lock
//! - **Deletion releases waiters** - Pending long-polls end with `NotFound`
//!
//! ## Architecture
//!
//! ```text
//! WRITE:
//!   lock(identity) → conditional replace → publish to waiters → unlock
//!
//! LONG-POLL:
//!   lock(identity) → register → re-check → unlock → wait
//! ```
//!
//! ## Example
//!
//! ```rust
//! use versioned_store::{MemoryBackend, Storage, VersionedStore};
//!
//! let store = VersionedStore::new(MemoryBackend::new());
//!
//! let v1 = store.save(vec!["hello".to_string()]).unwrap();
//! let v2 = store
//!     .update_with(&v1.identity(), |lines| {
//!         let mut lines = lines.clone();
//!         lines.insert(0, "world".to_string());
//!         lines
//!     })
//!     .unwrap();
//!
//! // The stale version now conflicts.
//! let err = store.update(&v1, vec![]).unwrap_err();
//! assert_eq!(err.current(), Some(&v2));
//!
//! // A caller behind the current version returns immediately.
//! let seen = store
//!     .wait_next_version(&v1.identity(), &v1.version(), None)
//!     .unwrap();
//! assert_eq!(seen, Some(v2));
//! ```
//!
//! ## Crate Structure
//!
//! - [`token`] - Identity and version tokens
//! - [`stored`] - The versioned record wrapper
//! - [`backend`] - Backing store contract and the in-memory store
//! - [`store`] - The `Storage` trait and `VersionedStore`
//! - [`retry`] - Retry policy for the optimistic loop
//! - [`hub`] - Long-poll notification hub

pub mod backend;
mod error;
pub mod hub;
pub mod retry;
pub mod store;
pub mod stored;
pub mod token;

#[cfg(test)]
mod tests;

pub use backend::{BackingStore, CasOutcome, MemoryBackend};
pub use error::{BackendError, StorageError, StorageResult};
pub use hub::{Notification, NotificationHub, WaitOutcome, Waiter, WaiterId};
pub use retry::{Backoff, RetryPolicy};
pub use store::{Storage, VersionedStore};
pub use stored::Stored;
pub use token::{Identity, TokenParseError, Version};
