//! # InChat
//!
//! A multi-user chat engine whose channels are event-sourced aggregates over
//! versioned SQLite records.
//!
//! ## Principles
//!
//! - **Every aggregate is versioned** - Users, accounts, sessions, channels and
//!   events all go through the same CAS contract
//! - **Channels hold references** - Message content lives in its own event record
//! - **Observers are woken by commits** - Editing an event bumps its channel
//! - **Authorization is the caller's** - Roles are recorded, never enforced here
//!
//! ## Architecture
//!
//! ```text
//! POST:
//!   save event → prepend reference to channel (retry on conflict) → wake waiters
//!
//! EDIT / DELETE:
//!   CAS on event → touch channel → wake waiters
//!
//! READ:
//!   channel → resolve each event reference (oldest first)
//! ```
//!
//! ## Example
//!
//! ```rust
//! use inchat::{InChat, InChatOptions, ScryptCredentials};
//!
//! let chat = InChat::in_memory(InChatOptions::default())
//!     .unwrap()
//!     .with_credentials(ScryptCredentials::new(4));
//!
//! let alice = chat.register("alice", "Secret-Pass1", "Secret-Pass1").unwrap();
//! let account = alice.account.identity();
//!
//! let channel = chat.create_channel(&account, "general").unwrap();
//! chat.post_message(&account, &channel.identity(), "hello").unwrap();
//!
//! let view = chat.materialize_channel(&channel.identity()).unwrap();
//! assert_eq!(view.events.len(), 2); // join + message
//! ```
//!
//! ## Crate Structure
//!
//! - [`types`] - Domain types
//! - [`channel`] - The event-sourced channel log
//! - [`credentials`] - Password policy
//! - [`sqlite`] - SQLite tables implementing the backing-store contract

pub mod channel;
pub mod credentials;
mod error;
mod inchat;
pub mod sqlite;
pub mod types;

#[cfg(test)]
mod tests;

pub use crate::inchat::{InChat, InChatOptions, Registered};
pub use channel::{Appended, ChannelLog, ChannelView, ResolvedEvent};
pub use credentials::{CredentialError, CredentialPolicy, ScryptCredentials};
pub use error::{InChatError, InChatResult, UserFacing};
pub use sqlite::{Database, DatabaseError, DatabaseResult};
pub use types::{
    Account, Channel, ChannelRole, Event, EventKind, EventRef, InvalidUserName, Membership,
    Session, User, UserName,
};
