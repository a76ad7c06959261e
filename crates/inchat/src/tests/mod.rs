//! Scenario tests for the InChat engine.
//!
//! - `accounts.rs`   - Registration, login, sessions
//! - `channels.rs`   - Creating, joining, posting, editing, roles
//! - `long_poll.rs`  - Waiting on channel versions across threads
//! - `durability.rs` - Reopening an on-disk database

mod accounts;
mod long_poll;

use crate::{InChat, InChatOptions, ScryptCredentials, Registered};

pub(crate) const PASSWORD: &str = "Open-Sesame1";

/// An in-memory engine with cheap password hashing.
pub(crate) fn engine() -> InChat {
    InChat::in_memory(InChatOptions::default())
        .unwrap()
        .with_credentials(fast_hashing())
}

pub(crate) fn fast_hashing() -> ScryptCredentials {
    ScryptCredentials::new(4)
}

pub(crate) fn register(chat: &InChat, name: &str) -> Registered {
    chat.register(name, PASSWORD, PASSWORD).unwrap()
}

/// Register, create a channel, post, read back.
#[test]
fn basic_workflow() {
    let chat = engine();
    let alice = register(&chat, "alice");
    let account = alice.account.identity();

    let channel = chat.create_channel(&account, "general").unwrap();
    let posted = chat
        .post_message(&account, &channel.identity(), "Hello")
        .unwrap();

    let view = chat.materialize_channel(&channel.identity()).unwrap();
    assert_eq!(view.channel, posted.channel);
    assert_eq!(view.events.len(), 2);

    let last = view.events[1].live().unwrap();
    assert_eq!(last.value().text(), Some("Hello"));
    assert_eq!(last.value().sender().as_str(), "alice");
}
