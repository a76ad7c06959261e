//! Long-poll tests over SQLite-backed channels.

use super::{engine, register};
use crate::InChatError;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const GENEROUS: Option<Duration> = Some(Duration::from_secs(10));

fn await_waiters(chat: &crate::InChat, count: usize) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while chat.channel_log().channels().hub().total_pending() < count {
        assert!(Instant::now() < deadline, "waiters never registered");
        thread::sleep(Duration::from_millis(1));
    }
}

#[test]
fn watcher_wakes_on_post() {
    let chat = Arc::new(engine());
    let alice = register(&chat, "alice");
    let account = alice.account.identity();
    let channel = chat.create_channel(&account, "general").unwrap();

    let watcher = {
        let chat = Arc::clone(&chat);
        let (id, version) = (channel.identity(), channel.version());
        thread::spawn(move || chat.wait_next_channel_version(&id, &version, GENEROUS))
    };

    await_waiters(&chat, 1);
    let posted = chat
        .post_message(&account, &channel.identity(), "wake up")
        .unwrap();

    let seen = watcher.join().unwrap().unwrap();
    assert_eq!(seen, Some(posted.channel));
}

#[test]
fn watcher_wakes_on_edit() {
    let chat = Arc::new(engine());
    let alice = register(&chat, "alice");
    let account = alice.account.identity();
    let channel = chat.create_channel(&account, "general").unwrap();
    let posted = chat
        .post_message(&account, &channel.identity(), "draft")
        .unwrap();

    let watcher = {
        let chat = Arc::clone(&chat);
        let (id, version) = (channel.identity(), posted.channel.version());
        thread::spawn(move || chat.wait_next_channel_version(&id, &version, GENEROUS))
    };

    await_waiters(&chat, 1);
    chat.edit_message(&channel.identity(), &posted.event.identity(), "final")
        .unwrap();

    let seen = watcher.join().unwrap().unwrap().unwrap();
    assert_ne!(seen.version(), posted.channel.version());
    assert_eq!(seen.value(), posted.channel.value());
}

#[test]
fn stale_watcher_returns_immediately() {
    let chat = engine();
    let alice = register(&chat, "alice");
    let account = alice.account.identity();
    let channel = chat.create_channel(&account, "general").unwrap();
    let posted = chat
        .post_message(&account, &channel.identity(), "already here")
        .unwrap();

    let started = Instant::now();
    let seen = chat
        .wait_next_channel_version(&channel.identity(), &channel.version(), None)
        .unwrap();
    assert_eq!(seen, Some(posted.channel));
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[test]
fn quiet_channel_times_out() {
    let chat = engine();
    let alice = register(&chat, "alice");
    let channel = chat
        .create_channel(&alice.account.identity(), "quiet")
        .unwrap();

    let seen = chat
        .wait_next_channel_version(
            &channel.identity(),
            &channel.version(),
            Some(Duration::from_millis(20)),
        )
        .unwrap();
    assert_eq!(seen, None);
    assert_eq!(chat.channel_log().channels().hub().total_pending(), 0);
}

#[test]
fn deleting_the_channel_releases_watchers() {
    let chat = Arc::new(engine());
    let alice = register(&chat, "alice");
    let channel = chat
        .create_channel(&alice.account.identity(), "doomed")
        .unwrap();

    let watcher = {
        let chat = Arc::clone(&chat);
        let (id, version) = (channel.identity(), channel.version());
        thread::spawn(move || chat.wait_next_channel_version(&id, &version, GENEROUS))
    };

    await_waiters(&chat, 1);
    chat.channel_log().delete_channel(&channel.identity()).unwrap();

    let err = watcher.join().unwrap().unwrap_err();
    assert!(matches!(err, InChatError::NotFound(id) if id == channel.identity()));
}

#[test]
fn shutdown_releases_watchers() {
    let chat = Arc::new(engine());
    let alice = register(&chat, "alice");
    let channel = chat
        .create_channel(&alice.account.identity(), "general")
        .unwrap();

    let watcher = {
        let chat = Arc::clone(&chat);
        let (id, version) = (channel.identity(), channel.version());
        thread::spawn(move || chat.wait_next_channel_version(&id, &version, GENEROUS))
    };

    await_waiters(&chat, 1);
    chat.shutdown();

    assert!(matches!(
        watcher.join().unwrap(),
        Err(InChatError::Shutdown)
    ));
}
