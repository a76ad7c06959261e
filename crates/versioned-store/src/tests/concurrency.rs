//! Concurrency tests for the commit path.
//!
//! Covered:
//! - Racing updates from one base version: exactly one wins
//! - Losers receive the winning record in their conflict
//! - Racing retry loops lose no writes
//! - Stale deletes leave the record in place

use super::memory_store;
use crate::{Backoff, MemoryBackend, RetryPolicy, Storage, StorageError, VersionedStore};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

const RACERS: usize = 16;

#[test]
fn racing_updates_from_one_version_have_one_winner() {
    let store = Arc::new(memory_store::<String>());
    let base = store.save("base".to_string()).unwrap();
    let barrier = Arc::new(Barrier::new(RACERS));

    let handles: Vec<_> = (0..RACERS)
        .map(|i| {
            let store = Arc::clone(&store);
            let base = base.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                store.update(&base, format!("writer {i}"))
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    let winners: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    assert_eq!(winners.len(), 1);
    let winner = winners[0].clone();

    for result in &results {
        match result {
            Ok(record) => assert_eq!(record, &winner),
            Err(err) => assert_eq!(err.current(), Some(&winner)),
        }
    }
    assert_eq!(store.get(&base.identity()).unwrap(), winner);
}

#[test]
fn racing_retry_loops_lose_no_appends() {
    let store = Arc::new(memory_store::<Vec<usize>>());
    let list = store.save(Vec::new()).unwrap();
    let barrier = Arc::new(Barrier::new(RACERS));

    let handles: Vec<_> = (0..RACERS)
        .map(|i| {
            let store = Arc::clone(&store);
            let barrier = Arc::clone(&barrier);
            let identity = list.identity();
            thread::spawn(move || {
                barrier.wait();
                store
                    .update_with(&identity, |items| {
                        let mut items = items.clone();
                        items.insert(0, i);
                        items
                    })
                    .unwrap()
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    let mut items = store.get(&list.identity()).unwrap().into_value();
    assert_eq!(items.len(), RACERS);
    items.sort_unstable();
    assert_eq!(items, (0..RACERS).collect::<Vec<_>>());
}

#[test]
fn two_appenders_from_same_base_both_land() {
    let store = Arc::new(memory_store::<Vec<&'static str>>());
    let base = store.save(Vec::new()).unwrap();
    let barrier = Arc::new(Barrier::new(2));

    let handles: Vec<_> = ["first", "second"]
        .into_iter()
        .map(|entry| {
            let store = Arc::clone(&store);
            let base = base.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                store.update_from(base, |items| {
                    let mut items = items.clone();
                    items.insert(0, entry);
                    items
                })
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap().unwrap();
    }

    let items = store.get(&base.identity()).unwrap().into_value();
    assert_eq!(items.len(), 2);
    assert!(items.contains(&"first"));
    assert!(items.contains(&"second"));
}

#[test]
fn contended_loops_with_backoff_still_converge() {
    let policy = RetryPolicy::unbounded()
        .with_backoff(Backoff::new(Duration::from_micros(50), Duration::from_millis(2)));
    let store = Arc::new(VersionedStore::new(MemoryBackend::new()).with_retry_policy(policy));
    let counter = store.save(0u64).unwrap();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let store = Arc::clone(&store);
            let identity = counter.identity();
            thread::spawn(move || {
                for _ in 0..25 {
                    store.update_with(&identity, |n| n + 1).unwrap();
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(*store.get(&counter.identity()).unwrap().value(), 200);
}

#[test]
fn stale_delete_leaves_record_retrievable() {
    let store = memory_store::<u8>();
    let v1 = store.save(1).unwrap();
    let v2 = store.update(&v1, 2).unwrap();

    let err = store.delete(&v1).unwrap_err();
    assert!(matches!(err, StorageError::Conflict(ref current) if **current == v2));
    assert_eq!(store.get(&v1.identity()).unwrap(), v2);
}

#[test]
fn racing_deletes_have_one_winner() {
    let store = Arc::new(memory_store::<u8>());
    let record = store.save(9).unwrap();
    let barrier = Arc::new(Barrier::new(RACERS));

    let handles: Vec<_> = (0..RACERS)
        .map(|_| {
            let store = Arc::clone(&store);
            let record = record.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                store.delete(&record)
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(StorageError::is_not_found));
}
