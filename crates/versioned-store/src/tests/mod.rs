//! Scenario tests for the versioned store.
//!
//! - `concurrency.rs` - Racing CAS updates, deletes, and retry loops
//! - `long_poll.rs`   - Waiting for the next version across threads

mod concurrency;

use crate::{MemoryBackend, Storage, VersionedStore};

pub(crate) type TestStore<T> = VersionedStore<T, MemoryBackend<T>>;

pub(crate) fn memory_store<T: Clone + Send + Sync>() -> TestStore<T> {
    VersionedStore::new(MemoryBackend::new())
}

/// Save, update, read back, delete.
#[test]
fn basic_lifecycle() {
    let store = memory_store::<Vec<u32>>();

    let v1 = store.save(vec![1]).unwrap();
    assert_eq!(store.get(&v1.identity()).unwrap(), v1);

    let v2 = store
        .update_with(&v1.identity(), |v| {
            let mut v = v.clone();
            v.insert(0, 2);
            v
        })
        .unwrap();
    assert_eq!(v2.value(), &vec![2, 1]);
    assert_eq!(store.get(&v1.identity()).unwrap(), v2);

    store.delete(&v2).unwrap();
    assert!(store.get(&v1.identity()).unwrap_err().is_not_found());
    assert!(store.backend().is_empty());
}
