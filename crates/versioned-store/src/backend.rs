//! The backing store contract and an in-memory implementation.
//!
//! A backing store is any durable keyed store that can perform four primitives
//! atomically per identity. The versioned layer never needs anything else.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::error::BackendError;
use crate::stored::Stored;
use crate::token::{Identity, Version};

/// Result of a conditional replace or delete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CasOutcome<T> {
    /// The stored version matched and the change was applied.
    Applied,
    /// The stored version differed; carries the current record.
    Conflict(Stored<T>),
    /// No record exists for the identity.
    Missing,
}

/// Durable keyed storage for one aggregate type.
pub trait BackingStore<T>: Send + Sync {
    /// Persists a brand-new record. Reusing an identity is an error.
    fn persist(&self, record: &Stored<T>) -> Result<(), BackendError>;

    /// Fetches the live record for an identity.
    fn fetch(&self, identity: &Identity) -> Result<Option<Stored<T>>, BackendError>;

    /// Replaces the record at `next.identity()` with `next` if the stored
    /// version equals `expected`.
    fn conditional_replace(
        &self,
        expected: &Version,
        next: &Stored<T>,
    ) -> Result<CasOutcome<T>, BackendError>;

    /// Removes the record if the stored version equals `expected`.
    fn conditional_delete(
        &self,
        identity: &Identity,
        expected: &Version,
    ) -> Result<CasOutcome<T>, BackendError>;
}

/// A backing store held entirely in memory.
#[derive(Debug)]
pub struct MemoryBackend<T> {
    records: RwLock<HashMap<Identity, Stored<T>>>,
}

impl<T> MemoryBackend<T> {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
        }
    }

    /// Number of live records.
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for MemoryBackend<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + Sync> BackingStore<T> for MemoryBackend<T> {
    fn persist(&self, record: &Stored<T>) -> Result<(), BackendError> {
        let mut records = self.records.write();
        if records.contains_key(&record.identity()) {
            return Err(BackendError::new(format!(
                "identity {} already persisted",
                record.identity()
            )));
        }
        records.insert(record.identity(), record.clone());
        Ok(())
    }

    fn fetch(&self, identity: &Identity) -> Result<Option<Stored<T>>, BackendError> {
        Ok(self.records.read().get(identity).cloned())
    }

    fn conditional_replace(
        &self,
        expected: &Version,
        next: &Stored<T>,
    ) -> Result<CasOutcome<T>, BackendError> {
        let mut records = self.records.write();
        match records.get_mut(&next.identity()) {
            None => Ok(CasOutcome::Missing),
            Some(current) if current.version() != *expected => {
                Ok(CasOutcome::Conflict(current.clone()))
            }
            Some(current) => {
                *current = next.clone();
                Ok(CasOutcome::Applied)
            }
        }
    }

    fn conditional_delete(
        &self,
        identity: &Identity,
        expected: &Version,
    ) -> Result<CasOutcome<T>, BackendError> {
        let mut records = self.records.write();
        match records.get(identity) {
            None => return Ok(CasOutcome::Missing),
            Some(current) if current.version() != *expected => {
                return Ok(CasOutcome::Conflict(current.clone()));
            }
            Some(_) => {}
        }
        records.remove(identity);
        Ok(CasOutcome::Applied)
    }
}
