//! The versioned record wrapper.

use crate::token::{Identity, Version};

/// An immutable `{identity, version, value}` triple: the unit of storage.
///
/// A `(identity, version)` pair determines the value. A successful update
/// never rewrites an existing pair; it produces a new record with a fresh
/// version.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Stored<T> {
    identity: Identity,
    version: Version,
    value: T,
}

impl<T> Stored<T> {
    /// Wraps a value with a freshly allocated identity and version.
    pub fn new(value: T) -> Self {
        Self {
            identity: Identity::new(),
            version: Version::new(),
            value,
        }
    }

    /// Rebuilds a record read back from a backing store.
    pub fn from_parts(identity: Identity, version: Version, value: T) -> Self {
        Self {
            identity,
            version,
            value,
        }
    }

    /// Produces the successor record: same identity, fresh version.
    pub fn next_version(&self, value: T) -> Self {
        Self {
            identity: self.identity,
            version: Version::new(),
            value,
        }
    }

    pub fn identity(&self) -> Identity {
        self.identity
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    pub fn into_value(self) -> T {
        self.value
    }

    /// True when both records name the same identity at the same version.
    pub fn same_version<U>(&self, other: &Stored<U>) -> bool {
        self.identity == other.identity && self.version == other.version
    }
}
