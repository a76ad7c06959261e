//! Error taxonomy for versioned storage.

use crate::stored::Stored;
use crate::token::Identity;
use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A durability or transport failure reported by a backing store.
#[derive(Debug, Error)]
#[error("backing store failure: {message}")]
pub struct BackendError {
    message: String,
    #[source]
    source: Option<BoxError>,
}

impl BackendError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Errors returned by [`Storage`](crate::Storage) operations.
#[derive(Debug, Error)]
pub enum StorageError<T> {
    /// The expected version is stale. Carries the authoritative current
    /// record; retry from it or give up.
    #[error("version conflict on {}: current version is {}", .0.identity(), .0.version())]
    Conflict(Box<Stored<T>>),

    /// No live record exists for the identity, whether it never existed or
    /// was deleted. Retrying the same operation cannot succeed.
    #[error("no live record for {0}")]
    NotFound(Identity),

    #[error(transparent)]
    Backend(#[from] BackendError),

    /// The notification hub was shut down while the caller waited.
    #[error("notification hub shut down")]
    Shutdown,
}

impl<T> StorageError<T> {
    pub fn conflict(current: Stored<T>) -> Self {
        Self::Conflict(Box::new(current))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// The current record carried by a conflict.
    pub fn current(&self) -> Option<&Stored<T>> {
        match self {
            Self::Conflict(current) => Some(current),
            _ => None,
        }
    }
}

/// Result alias for storage operations; the success type defaults to a record.
pub type StorageResult<T, R = Stored<T>> = Result<R, StorageError<T>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_exposes_current_record() {
        let current = Stored::new(3u8);
        let err = StorageError::conflict(current.clone());

        assert!(err.is_conflict());
        assert!(!err.is_not_found());
        assert_eq!(err.current(), Some(&current));
        assert!(err.to_string().contains(&current.version().to_string()));
    }

    #[test]
    fn backend_error_keeps_source() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk gone");
        let err: StorageError<u8> = BackendError::with_source("write failed", io).into();

        let source = std::error::Error::source(&err).map(|s| s.to_string());
        assert_eq!(source.as_deref(), Some("disk gone"));
        assert!(err.current().is_none());
    }
}
