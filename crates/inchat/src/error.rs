//! InChat error types.

use crate::credentials::CredentialError;
use crate::sqlite::DatabaseError;
use crate::types::{InvalidUserName, UserName};
use thiserror::Error;
use versioned_store::{BackendError, Identity, StorageError, Version};

/// How a failure should be presented to an end user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserFacing {
    /// Someone else changed the resource first; try the action again.
    RetryAction,
    /// The resource no longer exists.
    Gone,
    /// The service cannot complete the request right now.
    Unavailable,
    /// The request itself was refused.
    Rejected,
}

/// InChat error type.
#[derive(Error, Debug)]
pub enum InChatError {
    #[error("version conflict on {identity}: current version is {current}")]
    Conflict { identity: Identity, current: Version },

    #[error("no live record for {0}")]
    NotFound(Identity),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("service is shutting down")]
    Shutdown,

    #[error("user name {0} is already taken")]
    UsernameTaken(UserName),

    #[error("invalid user name or password")]
    InvalidCredentials,

    #[error("passwords do not match")]
    PasswordMismatch,

    #[error("password rejected: {0}")]
    WeakPassword(String),

    #[error("session {0} has expired")]
    SessionExpired(Identity),

    #[error(transparent)]
    InvalidUserName(#[from] InvalidUserName),

    #[error("event {0} is not a message")]
    NotAMessage(Identity),

    #[error("the owner of channel {0} cannot be reassigned")]
    OwnerRoleLocked(Identity),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error(transparent)]
    Credentials(#[from] CredentialError),
}

impl InChatError {
    pub fn user_facing(&self) -> UserFacing {
        match self {
            Self::Conflict { .. } => UserFacing::RetryAction,
            Self::NotFound(_) | Self::SessionExpired(_) => UserFacing::Gone,
            Self::Backend(_) | Self::Database(_) | Self::Credentials(_) | Self::Shutdown => {
                UserFacing::Unavailable
            }
            Self::UsernameTaken(_)
            | Self::InvalidCredentials
            | Self::PasswordMismatch
            | Self::WeakPassword(_)
            | Self::InvalidUserName(_)
            | Self::NotAMessage(_)
            | Self::OwnerRoleLocked(_) => UserFacing::Rejected,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl<T> From<StorageError<T>> for InChatError {
    fn from(err: StorageError<T>) -> Self {
        match err {
            StorageError::Conflict(current) => Self::Conflict {
                identity: current.identity(),
                current: current.version(),
            },
            StorageError::NotFound(identity) => Self::NotFound(identity),
            StorageError::Backend(err) => Self::Backend(err),
            StorageError::Shutdown => Self::Shutdown,
        }
    }
}

/// Result type alias using InChatError.
pub type InChatResult<T> = Result<T, InChatError>;
