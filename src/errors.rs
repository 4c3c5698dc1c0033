//! Error hierarchy for the document store and its synchronization core.
//!
//! Errors are grouped by the layer that raises them: key/storage validation,
//! the locking primitive, lifecycle transitions and runtime plumbing.

use std::time::Duration;

use config::ConfigError;
use tokio::task::JoinError;

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Path validation, tier and data failures
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Misuse of the per-path locking primitive
    #[error(transparent)]
    Lock(#[from] LockError),

    /// Illegal lifecycle transitions
    #[error(transparent)]
    StateTransition(#[from] StateTransitionError),

    /// Runtime plumbing failures (bus, deadlines, background tasks)
    #[error(transparent)]
    System(#[from] SystemError),

    /// Configuration validation failures
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A patch could not be applied to a view
    #[error(transparent)]
    Patch(#[from] PatchError),

    /// A filter hook rejected the operation
    #[error("Filter rejected operation: {0}")]
    Filter(String),

    /// Unrecoverable failures requiring process termination
    #[error("Fatal error: {0}")]
    Fatal(String),
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Invalid pattern: {0}")]
    InvalidPattern(String),

    #[error("Invalid range: from({from}) > to({to})")]
    InvalidRange { from: u64, to: u64 },

    #[error("Invalid limit: {0}")]
    InvalidLimit(i64),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Glob path required: {0}")]
    GlobRequired(String),

    #[error("Glob path not allowed: {0}")]
    GlobNotAllowed(String),

    /// Empty payload, or payload that is not a JSON document
    #[error("Invalid storage data")]
    InvalidStorageData,

    /// Patch produced no field change
    #[error("No changes to apply on {0}")]
    Noop(String),

    /// Neither a memory nor a durable tier was configured
    #[error("All storage layers are nil")]
    AllLayersNil,

    /// Embedded database errors
    #[error("Embedded database error: {0}")]
    DbError(String),

    /// Serialization failures for persisted objects
    #[error(transparent)]
    BincodeError(#[from] bincode::Error),

    #[error(transparent)]
    IoError(#[from] std::io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("Lock not found: {0}")]
    LockNotFound(String),

    #[error("Can't lock a glob path: {0}")]
    CantLockGlob(String),
}

#[derive(Debug, thiserror::Error)]
pub enum PatchError {
    #[error("Patch target does not exist: {0}")]
    MissingTarget(String),

    #[error("Patch target is not a container: {0}")]
    NotContainer(String),

    #[error("Invalid array index in {0}")]
    InvalidIndex(String),
}

#[derive(Debug, thiserror::Error)]
pub enum StateTransitionError {
    #[error("Invalid state transition from {from} to {to}")]
    InvalidTransition {
        from: &'static str,
        to: &'static str,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum SystemError {
    /// Event bus is not started or already closed
    #[error("Event bus is closed")]
    BusClosed,

    /// Node is not accepting work
    #[error("Node is not running")]
    NotRunning,

    /// Operation exceeded its deadline
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Background task failed: {0}")]
    TaskFailed(#[from] JoinError),

    /// Broadcast message or view encoding failures
    #[error("JSON encoding failed: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Patch produced no change. Callers treat this as success without broadcast.
    pub fn is_noop(&self) -> bool {
        matches!(self, Error::Storage(StorageError::Noop(_)))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Storage(StorageError::NotFound(_)))
    }

    /// Errors caused by malformed input or misuse; never retried.
    pub fn is_client_error(&self) -> bool {
        match self {
            Error::Storage(e) => matches!(
                e,
                StorageError::InvalidPath(_)
                    | StorageError::InvalidPattern(_)
                    | StorageError::InvalidRange { .. }
                    | StorageError::InvalidLimit(_)
                    | StorageError::NotFound(_)
                    | StorageError::GlobRequired(_)
                    | StorageError::GlobNotAllowed(_)
                    | StorageError::InvalidStorageData
                    | StorageError::Noop(_)
            ),
            Error::Lock(_) | Error::Filter(_) => true,
            _ => false,
        }
    }
}

impl From<sled::Error> for Error {
    fn from(e: sled::Error) -> Self {
        Error::Storage(StorageError::DbError(e.to_string()))
    }
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::Storage(StorageError::BincodeError(e))
    }
}

impl From<JoinError> for Error {
    fn from(e: JoinError) -> Self {
        Error::System(SystemError::TaskFailed(e))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::System(SystemError::Json(e))
    }
}
