//! Error types for the revision store.

use crate::merge::MergeConflict;
use thiserror::Error;

/// Main error type for store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid input. Always raised before anything is mutated.
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("{kind} not found: {key}")]
    NotFound { kind: &'static str, key: String },

    /// Merge or rebase produced conflicts that no processor resolved.
    #[error("Merge aborted with {} conflict(s)", .0.len())]
    Conflict(Vec<MergeConflict>),

    /// The branches involved cannot be merged in their current state.
    #[error("Branch merge failed: {0}")]
    BranchMerge(String),

    #[error("Commit rejected by hook: {0}")]
    HookRejected(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Store is locked by another process")]
    Locked,

    #[error("Store not initialized")]
    NotInitialized,

    #[error("Invalid store format: {0}")]
    InvalidFormat(String),

    #[error("Checksum mismatch: expected {expected}, got {got}")]
    ChecksumMismatch { expected: u32, got: u32 },
}

impl StoreError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        StoreError::BadRequest(message.into())
    }

    pub fn branch_not_found(path: impl Into<String>) -> Self {
        StoreError::NotFound {
            kind: "Branch",
            key: path.into(),
        }
    }

    pub fn commit_not_found(id: impl Into<String>) -> Self {
        StoreError::NotFound {
            kind: "Commit",
            key: id.into(),
        }
    }

    /// Conflicts carried by a `Conflict` error, empty for every other variant.
    pub fn conflicts(&self) -> &[MergeConflict] {
        match self {
            StoreError::Conflict(conflicts) => conflicts,
            _ => &[],
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::encode::Error> for StoreError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for StoreError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        StoreError::Deserialization(e.to_string())
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
