use thiserror::Error;

use crate::record::RecordKind;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KeyError {
    #[error("malformed record key '{key}': expected '<source>+<id>'")]
    Malformed { key: String },
}

/// Failures reported by a record store backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Backend unreachable, out of quota or permission denied.
    #[error("{backend} store unavailable: {reason}")]
    Unavailable {
        backend: &'static str,
        reason: String,
    },

    /// `clear` could not confirm that every record of the kind was removed.
    #[error("clearing {kind} left {remaining} record(s) behind")]
    PartialClear { kind: RecordKind, remaining: usize },

    #[error("stored {kind} record '{key}' does not match schema: {reason}")]
    Codec {
        kind: RecordKind,
        key: String,
        reason: String,
    },

    #[error("invalid {kind} record '{key}': {reason}")]
    InvalidRecord {
        kind: RecordKind,
        key: String,
        reason: String,
    },
}

impl StoreError {
    pub fn unavailable(backend: &'static str, reason: impl Into<String>) -> Self {
        Self::Unavailable {
            backend,
            reason: reason.into(),
        }
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        Self::unavailable("sqlite", err.to_string())
    }
}

/// Error returned by coordinator operations.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Key(#[from] KeyError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;
pub type SyncResult<T> = std::result::Result<T, SyncError>;
