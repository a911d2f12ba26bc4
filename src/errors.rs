//! Error types for the cluster database layer.

use rusqlite::ErrorCode;
use thiserror::Error;

use crate::stmt::StatementCode;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("{entity} not found")]
    NotFound { entity: &'static str },

    /// More rows matched or were affected than a point operation allows.
    #[error("integrity violation: {op} on {entity} touched {rows} rows instead of 1")]
    Integrity {
        entity: &'static str,
        op: &'static str,
        rows: usize,
    },

    #[error("no statement exists for the given {entity} filter: {reason}")]
    UnsupportedFilterShape { entity: &'static str, reason: String },

    #[error("this {entity} already exists")]
    Conflict { entity: &'static str },

    #[error("{op} {entity}: {source}")]
    Storage {
        op: &'static str,
        entity: &'static str,
        #[source]
        source: rusqlite::Error,
    },

    #[error("invariant violated: statement code {0} unregistered")]
    UnregisteredStatement(StatementCode),

    #[error("context cancelled")]
    Cancelled,

    #[error("context deadline exceeded")]
    DeadlineExceeded,

    #[error("invalid value: {0}")]
    Invalid(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

pub type Result<T> = std::result::Result<T, DbError>;

impl DbError {
    pub fn storage(op: &'static str, entity: &'static str, source: rusqlite::Error) -> Self {
        Self::Storage { op, entity, source }
    }

    pub fn unsupported(entity: &'static str, reason: impl Into<String>) -> Self {
        Self::UnsupportedFilterShape {
            entity,
            reason: reason.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Whether the enclosing transaction must not be committed.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Integrity { .. } | Self::UnregisteredStatement(_))
    }
}

/// Unique or primary key violation reported by SQLite.
pub(crate) fn is_unique_violation(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(e, _) => {
            e.code == ErrorCode::ConstraintViolation
                && (e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                    || e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY)
        }
        _ => false,
    }
}

pub(crate) fn is_interrupt(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::OperationInterrupted
    )
}
