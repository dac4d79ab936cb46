//! Error types for strata

use thiserror::Error;

/// Result type alias for strata operations
pub type Result<T> = std::result::Result<T, StrataError>;

/// Errors produced by the store. Variant names mirror the language-neutral
/// taxonomy: table/schema errors, index errors, query-builder errors, and the
/// engine-level conflict signal that auto-commit calls retry on.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StrataError {
    #[error("table already exists: {0}")]
    TableRepeat(String),

    #[error("table not found: {0}")]
    TableNotFound(String),

    #[error("index not supported for field `{field}` on table `{table}`")]
    IdxNotSupport { table: String, field: String },

    #[error("unique index conflict on table `{table}` field `{field}`")]
    IdxUniqueConflict { table: String, field: String },

    #[error("query is invalid: {0}")]
    QueryInvalid(String),

    #[error("row id must be a non-zero `Id` field")]
    RowIdIllegal,

    #[error("key not found")]
    KeyNotFound,

    #[error("value type cannot be used as a sort key")]
    TypeNotBeSort,

    #[error("transaction conflict, retry")]
    Conflict,

    #[error("transaction already discarded")]
    DiscardedTxn,

    #[error("transaction exceeded size limit")]
    TxnTooBig,

    #[error("row serialization error: {0}")]
    Serialization(String),
}

impl StrataError {
    /// Whether an auto-commit call should retry the whole closure for this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StrataError::Conflict)
    }
}
