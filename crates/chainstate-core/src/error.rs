//! Error types for the versioned store.

use thiserror::Error;

use crate::checkpoint::Checkpoint;

/// Errors decoding a persisted or textual checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CheckpointError {
    #[error("invalid checkpoint length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("invalid checkpoint hex: {0}")]
    InvalidHex(String),
}

/// Errors found while validating a table descriptor at startup.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    #[error("invalid identifier '{0}'")]
    InvalidIdentifier(String),

    #[error("duplicate table '{0}'")]
    DuplicateTable(String),

    #[error("duplicate column '{column}' in table '{table}'")]
    DuplicateColumn { table: String, column: String },

    #[error("table '{0}' has no id column")]
    MissingId(String),

    #[error("invalid id column in table '{table}': {reason}")]
    InvalidId { table: String, reason: String },

    #[error("column name '{column}' in table '{table}' is reserved")]
    ReservedColumn { table: String, column: String },

    #[error("invalid reference on '{table}.{column}': {reason}")]
    InvalidReference {
        table: String,
        column: String,
        reason: String,
    },

    #[error("invalid enum '{name}': {reason}")]
    InvalidEnum { name: String, reason: String },

    #[error("invalid version id '{0}'")]
    InvalidVersionId(String),
}

/// Errors returned by store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// `update` found no current version for the id.
    #[error("record not found: {table} id={id}")]
    RecordNotFound { table: String, id: String },

    /// `create` collided with an open or overlapping version.
    #[error("record already exists: {table} id={id}")]
    RecordAlreadyExists { table: String, id: String },

    /// A write targeted a checkpoint before the latest write on the id.
    #[error("temporal order violation on {table} id={id}: last write at {current}, attempted {attempted}")]
    TemporalOrderViolation {
        table: String,
        id: String,
        current: Checkpoint,
        attempted: Checkpoint,
    },

    /// More than one version matched a point-in-time read. This is a defect.
    #[error("{count} versions of {table} id={id} are valid at {checkpoint}")]
    MultipleRecordsFound {
        table: String,
        id: String,
        checkpoint: Checkpoint,
        count: usize,
    },

    #[error("unknown table '{0}'")]
    UnknownTable(String),

    #[error("invalid data for table '{table}': {reason}")]
    InvalidData { table: String, reason: String },

    #[error("invalid filter on table '{table}': {reason}")]
    InvalidFilter { table: String, reason: String },

    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("storage error: {0}")]
    Storage(String),
}

impl StoreError {
    /// Returns `true` for invariant violations that must abort ingestion.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::MultipleRecordsFound { .. })
    }

    pub(crate) fn invalid_data(table: &str, reason: impl Into<String>) -> Self {
        Self::InvalidData {
            table: table.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid_filter(table: &str, reason: impl Into<String>) -> Self {
        Self::InvalidFilter {
            table: table.to_string(),
            reason: reason.into(),
        }
    }
}
