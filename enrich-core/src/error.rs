//! Error types for ENRICH operations

use crate::{CellKey, ColumnId, ColumnKind, EntityType, RowId};
use thiserror::Error;
use uuid::Uuid;

/// Structural misuse of the grid. Rejected before any mutation happens.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GridError {
    #[error("Column not found: {id}")]
    ColumnNotFound { id: ColumnId },

    #[error("Row not found: {id}")]
    RowNotFound { id: RowId },

    #[error("Cell not found: {key}")]
    CellNotFound { key: CellKey },

    #[error("Column {column_id} is a {kind} column; only static_field cells can be edited")]
    CellNotEditable { column_id: ColumnId, kind: ColumnKind },

    #[error("Index {index} out of range for {len} columns")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("Config for a {got} column supplied where {expected} was requested")]
    KindMismatch { expected: ColumnKind, got: ColumnKind },

    #[error("Invalid config for column '{column}': {reason}")]
    InvalidColumnConfig { column: String, reason: String },

    #[error("Workspace has no rows")]
    NoRows,

    #[error("Export failed: {reason}")]
    ExportFailed { reason: String },
}

/// Storage layer errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Entity not found: {entity_type:?} with id {id}")]
    NotFound { entity_type: EntityType, id: Uuid },

    #[error("Insert failed for {entity_type:?}: {reason}")]
    InsertFailed { entity_type: EntityType, reason: String },

    #[error("Update failed for {entity_type:?} with id {id}: {reason}")]
    UpdateFailed {
        entity_type: EntityType,
        id: Uuid,
        reason: String,
    },

    #[error("Delete failed for {entity_type:?} with id {id}: {reason}")]
    DeleteFailed {
        entity_type: EntityType,
        id: Uuid,
        reason: String,
    },

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

/// Errors raised by external collaborators (model, enrichment, HTTP, scoring).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    #[error("No {capability} provider configured")]
    ProviderNotConfigured { capability: String },

    #[error("Request to {provider} failed with status {status}: {message}")]
    RequestFailed {
        provider: String,
        status: i32,
        message: String,
    },

    #[error("Rate limited by {provider}, retry after {retry_after_ms}ms")]
    RateLimited {
        provider: String,
        retry_after_ms: i64,
    },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("{provider} did not answer within {timeout_ms}ms")]
    TimedOut { provider: String, timeout_ms: u64 },
}

impl ProviderError {
    /// Whether re-running the cell later might succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::RateLimited { .. } | ProviderError::TimedOut { .. } => true,
            ProviderError::RequestFailed { status, .. } => *status == 0 || *status >= 500,
            ProviderError::ProviderNotConfigured { .. } | ProviderError::InvalidResponse { .. } => {
                false
            }
        }
    }
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Failed to read config file {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("Failed to parse config TOML: {reason}")]
    Parse { reason: String },
}

/// Formula parse and evaluation errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FormulaError {
    #[error("Unexpected character '{ch}' at position {position}")]
    UnexpectedChar { ch: char, position: usize },

    #[error("Unterminated string starting at position {position}")]
    UnterminatedString { position: usize },

    #[error("Unterminated placeholder starting at position {position}")]
    UnterminatedPlaceholder { position: usize },

    #[error("Unexpected {found} at position {position}")]
    UnexpectedToken { found: String, position: usize },

    #[error("Unexpected end of expression")]
    UnexpectedEnd,

    #[error("Unknown function: {name}")]
    UnknownFunction { name: String },

    #[error("{name} expects {expected} arguments, got {got}")]
    Arity {
        name: String,
        expected: String,
        got: usize,
    },

    #[error("'{value}' is not a number")]
    NotANumber { value: String },

    #[error("Division by zero")]
    DivisionByZero,
}

/// Master error type for all ENRICH errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EnrichError {
    #[error("Grid error: {0}")]
    Grid(#[from] GridError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Formula error: {0}")]
    Formula(#[from] FormulaError),
}

/// Result type alias for ENRICH operations.
pub type EnrichResult<T> = Result<T, EnrichError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EntityIdType;

    #[test]
    fn test_from_conversions() {
        let err: EnrichError = GridError::NoRows.into();
        assert!(matches!(err, EnrichError::Grid(GridError::NoRows)));

        let err: EnrichError = FormulaError::DivisionByZero.into();
        assert_eq!(err.to_string(), "Formula error: Division by zero");
    }

    #[test]
    fn test_not_editable_message_names_kind() {
        let err = GridError::CellNotEditable {
            column_id: ColumnId::nil(),
            kind: ColumnKind::Formula,
        };
        assert!(err.to_string().contains("formula column"));
    }

    #[test]
    fn test_provider_retryable() {
        let rate = ProviderError::RateLimited {
            provider: "together".into(),
            retry_after_ms: 1000,
        };
        assert!(rate.is_retryable());

        let bad_request = ProviderError::RequestFailed {
            provider: "together".into(),
            status: 400,
            message: "bad".into(),
        };
        assert!(!bad_request.is_retryable());

        let server = ProviderError::RequestFailed {
            provider: "together".into(),
            status: 503,
            message: "down".into(),
        };
        assert!(server.is_retryable());
    }
}
