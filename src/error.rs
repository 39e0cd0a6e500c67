//! Error types for snowload.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// Classified failure kind attached to every recorded table failure.
///
/// The kind is what lets a reader tell "my schema is wrong" apart from
/// "my connection is wrong" without parsing warehouse messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Source schema could not be mapped; always recovered by text fallback.
    SchemaGeneration,
    /// Reserved keyword or illegal character in an identifier.
    IdentifierConflict,
    /// Table creation gave up after the repair machine stopped.
    CreationFailure,
    /// Table exists but the data transfer failed.
    LoadFailure,
    /// Warehouse unreachable; fatal for the rest of the run.
    ConnectivityFailure,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::SchemaGeneration => "schema generation",
            Self::IdentifierConflict => "identifier conflict",
            Self::CreationFailure => "creation failure",
            Self::LoadFailure => "load failure",
            Self::ConnectivityFailure => "connectivity failure",
        };
        f.write_str(s)
    }
}

/// Which side of the wire a warehouse error came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarehouseErrorKind {
    /// Transport, authentication or server availability problem.
    Connectivity,
    /// The warehouse understood the request and rejected the statement.
    Statement,
}

/// Error returned by a [`crate::warehouse::Warehouse`] backend.
///
/// `message` is the warehouse's own diagnostic text, kept verbatim.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct WarehouseError {
    pub kind: WarehouseErrorKind,
    pub message: String,
    pub sql_state: Option<String>,
}

impl WarehouseError {
    pub fn connectivity(message: impl Into<String>) -> Self {
        Self {
            kind: WarehouseErrorKind::Connectivity,
            message: message.into(),
            sql_state: None,
        }
    }

    pub fn statement(message: impl Into<String>) -> Self {
        Self {
            kind: WarehouseErrorKind::Statement,
            message: message.into(),
            sql_state: None,
        }
    }

    pub fn with_sql_state(mut self, state: impl Into<String>) -> Self {
        self.sql_state = Some(state.into());
        self
    }

    pub fn is_connectivity(&self) -> bool {
        self.kind == WarehouseErrorKind::Connectivity
    }
}

/// The main error type for loader operations.
#[derive(Debug, Error)]
pub enum LoadError {
    /// Source schema could not be turned into DDL.
    #[error("Schema generation error for {table}: {message}")]
    SchemaGeneration { table: String, message: String },

    /// Generated DDL still contains an unsafe identifier.
    #[error("Identifier conflict in {table}: {message}")]
    IdentifierConflict { table: String, message: String },

    /// Could not parse a DDL statement.
    #[error("DDL parse error at position {position}: {message}")]
    DdlParse { position: usize, message: String },

    /// Warehouse unreachable.
    #[error("Warehouse unreachable: {0}")]
    Connectivity(String),

    /// Statement rejected by the warehouse outside of the repair machine.
    #[error("Warehouse error: {0}")]
    Warehouse(String),

    /// Source export layout is unusable.
    #[error("Source error: {0}")]
    Source(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// CSV decoding error.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl LoadError {
    /// Create a DDL parse error at the given position.
    pub fn ddl_parse(position: usize, message: impl Into<String>) -> Self {
        Self::DdlParse {
            position,
            message: message.into(),
        }
    }

    /// Classified kind, when the error maps onto one.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Self::SchemaGeneration { .. } => Some(ErrorKind::SchemaGeneration),
            Self::IdentifierConflict { .. } | Self::DdlParse { .. } => {
                Some(ErrorKind::IdentifierConflict)
            }
            Self::Connectivity(_) => Some(ErrorKind::ConnectivityFailure),
            _ => None,
        }
    }

    /// Only connectivity problems end a run early.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Connectivity(_))
    }
}

impl From<WarehouseError> for LoadError {
    fn from(err: WarehouseError) -> Self {
        match err.kind {
            WarehouseErrorKind::Connectivity => Self::Connectivity(err.message),
            WarehouseErrorKind::Statement => Self::Warehouse(err.message),
        }
    }
}

/// Result type alias for loader operations.
pub type LoadResult<T> = Result<T, LoadError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = LoadError::ddl_parse(5, "expected '('");
        assert_eq!(err.to_string(), "DDL parse error at position 5: expected '('");
    }

    #[test]
    fn test_warehouse_error_conversion() {
        let fatal: LoadError = WarehouseError::connectivity("connection refused").into();
        assert!(fatal.is_fatal());
        assert_eq!(fatal.kind(), Some(ErrorKind::ConnectivityFailure));

        let stmt: LoadError = WarehouseError::statement("syntax error").into();
        assert!(!stmt.is_fatal());
        assert_eq!(stmt.kind(), None);
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(ErrorKind::CreationFailure.to_string(), "creation failure");
    }
}
