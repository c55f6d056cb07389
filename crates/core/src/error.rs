//! Error types for the Eddy engine.
//!
//! Errors fall into three classes (see [`ErrorKind`]): configuration errors
//! raised while a statement or dataset is being created, runtime errors raised
//! while one event is evaluated for one statement, and fatal errors that
//! indicate a broken internal invariant.

use crate::types::DataType;
use thiserror::Error;

/// Result type alias for Eddy operations.
pub type Result<T> = core::result::Result<T, Error>;

/// Classification of an [`Error`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Raised at creation time; the statement or dataset is never activated.
    Configuration,
    /// Raised while evaluating one event; isolated to the statement.
    Runtime,
    /// Internal invariant breach; never swallowed.
    Fatal,
}

/// Error types for Eddy operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    /// Invalid configuration supplied at creation time.
    #[error("configuration error: {message}")]
    Config { message: String },

    /// A field reference could not be resolved.
    #[error("unknown field '{field}' in {scope}")]
    UnknownField { scope: String, field: String },

    /// A field reference matched more than one stream.
    #[error("ambiguous field '{field}', qualify it with a stream alias")]
    AmbiguousField { field: String },

    /// A stream alias could not be resolved.
    #[error("unknown stream '{name}'")]
    UnknownStream { name: String },

    /// No event type is registered under this name.
    #[error("unknown event type '{name}'")]
    UnknownEventType { name: String },

    /// No dataset is registered under this name.
    #[error("unknown dataset '{name}'")]
    UnknownDataset { name: String },

    /// A name is already taken.
    #[error("{kind} '{name}' already exists")]
    DuplicateName { kind: &'static str, name: String },

    /// A lookup by identity found nothing.
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: u64 },

    /// Two compared values have incompatible types.
    #[error("type mismatch on '{field}': expected {expected:?}, got {got:?}")]
    TypeMismatch {
        field: String,
        expected: DataType,
        got: DataType,
    },

    /// The operation is not valid in the current state.
    #[error("invalid operation: {message}")]
    InvalidOperation { message: String },

    /// An internal concurrency invariant was violated.
    #[error("concurrency violation: {message}")]
    ConcurrencyViolation { message: String },
}

impl Error {
    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
        }
    }

    /// Creates an unknown field error.
    pub fn unknown_field(scope: impl Into<String>, field: impl Into<String>) -> Self {
        Error::UnknownField {
            scope: scope.into(),
            field: field.into(),
        }
    }

    /// Creates a type mismatch error.
    pub fn type_mismatch(field: impl Into<String>, expected: DataType, got: DataType) -> Self {
        Error::TypeMismatch {
            field: field.into(),
            expected,
            got,
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Error::InvalidOperation {
            message: message.into(),
        }
    }

    /// Creates a concurrency violation error.
    pub fn concurrency_violation(message: impl Into<String>) -> Self {
        Error::ConcurrencyViolation {
            message: message.into(),
        }
    }

    /// Returns the class of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::TypeMismatch { .. } | Error::NotFound { .. } | Error::InvalidOperation { .. } => {
                ErrorKind::Runtime
            }
            Error::ConcurrencyViolation { .. } => ErrorKind::Fatal,
            _ => ErrorKind::Configuration,
        }
    }

    /// Returns true if this error must not be isolated to a single statement.
    #[inline]
    pub fn is_fatal(&self) -> bool {
        self.kind() == ErrorKind::Fatal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::type_mismatch("p00", DataType::Int64, DataType::String);
        assert_eq!(
            err.to_string(),
            "type mismatch on 'p00': expected Int64, got String"
        );

        let err = Error::unknown_field("delivery", "dummy");
        assert_eq!(err.to_string(), "unknown field 'dummy' in delivery");
    }

    #[test]
    fn test_error_kind() {
        assert_eq!(Error::config("bad").kind(), ErrorKind::Configuration);
        assert_eq!(
            Error::unknown_field("s0", "x").kind(),
            ErrorKind::Configuration
        );
        assert_eq!(
            Error::type_mismatch("a", DataType::Int32, DataType::Boolean).kind(),
            ErrorKind::Runtime
        );
        assert!(Error::concurrency_violation("re-entrant write").is_fatal());
    }
}
