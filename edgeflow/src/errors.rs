//! Error types for the edgeflow runtime.
//!
//! Pipeline functions report failures as [`FunctionError`] values inside a
//! [`FunctionOutput`](crate::core::FunctionOutput); everything around the
//! pipeline (stores, messaging, configuration) reports through
//! [`EdgeflowError`].

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Broad classification of an error, mapped onto an HTTP status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed or missing input.
    ContractInvalid,
    /// The referenced entity does not exist.
    EntityDoesNotExist,
    /// The entity already exists.
    StatusConflict,
    /// Unexpected internal failure.
    ServerError,
    /// A required collaborator is not available.
    ServiceUnavailable,
    /// Failure talking to an external system.
    Communication,
}

impl ErrorKind {
    /// Returns the HTTP status code for this kind.
    #[must_use]
    pub const fn status_code(self) -> u16 {
        match self {
            Self::ContractInvalid => 400,
            Self::EntityDoesNotExist => 404,
            Self::StatusConflict => 409,
            Self::ServerError => 500,
            Self::ServiceUnavailable | Self::Communication => 503,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ContractInvalid => write!(f, "contract_invalid"),
            Self::EntityDoesNotExist => write!(f, "entity_does_not_exist"),
            Self::StatusConflict => write!(f, "status_conflict"),
            Self::ServerError => write!(f, "server_error"),
            Self::ServiceUnavailable => write!(f, "service_unavailable"),
            Self::Communication => write!(f, "communication"),
        }
    }
}

/// The error marker a pipeline function returns when it stops with a failure.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct FunctionError {
    /// The error classification.
    pub kind: ErrorKind,
    /// Human-readable message.
    pub message: String,
}

impl FunctionError {
    /// Creates a new function error.
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Creates a contract-invalid error.
    #[must_use]
    pub fn contract_invalid(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ContractInvalid, message)
    }

    /// Creates a server error.
    #[must_use]
    pub fn server_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ServerError, message)
    }

    /// The standard error for a function invoked without input.
    #[must_use]
    pub fn no_data(function: &str, pipeline_id: &str) -> Self {
        Self::contract_invalid(format!(
            "function {function} in pipeline '{pipeline_id}': No Data Received"
        ))
    }
}

/// Failure outcome of one pipeline execution.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{error}")]
pub struct MessageError {
    /// The error reported by the failing function.
    pub error: FunctionError,
    /// Status code reported to synchronous callers.
    pub status_code: u16,
}

impl MessageError {
    /// Status code used for function failures.
    pub const FUNCTION_FAILURE: u16 = 500;
    /// Status code used when execution was abandoned at shutdown.
    pub const CANCELLED: u16 = 503;

    /// Creates a message error for a failed function.
    #[must_use]
    pub fn function_failure(error: FunctionError) -> Self {
        Self {
            error,
            status_code: Self::FUNCTION_FAILURE,
        }
    }
}

/// Errors raised by a store-and-forward store client.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The stored object violates its contract.
    #[error("invalid stored object: {0}")]
    Contract(String),

    /// No row with the given id exists.
    #[error("object with id '{0}' does not exist")]
    NotFound(String),

    /// Store-and-forward is disabled.
    #[error("store and forward is disabled")]
    Disabled,

    /// The store has been disconnected.
    #[error("store client is disconnected")]
    Disconnected,

    /// Underlying SQLite failure.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Content blob could not be encoded or decoded.
    #[error("stored content serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Filesystem failure while opening the store.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A blocking store task did not complete.
    #[error("store task failed: {0}")]
    Internal(String),
}

impl StoreError {
    /// Returns the error classification.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Contract(_) => ErrorKind::ContractInvalid,
            Self::NotFound(_) => ErrorKind::EntityDoesNotExist,
            Self::Disabled | Self::Disconnected => ErrorKind::ServiceUnavailable,
            Self::Sqlite(_) | Self::Serialization(_) | Self::Io(_) | Self::Internal(_) => {
                ErrorKind::ServerError
            }
        }
    }
}

/// The main error type for edgeflow operations.
#[derive(Debug, Error)]
pub enum EdgeflowError {
    /// Invalid input or configuration contract.
    #[error("contract invalid: {0}")]
    Contract(String),

    /// A referenced entity was not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// An entity with the same identity already exists.
    #[error("conflict: {0}")]
    Conflict(String),

    /// A pipeline function failed.
    #[error("{0}")]
    Function(#[from] FunctionError),

    /// Store-and-forward storage failure.
    #[error("{0}")]
    Store(#[from] StoreError),

    /// Messaging client failure.
    #[error("messaging error: {0}")]
    Messaging(String),

    /// Configuration failure.
    #[error("configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl EdgeflowError {
    /// Returns the error classification.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Contract(_) | Self::Config(_) | Self::Serialization(_) => {
                ErrorKind::ContractInvalid
            }
            Self::NotFound(_) => ErrorKind::EntityDoesNotExist,
            Self::Conflict(_) => ErrorKind::StatusConflict,
            Self::Function(e) => e.kind,
            Self::Store(e) => e.kind(),
            Self::Messaging(_) => ErrorKind::Communication,
            Self::Io(_) => ErrorKind::ServerError,
        }
    }

    /// Returns the HTTP status code for this error.
    #[must_use]
    pub const fn status_code(&self) -> u16 {
        self.kind().status_code()
    }
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, EdgeflowError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_status_codes() {
        assert_eq!(ErrorKind::ContractInvalid.status_code(), 400);
        assert_eq!(ErrorKind::EntityDoesNotExist.status_code(), 404);
        assert_eq!(ErrorKind::StatusConflict.status_code(), 409);
        assert_eq!(ErrorKind::ServerError.status_code(), 500);
        assert_eq!(ErrorKind::ServiceUnavailable.status_code(), 503);
    }

    #[test]
    fn test_no_data_message() {
        let err = FunctionError::no_data("Batch", "p1");
        assert_eq!(err.kind, ErrorKind::ContractInvalid);
        assert_eq!(err.to_string(), "function Batch in pipeline 'p1': No Data Received");
    }

    #[test]
    fn test_message_error_is_server_class() {
        let err = MessageError::function_failure(FunctionError::contract_invalid("bad"));
        assert_eq!(err.status_code, 500);
        assert_eq!(err.to_string(), "bad");
    }

    #[test]
    fn test_store_error_kind() {
        assert_eq!(
            StoreError::NotFound("x".into()).kind(),
            ErrorKind::EntityDoesNotExist
        );
        let err: EdgeflowError = StoreError::Contract("empty payload".into()).into();
        assert_eq!(err.status_code(), 400);
    }

    #[test]
    fn test_function_error_converts() {
        let err: EdgeflowError = FunctionError::server_error("boom").into();
        assert_eq!(err.kind(), ErrorKind::ServerError);
        assert_eq!(err.to_string(), "boom");
    }

    #[test]
    fn test_error_kind_display() {
        assert_eq!(ErrorKind::StatusConflict.to_string(), "status_conflict");
    }
}
