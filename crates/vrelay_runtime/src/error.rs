//! Typed errors shared by the runtime interface and the binding layer.
//!
//! Errors are cheap to clone because a single execution failure may be
//! delivered to several change callbacks and buffered for late-bound ones.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Typed error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[non_exhaustive]
pub enum ErrorCode {
    /// A precondition of the called operation does not hold.
    Invariant,

    // Execution errors
    NetworkError,
    ExecutionError,
    Cancelled,

    // Store errors
    StoreError,
    MissingData,

    // Binding errors
    InvalidContext,
    InvalidFragment,
    InvalidVariables,
    ConnectionError,

    // Serialization errors
    SerializeError,
    DeserializeError,

    InternalError,
}

impl ErrorCode {
    /// Returns the string representation of the error code.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Invariant => "INVARIANT",
            Self::NetworkError => "NETWORK_ERROR",
            Self::ExecutionError => "EXECUTION_ERROR",
            Self::Cancelled => "CANCELLED",
            Self::StoreError => "STORE_ERROR",
            Self::MissingData => "MISSING_DATA",
            Self::InvalidContext => "INVALID_CONTEXT",
            Self::InvalidFragment => "INVALID_FRAGMENT",
            Self::InvalidVariables => "INVALID_VARIABLES",
            Self::ConnectionError => "CONNECTION_ERROR",
            Self::SerializeError => "SERIALIZE_ERROR",
            Self::DeserializeError => "DESERIALIZE_ERROR",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }

    /// Returns true if replaying the same request may succeed.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::NetworkError | Self::Cancelled)
    }

    /// Returns true if the error signals misuse of the API rather than a
    /// runtime failure.
    pub const fn is_usage_error(&self) -> bool {
        matches!(
            self,
            Self::Invariant
                | Self::InvalidContext
                | Self::InvalidFragment
                | Self::InvalidVariables
                | Self::ConnectionError
        )
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error raised by the environment or by the binding layer.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("[{code}] {message}")]
pub struct RelayError {
    /// Typed error code.
    pub code: ErrorCode,
    /// Human-readable error message.
    pub message: String,
    /// Extension data, usually copied from a GraphQL error payload.
    pub extensions: Option<HashMap<String, serde_json::Value>>,
}

impl RelayError {
    /// Creates a new error with the given code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            extensions: None,
        }
    }

    /// Adds extension data.
    pub fn with_extension(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        let extensions = self.extensions.get_or_insert_with(HashMap::new);
        if let Ok(v) = serde_json::to_value(value) {
            extensions.insert(key.into(), v);
        }
        self
    }

    /// Creates a precondition violation.
    pub fn invariant(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Invariant, message)
    }

    /// Creates a network error.
    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NetworkError, message)
    }

    /// Creates an execution error.
    pub fn execution(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ExecutionError, message)
    }

    /// Creates a store error.
    pub fn store(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::StoreError, message)
    }

    /// Creates an invalid-context error.
    pub fn invalid_context(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidContext, message)
    }

    /// Creates an invalid-fragment error.
    pub fn invalid_fragment(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidFragment, message)
    }

    /// Creates a connection (pagination) error.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ConnectionError, message)
    }

    /// Creates an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    /// Returns true if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        self.code.is_retryable()
    }
}

impl Serialize for RelayError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct;

        let mut state = serializer.serialize_struct("RelayError", 3)?;
        state.serialize_field("code", &self.code)?;
        state.serialize_field("message", &self.message)?;
        if let Some(ref ext) = self.extensions {
            state.serialize_field("extensions", ext)?;
        }
        state.end()
    }
}

/// Type alias for results carrying a [`RelayError`].
pub type RelayResult<T> = std::result::Result<T, RelayError>;

/// Result extension for mapping foreign errors.
pub trait ResultExt<T> {
    /// Maps the error to a [`RelayError`] with the given code.
    fn map_relay_err(self, code: ErrorCode) -> RelayResult<T>;
}

impl<T, E: std::error::Error> ResultExt<T> for std::result::Result<T, E> {
    fn map_relay_err(self, code: ErrorCode) -> RelayResult<T> {
        self.map_err(|e| RelayError::new(code, e.to_string()))
    }
}

/// Returns an [`ErrorCode::Invariant`] error when `condition` is false.
///
/// ```
/// use vrelay_runtime::error::ensure;
///
/// assert!(ensure(true, || "unreachable".to_string()).is_ok());
/// assert!(ensure(false, || "boom".to_string()).is_err());
/// ```
pub fn ensure(condition: bool, message: impl FnOnce() -> String) -> RelayResult<()> {
    if condition {
        Ok(())
    } else {
        Err(RelayError::invariant(message()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_properties() {
        assert!(ErrorCode::NetworkError.is_retryable());
        assert!(!ErrorCode::Invariant.is_retryable());

        assert!(ErrorCode::InvalidFragment.is_usage_error());
        assert!(!ErrorCode::ExecutionError.is_usage_error());
    }

    #[test]
    fn test_error_display() {
        let err = RelayError::invariant("`retry` should be called after having called `fetch`");
        assert_eq!(
            err.to_string(),
            "[INVARIANT] `retry` should be called after having called `fetch`"
        );
    }

    #[test]
    fn test_error_serialization() {
        let err = RelayError::network("Connection reset").with_extension("attempt", 2);
        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains("NETWORK_ERROR"));
        assert!(json.contains("Connection reset"));
        assert!(json.contains("attempt"));
    }

    #[test]
    fn test_result_ext() {
        let result: Result<serde_json::Value, serde_json::Error> = serde_json::from_str("{");
        let err = result.map_relay_err(ErrorCode::DeserializeError).unwrap_err();
        assert_eq!(err.code, ErrorCode::DeserializeError);
    }
}
