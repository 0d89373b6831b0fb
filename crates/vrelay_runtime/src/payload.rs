//! Network responses.

use crate::error::{ErrorCode, RelayError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A GraphQL response as returned by the network layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphQLResponse {
    #[serde(default)]
    pub data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<PayloadError>>,
}

impl GraphQLResponse {
    /// Creates a response carrying `data`.
    pub fn data(data: serde_json::Value) -> Self {
        Self {
            data: Some(data),
            errors: None,
        }
    }

    /// Returns an error if the response has no data, built from its first
    /// GraphQL error.
    pub fn into_result(self) -> Result<Self, RelayError> {
        if self.data.is_some() {
            return Ok(self);
        }
        let error = self
            .errors
            .as_ref()
            .and_then(|errors| errors.first())
            .map_or_else(
                || RelayError::execution("No data returned for operation"),
                PayloadError::to_relay_error,
            );
        Err(error)
    }
}

/// A GraphQL error entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayloadError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<Vec<serde_json::Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<HashMap<String, serde_json::Value>>,
}

impl PayloadError {
    /// Converts the entry into a [`RelayError`].
    pub fn to_relay_error(&self) -> RelayError {
        let mut error = RelayError::new(ErrorCode::ExecutionError, self.message.clone());
        error.extensions = self.extensions.clone();
        error
    }
}
