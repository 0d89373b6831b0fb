//! The context a container reads its environment and variables from.

use crate::environment::{same_environment, SharedEnvironment};
use crate::error::{RelayError, RelayResult};
use crate::variables::{variables_from_value, Variables};
use serde_json::Value;
use std::fmt;

/// Environment and root variables provided to a container by its nearest
/// query renderer or parent container.
#[derive(Clone)]
pub struct RelayContext {
    pub environment: SharedEnvironment,
    pub variables: Variables,
}

impl RelayContext {
    /// Creates a context.
    pub fn new(environment: SharedEnvironment, variables: Variables) -> Self {
        Self {
            environment,
            variables,
        }
    }

    /// Creates a context from untyped variables, failing unless they are an
    /// object.
    pub fn from_value(environment: SharedEnvironment, variables: Value) -> RelayResult<Self> {
        if !crate::variables::is_relay_variables(&variables) {
            return Err(RelayError::invalid_context(format!(
                "Expected `context.relay.variables` to be an object, got `{variables}`"
            )));
        }
        Ok(Self::new(environment, variables_from_value(variables)?))
    }

    /// Returns true if `other` shares the environment.
    pub fn same_environment(&self, other: &Self) -> bool {
        same_environment(&self.environment, &other.environment)
    }

    /// Returns true if `other` shares the environment and has equal variables.
    pub fn same_as(&self, other: &Self) -> bool {
        self.same_environment(other) && self.variables == other.variables
    }
}

impl fmt::Debug for RelayContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayContext")
            .field("variables", &self.variables)
            .finish_non_exhaustive()
    }
}

/// Returns the context, failing if none was provided.
pub fn assert_relay_context(context: Option<&RelayContext>) -> RelayResult<&RelayContext> {
    context.ok_or_else(|| {
        RelayError::invalid_context(
            "Expected `context.relay` to be an object conforming to the `RelayContext` interface, got `undefined`",
        )
    })
}
