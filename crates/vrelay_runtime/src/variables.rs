//! Operation and fragment variables.

use crate::error::{RelayError, RelayResult};
use serde_json::Value;

/// Variables bound to an operation or fragment.
pub type Variables = serde_json::Map<String, Value>;

/// Returns true if `value` can be used as a variables object.
pub fn is_relay_variables(value: &Value) -> bool {
    value.is_object()
}

/// Converts an arbitrary JSON value into variables, failing if it is not an
/// object. `null` is treated as empty variables.
pub fn variables_from_value(value: Value) -> RelayResult<Variables> {
    match value {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Variables::new()),
        other => Err(RelayError::new(
            crate::ErrorCode::InvalidVariables,
            format!("Expected variables to be an object, got `{}`", other),
        )),
    }
}

/// Returns `base` overlaid with `overrides`.
pub fn merge_variables(base: &Variables, overrides: &Variables) -> Variables {
    let mut merged = base.clone();
    for (key, value) in overrides {
        merged.insert(key.clone(), value.clone());
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_variables_from_value() {
        assert!(variables_from_value(json!({"id": "1"})).is_ok());
        assert!(variables_from_value(Value::Null).unwrap().is_empty());

        let err = variables_from_value(json!([1, 2])).unwrap_err();
        assert_eq!(err.code, crate::ErrorCode::InvalidVariables);
    }

    #[test]
    fn test_merge_variables() {
        let base = variables_from_value(json!({"count": 10, "cursor": null})).unwrap();
        let overrides = variables_from_value(json!({"cursor": "abc"})).unwrap();
        let merged = merge_variables(&base, &overrides);

        assert_eq!(Value::Object(merged), json!({"count": 10, "cursor": "abc"}));
    }

    #[test]
    fn test_is_relay_variables() {
        assert!(is_relay_variables(&json!({})));
        assert!(!is_relay_variables(&json!([])));
        assert!(!is_relay_variables(&Value::Null));
    }
}
