//! Requests, selectors and operation descriptors.

use crate::fragment::FragmentNode;
use crate::variables::Variables;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::rc::Rc;

/// Identifier of a store record.
pub type DataId = String;

/// ID of the store's root record. Operation roots are keyed below it.
pub const ROOT_ID: &str = "client:root";

/// Kind of a GraphQL operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationKind {
    #[default]
    Query,
    Mutation,
    Subscription,
}

/// Parameters the network layer needs to run a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestParameters {
    /// Operation name.
    pub name: String,

    /// Persisted query ID.
    #[serde(default)]
    pub id: Option<String>,

    /// Query text.
    #[serde(default)]
    pub text: Option<String>,

    /// Operation kind.
    #[serde(default)]
    pub operation_kind: OperationKind,
}

impl RequestParameters {
    /// Returns the identity used to deduplicate requests: the persisted ID
    /// if present, otherwise the query text, otherwise the name.
    pub fn identifier(&self) -> &str {
        self.id
            .as_deref()
            .or(self.text.as_deref())
            .unwrap_or(&self.name)
    }
}

/// A compiled request: network parameters plus the root reader fragment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConcreteRequest {
    pub params: RequestParameters,
    pub fragment: FragmentNode,
}

impl ConcreteRequest {
    /// Creates a query request whose root fragment shares the operation name.
    pub fn query(name: impl Into<String>, text: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            fragment: FragmentNode::new(name.clone()),
            params: RequestParameters {
                name,
                id: None,
                text: Some(text.into()),
                operation_kind: OperationKind::Query,
            },
        }
    }

    /// Sets the persisted query ID.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.params.id = Some(id.into());
        self
    }
}

/// A selection rooted at a record, read with concrete variables.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Selector {
    pub data_id: DataId,
    pub node: String,
    pub variables: Variables,
}

impl Selector {
    /// Creates a selector.
    pub fn new(data_id: impl Into<DataId>, node: impl Into<String>, variables: Variables) -> Self {
        Self {
            data_id: data_id.into(),
            node: node.into(),
            variables,
        }
    }
}

/// Returns the record ID under which an operation's root data is stored.
pub fn operation_root_id(name: &str, variables: &Variables) -> DataId {
    format!("{ROOT_ID}:{name}:{}", Value::Object(variables.clone()))
}

/// A request bound to concrete variables. Immutable once constructed.
#[derive(Debug, Clone)]
pub struct OperationDescriptor {
    /// The compiled request.
    pub request: Rc<ConcreteRequest>,
    /// Variables the operation runs with.
    pub variables: Variables,
    /// Normalization selector: what `check` and `retain` act on.
    pub root: Selector,
    /// Reader selector: what `lookup` reads.
    pub fragment: Selector,
}

impl OperationDescriptor {
    /// Binds `request` to `variables`.
    pub fn new(request: Rc<ConcreteRequest>, variables: Variables) -> Self {
        let data_id = operation_root_id(&request.params.name, &variables);
        let root = Selector::new(data_id.clone(), request.params.name.clone(), variables.clone());
        let fragment = Selector::new(data_id, request.fragment.name.clone(), variables.clone());
        Self {
            request,
            variables,
            root,
            fragment,
        }
    }

    /// Returns the operation name.
    pub fn name(&self) -> &str {
        &self.request.params.name
    }
}

impl PartialEq for OperationDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.request.params == other.request.params && self.variables == other.variables
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vars(value: Value) -> Variables {
        crate::variables::variables_from_value(value).unwrap()
    }

    #[test]
    fn test_operation_selectors() {
        let request = Rc::new(ConcreteRequest::query("UserQuery", "query UserQuery { me { id } }"));
        let operation = OperationDescriptor::new(request, vars(json!({"id": "4"})));

        assert_eq!(operation.root.data_id, operation.fragment.data_id);
        assert_eq!(operation.root.data_id, r#"client:root:UserQuery:{"id":"4"}"#);
        assert_eq!(operation.fragment.node, "UserQuery");
    }

    #[test]
    fn test_operation_equality() {
        let request = Rc::new(ConcreteRequest::query("UserQuery", "query { me { id } }"));
        let a = OperationDescriptor::new(request.clone(), vars(json!({"id": "4"})));
        let b = OperationDescriptor::new(request.clone(), vars(json!({"id": "4"})));
        let c = OperationDescriptor::new(request, vars(json!({"id": "5"})));

        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_request_identifier() {
        let request = ConcreteRequest::query("UserQuery", "query { me { id } }");
        assert_eq!(request.params.identifier(), "query { me { id } }");

        let persisted = request.with_id("q1");
        assert_eq!(persisted.params.identifier(), "q1");
    }
}
