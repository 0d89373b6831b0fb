//! Compiled fragment definitions and the helpers containers use to diff
//! fragment props.
//!
//! A fragment reference inside component props is an object carrying the
//! referenced record's ID under [`FRAGMENT_ID_KEY`]; plural fragments take an
//! array of such objects.

use crate::operation::DataId;
use crate::variables::Variables;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Key under which a fragment reference stores its record ID.
pub const FRAGMENT_ID_KEY: &str = "__id";

/// Props passed to a container, keyed by prop name.
pub type Props = serde_json::Map<String, Value>;

/// Fragments declared by a container, keyed by prop name.
pub type FragmentMap = IndexMap<String, FragmentNode>;

/// A compiled fragment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FragmentNode {
    /// Fragment name.
    pub name: String,

    /// Whether the fragment is spread over a list.
    #[serde(default)]
    pub plural: bool,

    /// Arguments the fragment reads.
    #[serde(default)]
    pub argument_definitions: Vec<ArgumentDefinition>,

    /// Compiler-provided metadata. `None` for fragments compiled without it.
    #[serde(default)]
    pub metadata: Option<FragmentMetadata>,
}

impl FragmentNode {
    /// Creates a singular fragment without arguments or metadata.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            plural: false,
            argument_definitions: Vec::new(),
            metadata: None,
        }
    }

    /// Marks the fragment as plural.
    pub fn plural(mut self) -> Self {
        self.plural = true;
        self
    }

    /// Adds an argument definition.
    pub fn argument(mut self, argument: ArgumentDefinition) -> Self {
        self.argument_definitions.push(argument);
        self
    }

    /// Sets the metadata.
    pub fn with_metadata(mut self, metadata: FragmentMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// An argument read by a fragment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum ArgumentDefinition {
    /// Declared on the fragment with a default value.
    LocalArgument {
        name: String,
        #[serde(default, rename = "defaultValue")]
        default_value: Value,
    },
    /// Read from the enclosing operation's variables.
    RootArgument { name: String },
}

impl ArgumentDefinition {
    /// Returns the argument name.
    pub fn name(&self) -> &str {
        match self {
            Self::LocalArgument { name, .. } | Self::RootArgument { name } => name,
        }
    }
}

/// Compiler-provided fragment metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FragmentMetadata {
    /// `@connection` fields selected by the fragment.
    #[serde(default)]
    pub connection: Vec<ConnectionMetadata>,
}

/// Description of a `@connection` field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnectionMetadata {
    /// Path from the fragment root to the connection field.
    #[serde(default)]
    pub path: Option<Vec<String>>,

    /// Pagination direction.
    #[serde(default)]
    pub direction: Option<ConnectionDirection>,

    /// Name of the cursor variable.
    #[serde(default)]
    pub cursor: Option<String>,

    /// Name of the count variable.
    #[serde(default)]
    pub count: Option<String>,
}

/// Direction in which a connection is paginated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionDirection {
    Forward,
    Backward,
}

/// Record IDs referenced by one fragment prop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataIds {
    /// The prop is absent, null or not a fragment reference.
    None,
    /// A singular fragment reference.
    Single(DataId),
    /// A plural fragment reference.
    Plural(Vec<Option<DataId>>),
}

fn reference_id(value: &Value) -> Option<DataId> {
    value
        .get(FRAGMENT_ID_KEY)
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Extracts the record IDs each fragment prop points to.
pub fn get_data_ids_from_object(fragments: &FragmentMap, props: &Props) -> IndexMap<String, DataIds> {
    fragments
        .iter()
        .map(|(key, fragment)| {
            let ids = match props.get(key) {
                Some(Value::Array(items)) if fragment.plural => {
                    DataIds::Plural(items.iter().map(reference_id).collect())
                }
                Some(value) => reference_id(value).map_or(DataIds::None, DataIds::Single),
                None => DataIds::None,
            };
            (key.clone(), ids)
        })
        .collect()
}

/// Computes the variables the fragments read: root arguments come from
/// `root_variables`, local arguments use their default values.
pub fn get_variables_from_object(
    root_variables: &Variables,
    fragments: &FragmentMap,
    _props: &Props,
) -> Variables {
    let mut variables = Variables::new();
    for fragment in fragments.values() {
        for argument in &fragment.argument_definitions {
            let value = match argument {
                ArgumentDefinition::LocalArgument { default_value, .. } => default_value.clone(),
                ArgumentDefinition::RootArgument { name } => {
                    root_variables.get(name).cloned().unwrap_or(Value::Null)
                }
            };
            variables.insert(argument.name().to_string(), value);
        }
    }
    variables
}
