//! Runtime interface for vrelay.
//!
//! This crate defines what the binding layer expects from a GraphQL client
//! runtime:
//! - `environment`: the store and network capability (`check`, `lookup`,
//!   `retain`, `execute`, `subscribe`)
//! - `observable`: cold, single-threaded observables used for execution
//! - `disposable`: single-use release handles and selection references
//! - `operation`: requests, selectors and operation descriptors
//! - `snapshot`: immutable store reads
//! - `fragment`: fragment definitions and prop helpers
//! - `resolver`: fragment resolvers used by containers
//! - `context`: the environment and variables provided to containers
//! - `memory`: an in-memory environment for tests and demos

pub mod config;
pub mod context;
pub mod disposable;
pub mod environment;
pub mod error;
pub mod fragment;
pub mod memory;
pub mod observable;
pub mod operation;
pub mod payload;
pub mod resolver;
pub mod snapshot;
pub mod variables;

pub use config::CacheConfig;
pub use context::{assert_relay_context, RelayContext};
pub use disposable::{Disposable, SelectionReference};
pub use environment::{same_environment, Environment, ExecutePayload, ExecuteRequest, SharedEnvironment};
pub use error::{ErrorCode, RelayError, RelayResult, ResultExt};
pub use fragment::{
    get_data_ids_from_object, get_variables_from_object, ArgumentDefinition, ConnectionDirection,
    ConnectionMetadata, DataIds, FragmentMap, FragmentMetadata, FragmentNode, Props,
    FRAGMENT_ID_KEY,
};
pub use memory::{FnNetwork, MemoryEnvironment, Network, QueuedNetwork};
pub use observable::{Observable, Observer, Sink, Subscription, Tap};
pub use operation::{
    ConcreteRequest, DataId, OperationDescriptor, OperationKind, RequestParameters, Selector,
    ROOT_ID,
};
pub use payload::{GraphQLResponse, PayloadError};
pub use resolver::{FragmentSpecResolver, StoreFragmentSpecResolver};
pub use snapshot::Snapshot;
pub use variables::{is_relay_variables, merge_variables, variables_from_value, Variables};
