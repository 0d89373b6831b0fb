//! The store and network capability consumed by the binding layer.

use crate::config::CacheConfig;
use crate::context::RelayContext;
use crate::disposable::{Disposable, SelectionReference};
use crate::fragment::{FragmentMap, Props};
use crate::observable::Observable;
use crate::operation::{OperationDescriptor, Selector};
use crate::payload::GraphQLResponse;
use crate::resolver::{FragmentSpecResolver, StoreFragmentSpecResolver};
use crate::snapshot::Snapshot;
use crate::variables::Variables;
use std::rc::Rc;

/// Arguments to [`Environment::execute`].
#[derive(Debug, Clone)]
pub struct ExecuteRequest {
    pub operation: OperationDescriptor,
    pub cache_config: Option<CacheConfig>,
}

impl ExecuteRequest {
    /// Creates a request without cache configuration.
    pub fn new(operation: OperationDescriptor) -> Self {
        Self {
            operation,
            cache_config: None,
        }
    }

    /// Sets the cache configuration.
    pub fn with_cache_config(mut self, cache_config: Option<CacheConfig>) -> Self {
        self.cache_config = cache_config;
        self
    }
}

/// One payload produced by an execution, already committed to the store.
#[derive(Debug, Clone)]
pub struct ExecutePayload {
    /// The operation the payload was normalized under. Retaining its root
    /// keeps the payload's records alive.
    pub operation: OperationDescriptor,
    pub variables: Variables,
    pub response: GraphQLResponse,
}

/// A normalized store plus a network layer.
///
/// Implementations are single-threaded. None of the methods may invoke a
/// subscription callback synchronously, except `execute` when its producer
/// commits data.
pub trait Environment {
    /// Returns true if every record the selector reads is present.
    fn check(&self, selector: &Selector) -> bool;

    /// Reads the selector.
    fn lookup(&self, selector: &Selector) -> Snapshot;

    /// Keeps the selector's records alive until the reference is released.
    fn retain(&self, selector: &Selector) -> SelectionReference;

    /// Returns a cold observable that fetches the operation and commits each
    /// response before emitting it.
    fn execute(&self, request: ExecuteRequest) -> Observable<ExecutePayload>;

    /// Calls `callback` with a fresh snapshot whenever the records behind
    /// `snapshot` change.
    fn subscribe(&self, snapshot: &Snapshot, callback: Box<dyn Fn(Snapshot)>) -> Disposable;

    /// Creates the resolver a container uses to read its fragment props.
    fn create_fragment_spec_resolver(
        &self,
        context: &RelayContext,
        container_name: &str,
        fragments: &FragmentMap,
        props: &Props,
    ) -> Box<dyn FragmentSpecResolver> {
        Box::new(StoreFragmentSpecResolver::new(
            context.clone(),
            container_name,
            fragments.clone(),
            props.clone(),
        ))
    }
}

/// A shared environment handle.
pub type SharedEnvironment = Rc<dyn Environment>;

/// Returns true if both handles point to the same environment.
pub fn same_environment(a: &SharedEnvironment, b: &SharedEnvironment) -> bool {
    Rc::as_ptr(a).cast::<()>() == Rc::as_ptr(b).cast::<()>()
}
