//! Relay-style data containers for reactive component runtimes.
//!
//! This crate binds a [`vrelay_runtime::Environment`] to components:
//! - `query_fetcher`: fetches one query and keeps its data retained and observed
//! - `query_renderer`: the root container rendering a query's data
//! - `fragment_container`: reads a component's fragment props
//! - `refetch_container`: a fragment container that can refetch with new variables
//! - `pagination_container`: a fragment container paging through a connection
//! - `request_cache`: shares in-flight fetches between renderers
//! - `container`: the lifecycle every container implements
//!
//! The host component runtime calls [`Container`] lifecycle methods and
//! re-renders when a container asks it to.

pub mod config;
pub mod container;
pub mod fragment_container;
pub mod pagination_container;
pub mod query_fetcher;
pub mod query_renderer;
pub mod refetch_container;
pub mod request_cache;

pub use config::{ConnectionInterface, DataFrom, PageOptions, RefetchOptions};
pub use container::{
    assert_fragment_map, component_name, container_name, CompletionCallback, Container, ContainerInput,
    ContainerSpec, ObserverOrCallback, Rendered, ScheduleUpdate, WrappedComponent,
};
pub use fragment_container::{FragmentContainer, FragmentRelayProp};
pub use pagination_container::{
    find_connection_metadata, ConnectionConfig, ConnectionData, PageVariables, PaginationContainer,
    PaginationHandle, PaginationRelayProp,
};
pub use query_fetcher::{DataChange, ExecuteOptions, FetchOptions, OnDataChange, QueryFetcher, SelectionReferences};
pub use query_renderer::{QueryRenderer, QueryRendererProps, RenderProps, Retry};
pub use refetch_container::{RefetchContainer, RefetchHandle, RefetchRelayProp, RefetchVariables};
pub use request_cache::{request_cache_key, RequestCache, RequestCacheEntry};
