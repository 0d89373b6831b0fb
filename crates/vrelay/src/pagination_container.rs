//! Fragment container paginating a `@connection` field.
//!
//! The connection is located through the fragment metadata emitted by the
//! compiler: exactly one fragment may carry exactly one `@connection`, and
//! its path, direction and count variable drive the default
//! `get_connection_from_props` and `get_fragment_variables` functions.

use crate::config::{ConnectionInterface, PageOptions};
use crate::container::{
    data_ids_changed, merge_props, Container, ContainerInput, ContainerSpec, ObserverOrCallback,
    Rendered, ScheduleUpdate, UpdateScheduler,
};
use crate::query_fetcher::{ExecuteOptions, QueryFetcher};
use serde_json::Value;
use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};
use vrelay_runtime::{
    assert_relay_context, get_variables_from_object, merge_variables, ConcreteRequest,
    ConnectionDirection, ConnectionMetadata, FragmentMap, FragmentSpecResolver, Observable, Observer,
    OperationDescriptor, Props, RelayContext, RelayError, RelayResult, SharedEnvironment, Subscription,
    Tap, Variables,
};

/// Count and cursor of the page being requested.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageVariables {
    pub count: u64,
    pub cursor: Option<String>,
}

/// Builds the query variables of a page from the props, the page and the
/// fragment variables.
pub type GetVariables = Rc<dyn Fn(&Props, PageVariables, &Variables) -> Variables>;

/// Extracts the connection object from the props.
pub type GetConnectionFromProps = Rc<dyn Fn(&Props) -> Option<Value>>;

/// Returns the fragment variables needed to read `total_count` edges.
pub type GetFragmentVariables = Rc<dyn Fn(&Variables, u64) -> Variables>;

/// How a pagination container fetches pages.
#[derive(Clone)]
pub struct ConnectionConfig {
    pub query: Rc<ConcreteRequest>,
    pub get_variables: GetVariables,
    pub direction: Option<ConnectionDirection>,
    pub get_connection_from_props: Option<GetConnectionFromProps>,
    pub get_fragment_variables: Option<GetFragmentVariables>,
    pub connection_interface: ConnectionInterface,
}

impl ConnectionConfig {
    /// Creates a config inferring everything else from fragment metadata.
    pub fn new(
        query: Rc<ConcreteRequest>,
        get_variables: impl Fn(&Props, PageVariables, &Variables) -> Variables + 'static,
    ) -> Self {
        Self {
            query,
            get_variables: Rc::new(get_variables),
            direction: None,
            get_connection_from_props: None,
            get_fragment_variables: None,
            connection_interface: ConnectionInterface::default(),
        }
    }

    pub fn direction(mut self, direction: ConnectionDirection) -> Self {
        self.direction = Some(direction);
        self
    }

    pub fn connection_from_props(mut self, f: impl Fn(&Props) -> Option<Value> + 'static) -> Self {
        self.get_connection_from_props = Some(Rc::new(f));
        self
    }

    pub fn fragment_variables(mut self, f: impl Fn(&Variables, u64) -> Variables + 'static) -> Self {
        self.get_fragment_variables = Some(Rc::new(f));
        self
    }

    pub fn connection_interface(mut self, interface: ConnectionInterface) -> Self {
        self.connection_interface = interface;
        self
    }
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("query", &self.query.params.name)
            .field("direction", &self.direction)
            .field("connection_interface", &self.connection_interface)
            .finish_non_exhaustive()
    }
}

/// The `@connection` metadata of a container and the prop it was found on.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FoundConnectionMetadata {
    pub metadata: ConnectionMetadata,
    pub prop_name: Option<String>,
}

/// Locates the single `@connection` among `fragments`.
///
/// Fragments compiled without metadata yield an empty result; once any
/// fragment carries metadata, a connection is required.
pub fn find_connection_metadata(fragments: &FragmentMap) -> RelayResult<FoundConnectionMetadata> {
    let mut found: Option<FoundConnectionMetadata> = None;
    let mut has_metadata = false;

    for (prop_name, fragment) in fragments {
        let Some(metadata) = &fragment.metadata else {
            continue;
        };
        has_metadata = true;
        if metadata.connection.is_empty() {
            continue;
        }
        if metadata.connection.len() != 1 {
            return Err(RelayError::connection(format!(
                "RelayPaginationContainer: Only a single @connection is supported, `{prop_name}` has {}.",
                metadata.connection.len()
            )));
        }
        if found.is_some() {
            return Err(RelayError::connection(
                "RelayPaginationContainer: Only a single fragment with @connection is supported.",
            ));
        }
        found = Some(FoundConnectionMetadata {
            metadata: metadata.connection[0].clone(),
            prop_name: Some(prop_name.clone()),
        });
    }

    match found {
        Some(found) => Ok(found),
        None if has_metadata => Err(RelayError::connection(
            "RelayPaginationContainer: A @connection directive must be present.",
        )),
        None => Ok(FoundConnectionMetadata::default()),
    }
}

/// Builds a function walking the connection path from the fragment prop.
pub fn create_get_connection_from_props(found: &FoundConnectionMetadata) -> RelayResult<GetConnectionFromProps> {
    let (Some(path), Some(prop_name)) = (found.metadata.path.clone(), found.prop_name.clone()) else {
        return Err(RelayError::connection(
            "RelayPaginationContainer: Unable to synthesize a getConnectionFromProps function.",
        ));
    };
    Ok(Rc::new(move |props: &Props| {
        let mut data = props.get(&prop_name)?;
        for segment in &path {
            if !data.is_object() {
                return None;
            }
            data = data.get(segment)?;
        }
        Some(data.clone())
    }))
}

/// Builds a function setting the count variable to the total edge count.
pub fn create_get_fragment_variables(found: &FoundConnectionMetadata) -> RelayResult<GetFragmentVariables> {
    let Some(count_variable) = found.metadata.count.clone() else {
        return Err(RelayError::connection(
            "RelayPaginationContainer: Unable to synthesize a getFragmentVariables function.",
        ));
    };
    Ok(Rc::new(move |previous: &Variables, total_count: u64| {
        let mut variables = previous.clone();
        variables.insert(count_variable.clone(), Value::from(total_count));
        variables
    }))
}

/// Pagination state read from the connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionData {
    pub cursor: Option<String>,
    pub edge_count: usize,
    pub has_more: bool,
}

struct ResolvedConnection {
    query: Rc<ConcreteRequest>,
    get_variables: GetVariables,
    get_connection_from_props: GetConnectionFromProps,
    get_fragment_variables: GetFragmentVariables,
    direction: ConnectionDirection,
    interface: ConnectionInterface,
}

impl ResolvedConnection {
    fn resolve(fragments: &FragmentMap, config: ConnectionConfig) -> RelayResult<Self> {
        let found = find_connection_metadata(fragments)?;
        let get_connection_from_props = match config.get_connection_from_props {
            Some(f) => f,
            None => create_get_connection_from_props(&found)?,
        };
        let direction = config.direction.or(found.metadata.direction).ok_or_else(|| {
            RelayError::connection(
                "RelayPaginationContainer: Unable to infer direction of the connection, \
                 possibly because both first and last are provided.",
            )
        })?;
        let get_fragment_variables = match config.get_fragment_variables {
            Some(f) => f,
            None => create_get_fragment_variables(&found)?,
        };
        Ok(Self {
            query: config.query,
            get_variables: config.get_variables,
            get_connection_from_props,
            get_fragment_variables,
            direction,
            interface: config.connection_interface,
        })
    }

    fn page_info_keys(&self) -> (&str, &str) {
        match self.direction {
            ConnectionDirection::Forward => (self.interface.has_next_page.as_str(), self.interface.end_cursor.as_str()),
            ConnectionDirection::Backward => (
                self.interface.has_previous_page.as_str(),
                self.interface.start_cursor.as_str(),
            ),
        }
    }
}

struct PaginatingVariables {
    count: u64,
    cursor: Option<String>,
    total_count: u64,
}

struct PaginationState {
    context: RelayContext,
    context_for_children: RelayContext,
    props: Props,
    data: Rc<Props>,
    resolver: Box<dyn FragmentSpecResolver>,
    local_variables: Option<Variables>,
    refetch_subscription: Option<Subscription>,
    is_a_request_in_flight: bool,
    query_fetcher: Option<QueryFetcher>,
}

struct PaginationInner {
    spec: Rc<ContainerSpec>,
    connection: ResolvedConnection,
    state: RefCell<PaginationState>,
    scheduler: UpdateScheduler,
}

impl PaginationInner {
    fn resolver_callback(self: &Rc<Self>) -> Rc<dyn Fn()> {
        let weak = Rc::downgrade(self);
        Rc::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.handle_fragment_data_update();
            }
        })
    }

    fn handle_fragment_data_update(&self) {
        let changed = {
            let mut state = self.state.borrow_mut();
            let data = state.resolver.resolve();
            let changed = !Rc::ptr_eq(&data, &state.data);
            state.data = data;
            changed
        };
        if changed {
            self.scheduler.schedule();
        }
    }

    fn get_connection_data(&self) -> RelayResult<Option<ConnectionData>> {
        let props = {
            let state = self.state.borrow();
            merge_props(&state.props, &state.data)
        };
        let name = self.spec.container_name();
        let interface = &self.connection.interface;

        let connection = match (self.connection.get_connection_from_props)(&props) {
            None | Some(Value::Null) => return Ok(None),
            Some(Value::Object(connection)) => connection,
            Some(other) => {
                return Err(RelayError::connection(format!(
                    "RelayPaginationContainer: Expected `getConnectionFromProps()` in `{name}` to return \
                     `null` or a plain object with {} and {} properties, got `{other}`.",
                    interface.edges, interface.page_info
                )))
            }
        };
        let edges = connection.get(&interface.edges).filter(|value| !value.is_null());
        let page_info = connection.get(&interface.page_info).filter(|value| !value.is_null());
        let (Some(edges), Some(page_info)) = (edges, page_info) else {
            return Ok(None);
        };
        let Value::Array(edges) = edges else {
            return Err(RelayError::connection(format!(
                "RelayPaginationContainer: Expected `getConnectionFromProps()` in `{name}` to return \
                 an object with {}: Array, got `{edges}`.",
                interface.edges
            )));
        };
        let Value::Object(page_info) = page_info else {
            return Err(RelayError::connection(format!(
                "RelayPaginationContainer: Expected `getConnectionFromProps()` in `{name}` to return \
                 an object with {}: Object, got `{page_info}`.",
                interface.page_info
            )));
        };

        let (has_more_key, cursor_key) = self.connection.page_info_keys();
        let has_more = page_info.get(has_more_key).and_then(Value::as_bool);
        let cursor = page_info.get(cursor_key);
        match has_more {
            Some(has_more) if edges.is_empty() || cursor.is_some() => Ok(Some(ConnectionData {
                cursor: cursor.and_then(Value::as_str).map(str::to_string),
                edge_count: edges.len(),
                has_more,
            })),
            _ => {
                tracing::warn!(
                    container = %name,
                    has_more = ?page_info.get(has_more_key),
                    cursor = ?cursor,
                    "cannot paginate without {} fields: fetch {} and {}",
                    interface.page_info,
                    has_more_key,
                    cursor_key
                );
                Ok(None)
            }
        }
    }

    fn has_more(&self) -> RelayResult<bool> {
        let connection = self.get_connection_data()?;
        Ok(connection.is_some_and(|connection| {
            connection.has_more && connection.cursor.is_some_and(|cursor| !cursor.is_empty())
        }))
    }

    fn is_loading(&self) -> bool {
        self.state.borrow().refetch_subscription.is_some()
    }

    fn refetch_connection(
        self: &Rc<Self>,
        total_count: u64,
        observer: Option<ObserverOrCallback>,
        refetch_variables: Option<Variables>,
    ) -> Subscription {
        let paginating = PaginatingVariables {
            count: total_count,
            cursor: None,
            total_count,
        };
        self.fetch_page(
            paginating,
            ObserverOrCallback::into_page_observer(observer),
            Some(PageOptions::forced()),
            refetch_variables,
        )
    }

    fn load_more(
        self: &Rc<Self>,
        page_size: u64,
        observer: Option<ObserverOrCallback>,
        options: Option<PageOptions>,
    ) -> RelayResult<Option<Subscription>> {
        let Some(connection) = self.get_connection_data()? else {
            Observable::<()>::empty().subscribe(ObserverOrCallback::into_page_observer(observer));
            return Ok(None);
        };
        let total_count = (connection.edge_count as u64).saturating_add(page_size);
        if options.as_ref().is_some_and(|options| options.force) {
            return Ok(Some(self.refetch_connection(total_count, observer, None)));
        }
        if connection.cursor.is_none() {
            let (_, cursor_key) = self.connection.page_info_keys();
            tracing::warn!(container = %self.spec.container_name(), "cannot `load_more` without a valid `{cursor_key}`");
        }
        let paginating = PaginatingVariables {
            count: page_size,
            cursor: connection.cursor,
            total_count,
        };
        Ok(Some(self.fetch_page(
            paginating,
            ObserverOrCallback::into_page_observer(observer),
            options,
            None,
        )))
    }

    fn fetch_page(
        self: &Rc<Self>,
        paginating: PaginatingVariables,
        observer: Observer<()>,
        options: Option<PageOptions>,
        refetch_variables: Option<Variables>,
    ) -> Subscription {
        let refetch_variables = refetch_variables.unwrap_or_default();
        let (environment, parent_variables, fragment_variables, fetch_variables, previous, query_fetcher) = {
            let mut state = self.state.borrow_mut();
            let props = merge_props(&state.props, &state.data);
            let fragment_variables = merge_variables(
                &get_variables_from_object(&state.context_for_children.variables, self.spec.fragments(), &state.props),
                &refetch_variables,
            );
            let page = PageVariables {
                count: paginating.count,
                cursor: paginating.cursor,
            };
            let fetch_variables = merge_variables(
                &(self.connection.get_variables)(&props, page, &fragment_variables),
                &refetch_variables,
            );
            state.local_variables = Some(fetch_variables.clone());
            let query_fetcher = state.query_fetcher.get_or_insert_with(QueryFetcher::new).clone();
            (
                state.context.environment.clone(),
                state.context.variables.clone(),
                fragment_variables,
                fetch_variables,
                state.refetch_subscription.take(),
                query_fetcher,
            )
        };
        if let Some(previous) = previous {
            previous.unsubscribe();
        }
        self.state.borrow_mut().is_a_request_in_flight = true;

        tracing::debug!(container = %self.spec.container_name(), count = paginating.count, "fetch page");
        let operation = OperationDescriptor::new(self.connection.query.clone(), fetch_variables);
        let current: Rc<RefCell<Option<Subscription>>> = Rc::default();
        let weak = Rc::downgrade(self);

        let cleanup: Rc<dyn Fn()> = Rc::new({
            let (weak, current) = (weak.clone(), current.clone());
            move || {
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                let current = current.borrow();
                let mut state = inner.state.borrow_mut();
                let is_current = matches!(
                    (&state.refetch_subscription, current.as_ref()),
                    (Some(active), Some(current)) if active.ptr_eq(current)
                );
                if is_current {
                    state.refetch_subscription = None;
                    state.is_a_request_in_flight = false;
                }
            }
        });
        let (on_error, on_complete) = (cleanup.clone(), cleanup.clone());
        let total_count = paginating.total_count;

        query_fetcher
            .execute(
                ExecuteOptions::new(environment.clone(), operation)
                    .cache_config(options.as_ref().map(PageOptions::cache_config))
                    .preserve_previous_references(true),
            )
            .merge_map({
                let weak = weak.clone();
                move |_| {
                    if let Some(inner) = weak.upgrade() {
                        inner.apply_page(&environment, &parent_variables, &fragment_variables, total_count);
                    }
                    Observable::from_value(())
                }
            })
            // cleanup runs before the caller's observer sees the outcome
            .tap(
                Tap::new()
                    .on_error(move |_| on_error())
                    .on_complete(move || on_complete())
                    .on_unsubscribe(move || cleanup()),
            )
            .subscribe(observer.prepend_start(move |subscription| {
                *current.borrow_mut() = Some(subscription.clone());
                if let Some(inner) = weak.upgrade() {
                    inner.state.borrow_mut().refetch_subscription = Some(subscription.clone());
                }
            }))
    }

    fn apply_page(
        &self,
        environment: &SharedEnvironment,
        parent_variables: &Variables,
        fragment_variables: &Variables,
        total_count: u64,
    ) {
        let changed = {
            let mut state = self.state.borrow_mut();
            state.context_for_children =
                RelayContext::new(environment.clone(), merge_variables(parent_variables, fragment_variables));
            let prev_data = state.resolver.resolve();
            let variables = (self.connection.get_fragment_variables)(fragment_variables, total_count);
            state.resolver.set_variables(&variables);
            let next_data = state.resolver.resolve();
            // the store may already hold the appended edges under the old count
            if *prev_data == *next_data {
                false
            } else {
                state.data = next_data;
                true
            }
        };
        if changed {
            self.scheduler.schedule();
        }
    }

    fn release(&self) {
        let (subscription, query_fetcher) = {
            let mut state = self.state.borrow_mut();
            state.resolver.dispose();
            state.is_a_request_in_flight = false;
            (state.refetch_subscription.take(), state.query_fetcher.clone())
        };
        if let Some(subscription) = subscription {
            subscription.unsubscribe();
        }
        if let Some(query_fetcher) = query_fetcher {
            query_fetcher.dispose();
        }
    }
}

/// The `relay` prop of a pagination container.
#[derive(Clone)]
pub struct PaginationRelayProp {
    pub environment: SharedEnvironment,
    pub pagination: PaginationHandle,
}

impl fmt::Debug for PaginationRelayProp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PaginationRelayProp")
            .field("is_loading", &self.pagination.is_loading())
            .finish_non_exhaustive()
    }
}

/// Paginates through the container that rendered it.
#[derive(Clone)]
pub struct PaginationHandle {
    inner: Weak<PaginationInner>,
}

impl PaginationHandle {
    fn upgrade(&self, method: &str) -> RelayResult<Rc<PaginationInner>> {
        self.inner.upgrade().ok_or_else(|| {
            RelayError::invariant(format!(
                "PaginationContainer: `{method}` called after the container was dropped"
            ))
        })
    }

    /// Returns true if the connection reports another page and a cursor to
    /// fetch it with.
    pub fn has_more(&self) -> RelayResult<bool> {
        self.upgrade("has_more")?.has_more()
    }

    /// Returns true while a page request is in flight.
    pub fn is_loading(&self) -> bool {
        self.inner.upgrade().is_some_and(|inner| inner.is_loading())
    }

    /// Fetches the next `page_size` edges. Returns `None` without fetching
    /// when the connection cannot be read; the observer then completes.
    pub fn load_more(
        &self,
        page_size: u64,
        observer: Option<ObserverOrCallback>,
        options: Option<PageOptions>,
    ) -> RelayResult<Option<Subscription>> {
        self.upgrade("load_more")?.load_more(page_size, observer, options)
    }

    /// Refetches the first `total_count` edges from the network.
    pub fn refetch_connection(
        &self,
        total_count: u64,
        observer: Option<ObserverOrCallback>,
        refetch_variables: Option<Variables>,
    ) -> RelayResult<Subscription> {
        Ok(self
            .upgrade("refetch_connection")?
            .refetch_connection(total_count, observer, refetch_variables))
    }
}

impl fmt::Debug for PaginationHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PaginationHandle")
            .field("alive", &(self.inner.strong_count() > 0))
            .finish()
    }
}

/// A fragment container whose `relay` prop loads more edges of a connection.
pub struct PaginationContainer {
    inner: Rc<PaginationInner>,
}

impl PaginationContainer {
    /// Creates the container and reads its initial data.
    ///
    /// Fails if the connection cannot be located or its direction inferred,
    /// or if no context was provided.
    pub fn new(
        spec: Rc<ContainerSpec>,
        config: ConnectionConfig,
        context: Option<&RelayContext>,
        props: Props,
    ) -> RelayResult<Self> {
        let connection = ResolvedConnection::resolve(spec.fragments(), config)?;
        let context = assert_relay_context(context)?.clone();
        let mut resolver = context.environment.create_fragment_spec_resolver(
            &context,
            &spec.container_name(),
            spec.fragments(),
            &props,
        );
        let data = resolver.resolve();

        let inner = Rc::new(PaginationInner {
            spec,
            connection,
            state: RefCell::new(PaginationState {
                context_for_children: context.clone(),
                context,
                props,
                data,
                resolver,
                local_variables: None,
                refetch_subscription: None,
                is_a_request_in_flight: false,
                query_fetcher: None,
            }),
            scheduler: UpdateScheduler::default(),
        });
        let callback = inner.resolver_callback();
        inner.state.borrow_mut().resolver.set_callback(callback);
        Ok(Self { inner })
    }

    /// Returns a handle paginating through this container.
    pub fn handle(&self) -> PaginationHandle {
        PaginationHandle {
            inner: Rc::downgrade(&self.inner),
        }
    }

    /// Returns true between the start of a page request and its end.
    pub fn is_a_request_in_flight(&self) -> bool {
        self.inner.state.borrow().is_a_request_in_flight
    }
}

impl Container for PaginationContainer {
    type Input = ContainerInput;
    type Output = Rendered<PaginationRelayProp>;

    // the resolver callback is installed at construction
    fn mounted(&self) {}

    fn update(&self, input: ContainerInput) {
        let ContainerInput { context, props } = input;
        let spec = &self.inner.spec;
        let recreate = {
            let state = self.inner.state.borrow();
            !context.same_as(&state.context) || data_ids_changed(spec.fragments(), &state.props, &props)
        };

        if recreate {
            self.inner.release();
            let mut resolver = context.environment.create_fragment_spec_resolver(
                &context,
                &spec.container_name(),
                spec.fragments(),
                &props,
            );
            resolver.set_callback(self.inner.resolver_callback());

            let mut state = self.inner.state.borrow_mut();
            state.resolver = resolver;
            state.context_for_children = context.clone();
            state.context = context;
            state.local_variables = None;
        } else {
            let mut state = self.inner.state.borrow_mut();
            if state.local_variables.is_none() {
                state.resolver.set_props(&props);
            }
        }

        let mut state = self.inner.state.borrow_mut();
        state.props = props;
        let data = state.resolver.resolve();
        state.data = data;
    }

    fn updated(&self) {}

    fn before_destroy(&self) {
        self.inner.release();
    }

    fn render(&self) -> Rendered<PaginationRelayProp> {
        let state = self.inner.state.borrow();
        Rendered {
            props: merge_props(&state.props, &state.data),
            relay: PaginationRelayProp {
                environment: state.context.environment.clone(),
                pagination: self.handle(),
            },
        }
    }

    fn context_for_children(&self) -> Option<RelayContext> {
        Some(self.inner.state.borrow().context_for_children.clone())
    }

    fn on_update(&self, callback: ScheduleUpdate) {
        self.inner.scheduler.set(callback);
    }
}

impl fmt::Debug for PaginationContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.borrow();
        f.debug_struct("PaginationContainer")
            .field("name", &self.inner.spec.container_name())
            .field("data", &state.data)
            .field("local_variables", &state.local_variables)
            .field("loading", &state.refetch_subscription.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use vrelay_runtime::{ErrorCode, FragmentMetadata, FragmentNode};

    fn connection(path: &[&str]) -> ConnectionMetadata {
        ConnectionMetadata {
            path: Some(path.iter().map(|s| s.to_string()).collect()),
            direction: Some(ConnectionDirection::Forward),
            cursor: Some("cursor".into()),
            count: Some("count".into()),
        }
    }

    fn with_connections(connections: Vec<ConnectionMetadata>) -> FragmentNode {
        FragmentNode::new("Feed_viewer").with_metadata(FragmentMetadata { connection: connections })
    }

    #[test]
    fn test_find_single_connection() {
        let mut fragments = FragmentMap::new();
        fragments.insert("viewer".into(), with_connections(vec![connection(&["feed"])]));
        fragments.insert("user".into(), FragmentNode::new("Feed_user").with_metadata(FragmentMetadata::default()));

        let found = find_connection_metadata(&fragments).unwrap();
        assert_eq!(found.prop_name.as_deref(), Some("viewer"));
        assert_eq!(found.metadata.count.as_deref(), Some("count"));
    }

    #[test]
    fn test_connection_metadata_errors() {
        let mut two_connections = FragmentMap::new();
        two_connections.insert(
            "viewer".into(),
            with_connections(vec![connection(&["feed"]), connection(&["friends"])]),
        );
        let err = find_connection_metadata(&two_connections).unwrap_err();
        assert_eq!(err.code, ErrorCode::ConnectionError);
        assert!(err.message.contains("`viewer` has 2"));

        let mut two_fragments = FragmentMap::new();
        two_fragments.insert("viewer".into(), with_connections(vec![connection(&["feed"])]));
        two_fragments.insert("user".into(), with_connections(vec![connection(&["friends"])]));
        let err = find_connection_metadata(&two_fragments).unwrap_err();
        assert!(err.message.contains("Only a single fragment"));

        let mut missing = FragmentMap::new();
        missing.insert("viewer".into(), FragmentNode::new("Feed_viewer").with_metadata(FragmentMetadata::default()));
        let err = find_connection_metadata(&missing).unwrap_err();
        assert!(err.message.contains("must be present"));

        let mut classic = FragmentMap::new();
        classic.insert("viewer".into(), FragmentNode::new("Feed_viewer"));
        assert_eq!(find_connection_metadata(&classic).unwrap(), FoundConnectionMetadata::default());
    }

    #[test]
    fn test_synthesized_functions() {
        let found = FoundConnectionMetadata {
            metadata: connection(&["feed"]),
            prop_name: Some("viewer".into()),
        };
        let get_connection = create_get_connection_from_props(&found).unwrap();
        let props = vrelay_runtime::variables_from_value(json!({
            "viewer": {"feed": {"edges": [], "pageInfo": {"hasNextPage": false}}}
        }))
        .unwrap();
        assert_eq!(get_connection(&props).unwrap()["edges"], json!([]));

        let no_viewer = vrelay_runtime::variables_from_value(json!({"viewer": null})).unwrap();
        assert!(get_connection(&no_viewer).is_none());

        let get_fragment_variables = create_get_fragment_variables(&found).unwrap();
        let variables = get_fragment_variables(&Variables::new(), 15);
        assert_eq!(variables["count"], json!(15));

        let err = create_get_connection_from_props(&FoundConnectionMetadata::default()).err().unwrap();
        assert!(err.message.contains("getConnectionFromProps"));
        let err = create_get_fragment_variables(&FoundConnectionMetadata::default()).err().unwrap();
        assert!(err.message.contains("getFragmentVariables"));
    }
}
