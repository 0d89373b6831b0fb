//! Root container: fetches a query and renders its data, loading state or
//! error, and provides the relay context to nested containers.

use crate::config::DataFrom;
use crate::container::{Container, ScheduleUpdate, UpdateScheduler};
use crate::query_fetcher::{DataChange, FetchOptions, OnDataChange, QueryFetcher};
use crate::request_cache::{request_cache_key, RequestCache};
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use vrelay_runtime::{
    same_environment, CacheConfig, ConcreteRequest, OperationDescriptor, RelayContext, RelayError,
    RelayResult, SharedEnvironment, Snapshot, Variables,
};

/// Props of a [`QueryRenderer`].
#[derive(Clone)]
pub struct QueryRendererProps {
    pub environment: SharedEnvironment,
    pub query: Option<Rc<ConcreteRequest>>,
    pub variables: Variables,
    pub cache_config: Option<CacheConfig>,
    pub data_from: DataFrom,
}

impl QueryRendererProps {
    pub fn new(environment: SharedEnvironment, query: Option<Rc<ConcreteRequest>>) -> Self {
        Self {
            environment,
            query,
            variables: Variables::new(),
            cache_config: None,
            data_from: DataFrom::default(),
        }
    }

    pub fn variables(mut self, variables: Variables) -> Self {
        self.variables = variables;
        self
    }

    pub fn cache_config(mut self, cache_config: CacheConfig) -> Self {
        self.cache_config = Some(cache_config);
        self
    }

    pub fn data_from(mut self, data_from: DataFrom) -> Self {
        self.data_from = data_from;
        self
    }
}

impl fmt::Debug for QueryRendererProps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryRendererProps")
            .field("query", &self.query.as_ref().map(|query| query.params.name.as_str()))
            .field("variables", &self.variables)
            .field("cache_config", &self.cache_config)
            .field("data_from", &self.data_from)
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
struct RetryCallbacks {
    handle_data_change: RefCell<Option<OnDataChange>>,
    handle_retry_after_error: RefCell<Option<Rc<dyn Fn()>>>,
}

/// Re-runs the renderer's query.
#[derive(Clone)]
pub struct Retry {
    query_fetcher: QueryFetcher,
    callbacks: Rc<RetryCallbacks>,
    after_error: bool,
}

impl Retry {
    /// Refetches. Data available synchronously is rendered right away;
    /// otherwise a renderer showing an error goes back to loading.
    pub fn retry(&self) -> RelayResult<()> {
        let sync_snapshot = self.query_fetcher.retry()?;
        let handle_data_change = self.callbacks.handle_data_change.borrow().clone();
        match (sync_snapshot, handle_data_change) {
            (Some(snapshot), Some(handle_data_change)) => handle_data_change(DataChange::Snapshot(snapshot)),
            _ if self.after_error => {
                let handle_retry_after_error = self.callbacks.handle_retry_after_error.borrow().clone();
                if let Some(handle_retry_after_error) = handle_retry_after_error {
                    handle_retry_after_error();
                }
            }
            _ => {}
        }
        Ok(())
    }
}

impl fmt::Debug for Retry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Retry")
            .field("after_error", &self.after_error)
            .finish_non_exhaustive()
    }
}

fn serialize_retry<S: Serializer>(retry: &Option<Retry>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_bool(retry.is_some())
}

/// What the renderer hands to its slot.
///
/// `props: None` without an error means loading; `props: Some({})` means
/// there is no query to render.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RenderProps {
    pub error: Option<RelayError>,
    pub props: Option<Value>,
    #[serde(serialize_with = "serialize_retry")]
    pub retry: Option<Retry>,
}

impl RenderProps {
    fn loading() -> Self {
        Self::default()
    }

    fn empty() -> Self {
        Self {
            props: Some(Value::Object(Map::new())),
            ..Self::default()
        }
    }

    fn new(
        error: Option<RelayError>,
        snapshot: Option<&Snapshot>,
        query_fetcher: &QueryFetcher,
        callbacks: &Rc<RetryCallbacks>,
    ) -> Self {
        let retry = Retry {
            query_fetcher: query_fetcher.clone(),
            callbacks: callbacks.clone(),
            after_error: error.is_some(),
        };
        let props = match (&error, snapshot) {
            (None, Some(snapshot)) => snapshot.data().cloned(),
            _ => None,
        };
        Self {
            error,
            props,
            retry: Some(retry),
        }
    }

    pub fn is_loading(&self) -> bool {
        self.error.is_none() && self.props.is_none()
    }
}

struct ComputedState {
    error: Option<RelayError>,
    relay_context: RelayContext,
    render_props: RenderProps,
    snapshot: Option<Snapshot>,
    request_cache_key: Option<String>,
}

fn fetch_query_and_compute_state(
    props: &QueryRendererProps,
    query_fetcher: &QueryFetcher,
    callbacks: &Rc<RetryCallbacks>,
    cache_key: Option<String>,
    request_cache: &RequestCache,
) -> ComputedState {
    let environment = &props.environment;
    let Some(query) = &props.query else {
        query_fetcher.dispose();
        return ComputedState {
            error: None,
            relay_context: RelayContext::new(environment.clone(), props.variables.clone()),
            render_props: RenderProps::empty(),
            snapshot: None,
            request_cache_key: None,
        };
    };

    let operation = OperationDescriptor::new(query.clone(), props.variables.clone());
    let relay_context = RelayContext::new(environment.clone(), operation.variables.clone());

    // the same request is already in flight
    if let Some(entry) = cache_key.as_deref().and_then(|key| request_cache.get(key)) {
        let render_props = match &entry.snapshot {
            Some(snapshot) => RenderProps::new(None, Some(snapshot), query_fetcher, callbacks),
            None => RenderProps::loading(),
        };
        return ComputedState {
            error: None,
            relay_context,
            render_props,
            snapshot: entry.snapshot,
            request_cache_key: cache_key,
        };
    }

    let store_snapshot = match props.data_from {
        DataFrom::StoreThenNetwork => query_fetcher.lookup_in_store(environment, &operation),
        DataFrom::NetworkOnly => None,
    };
    let fetched = query_fetcher.fetch(FetchOptions {
        environment: environment.clone(),
        operation,
        cache_config: props.cache_config.clone(),
        on_data_change: callbacks.handle_data_change.borrow().clone(),
    });

    match fetched {
        Ok(query_snapshot) => {
            // network data first, it may be fresher
            let snapshot = query_snapshot.or(store_snapshot);
            let key = cache_key.unwrap_or_else(|| request_cache_key(&query.params, &props.variables));
            request_cache.insert(key.clone(), query_fetcher.clone(), snapshot.clone());

            let render_props = match &snapshot {
                Some(snapshot) => RenderProps::new(None, Some(snapshot), query_fetcher, callbacks),
                None => RenderProps::loading(),
            };
            ComputedState {
                error: None,
                relay_context,
                render_props,
                snapshot,
                request_cache_key: Some(key),
            }
        }
        Err(error) => {
            tracing::debug!(%error, query = %query.params.name, "query failed synchronously");
            ComputedState {
                error: Some(error.clone()),
                relay_context,
                render_props: RenderProps::new(Some(error), None, query_fetcher, callbacks),
                snapshot: None,
                request_cache_key: cache_key,
            }
        }
    }
}

fn same_query(a: &Option<Rc<ConcreteRequest>>, b: &Option<Rc<ConcreteRequest>>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => Rc::ptr_eq(a, b),
        (None, None) => true,
        _ => false,
    }
}

fn same_snapshot(a: Option<&Snapshot>, b: Option<&Snapshot>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => a.ptr_eq(b),
        (None, None) => true,
        _ => false,
    }
}

struct RendererState {
    prev_environment: SharedEnvironment,
    prev_query: Option<Rc<ConcreteRequest>>,
    prev_variables: Variables,
    query_fetcher: QueryFetcher,
    retry_callbacks: Rc<RetryCallbacks>,
    render_props: RenderProps,
    relay_context: RelayContext,
    snapshot: Option<Snapshot>,
    error: Option<RelayError>,
    request_cache_key: Option<String>,
}

impl RendererState {
    fn apply(&mut self, computed: ComputedState) {
        self.error = computed.error;
        self.relay_context = computed.relay_context;
        self.render_props = computed.render_props;
        self.snapshot = computed.snapshot;
        self.request_cache_key = computed.request_cache_key;
    }
}

struct RendererInner {
    request_cache: RequestCache,
    state: RefCell<RendererState>,
    scheduler: UpdateScheduler,
}

impl RendererInner {
    fn handle_data_change(&self, change: DataChange) {
        let changed = {
            let mut state = self.state.borrow_mut();
            if let Some(key) = state.request_cache_key.take() {
                self.request_cache.remove(&key);
            }
            let (snapshot, error) = match change {
                DataChange::Snapshot(snapshot) => (Some(snapshot), None),
                DataChange::Error(error) => (None, Some(error)),
            };
            if same_snapshot(snapshot.as_ref(), state.snapshot.as_ref()) && error == state.error {
                false
            } else {
                state.render_props =
                    RenderProps::new(error.clone(), snapshot.as_ref(), &state.query_fetcher, &state.retry_callbacks);
                state.snapshot = snapshot;
                state.error = error;
                true
            }
        };
        if changed {
            self.scheduler.schedule();
        }
    }

    fn handle_retry_after_error(&self) {
        {
            let mut state = self.state.borrow_mut();
            if let Some(key) = state.request_cache_key.take() {
                self.request_cache.remove(&key);
            }
            state.render_props = RenderProps::loading();
        }
        self.scheduler.schedule();
    }
}

/// Fetches a query and renders [`RenderProps`].
pub struct QueryRenderer {
    inner: Rc<RendererInner>,
}

impl QueryRenderer {
    /// Creates the renderer and starts fetching. Requests with the same
    /// query and variables share one fetch through `request_cache` until
    /// the first of them mounts.
    pub fn new(props: QueryRendererProps, request_cache: RequestCache) -> Self {
        let retry_callbacks = Rc::new(RetryCallbacks::default());
        let (query_fetcher, cache_key) = match &props.query {
            Some(query) => {
                let key = request_cache_key(&query.params, &props.variables);
                let query_fetcher = request_cache
                    .get(&key)
                    .map(|entry| entry.query_fetcher)
                    .unwrap_or_default();
                (query_fetcher, Some(key))
            }
            None => (QueryFetcher::new(), None),
        };
        let computed =
            fetch_query_and_compute_state(&props, &query_fetcher, &retry_callbacks, cache_key, &request_cache);

        let state = RendererState {
            prev_environment: props.environment,
            prev_query: props.query,
            prev_variables: props.variables,
            query_fetcher,
            retry_callbacks,
            render_props: computed.render_props,
            relay_context: computed.relay_context,
            snapshot: computed.snapshot,
            error: computed.error,
            request_cache_key: computed.request_cache_key,
        };
        Self {
            inner: Rc::new(RendererInner {
                request_cache,
                state: RefCell::new(state),
                scheduler: UpdateScheduler::default(),
            }),
        }
    }

    /// Returns the key under which this renderer's request is cached, until
    /// the entry is released.
    pub fn request_cache_key(&self) -> Option<String> {
        self.inner.state.borrow().request_cache_key.clone()
    }
}

impl Container for QueryRenderer {
    type Input = QueryRendererProps;
    type Output = RenderProps;

    fn mounted(&self) {
        let (key, query_fetcher, callbacks, has_query) = {
            let state = self.inner.state.borrow();
            (
                state.request_cache_key.clone(),
                state.query_fetcher.clone(),
                state.retry_callbacks.clone(),
                state.prev_query.is_some(),
            )
        };
        if let Some(key) = key {
            self.inner.request_cache.remove(&key);
        }

        let handle_data_change: OnDataChange = Rc::new({
            let weak = Rc::downgrade(&self.inner);
            move |change| {
                if let Some(inner) = weak.upgrade() {
                    inner.handle_data_change(change);
                }
            }
        });
        *callbacks.handle_data_change.borrow_mut() = Some(handle_data_change.clone());
        *callbacks.handle_retry_after_error.borrow_mut() = Some(Rc::new({
            let weak = Rc::downgrade(&self.inner);
            move || {
                if let Some(inner) = weak.upgrade() {
                    inner.handle_retry_after_error();
                }
            }
        }));

        // data may have arrived since construction
        if has_query {
            if let Err(error) = query_fetcher.set_on_data_change(move |change| handle_data_change(change)) {
                tracing::error!(%error, "query renderer mounted without a fetch");
            }
        }
    }

    fn update(&self, props: QueryRendererProps) {
        let (previous_fetcher, callbacks) = {
            let state = self.inner.state.borrow();
            let unchanged = same_query(&state.prev_query, &props.query)
                && same_environment(&state.prev_environment, &props.environment)
                && state.prev_variables == props.variables;
            if unchanged {
                return;
            }
            (state.query_fetcher.clone(), state.retry_callbacks.clone())
        };

        let references = previous_fetcher.take_selection_references();
        previous_fetcher.dispose_request();

        let cached = props.query.as_ref().and_then(|query| {
            self.inner
                .request_cache
                .get(&request_cache_key(&query.params, &props.variables))
        });
        let query_fetcher = match cached {
            Some(entry) => {
                // the cached fetcher holds its own references
                references.dispose();
                entry.query_fetcher
            }
            None => QueryFetcher::with_references(references),
        };
        let computed = fetch_query_and_compute_state(
            &props,
            &query_fetcher,
            &callbacks,
            None,
            &self.inner.request_cache,
        );

        let mut state = self.inner.state.borrow_mut();
        state.prev_environment = props.environment;
        state.prev_query = props.query;
        state.prev_variables = props.variables;
        state.query_fetcher = query_fetcher;
        state.apply(computed);
    }

    fn updated(&self) {
        let key = self.inner.state.borrow_mut().request_cache_key.take();
        if let Some(key) = key {
            self.inner.request_cache.remove(&key);
        }
    }

    fn before_destroy(&self) {
        let query_fetcher = self.inner.state.borrow().query_fetcher.clone();
        query_fetcher.dispose();
    }

    fn render(&self) -> RenderProps {
        self.inner.state.borrow().render_props.clone()
    }

    fn context_for_children(&self) -> Option<RelayContext> {
        Some(self.inner.state.borrow().relay_context.clone())
    }

    fn on_update(&self, callback: ScheduleUpdate) {
        self.inner.scheduler.set(callback);
    }
}

impl fmt::Debug for QueryRenderer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.borrow();
        f.debug_struct("QueryRenderer")
            .field("query", &state.prev_query.as_ref().map(|query| query.params.name.as_str()))
            .field("render_props", &state.render_props)
            .field("request_cache_key", &state.request_cache_key)
            .finish()
    }
}
