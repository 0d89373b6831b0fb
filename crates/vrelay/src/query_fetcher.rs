//! Coordinates one query: store lookup, network execution, store
//! subscription and the selection references keeping the result alive.
//!
//! Resources are released in a fixed order: the pending request first, then
//! the cache-only reference, then the references accumulated by executions.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};
use vrelay_runtime::{
    CacheConfig, Disposable, ExecutePayload, ExecuteRequest, Observable, Observer,
    OperationDescriptor, RelayError, RelayResult, SelectionReference, SharedEnvironment, Snapshot,
    Tap,
};

/// Outcome delivered to data change callbacks.
#[derive(Debug, Clone)]
pub enum DataChange {
    Snapshot(Snapshot),
    Error(RelayError),
}

impl DataChange {
    /// Returns the snapshot, if any.
    pub fn snapshot(&self) -> Option<&Snapshot> {
        match self {
            Self::Snapshot(snapshot) => Some(snapshot),
            Self::Error(_) => None,
        }
    }

    /// Returns the error, if any.
    pub fn error(&self) -> Option<&RelayError> {
        match self {
            Self::Error(error) => Some(error),
            Self::Snapshot(_) => None,
        }
    }
}

/// Callback receiving data changes of the current fetch.
pub type OnDataChange = Rc<dyn Fn(DataChange)>;

/// Arguments to [`QueryFetcher::fetch`].
#[derive(Clone)]
pub struct FetchOptions {
    pub environment: SharedEnvironment,
    pub operation: OperationDescriptor,
    pub cache_config: Option<CacheConfig>,
    pub on_data_change: Option<OnDataChange>,
}

impl FetchOptions {
    /// Creates options without cache configuration or callback.
    pub fn new(environment: SharedEnvironment, operation: OperationDescriptor) -> Self {
        Self {
            environment,
            operation,
            cache_config: None,
            on_data_change: None,
        }
    }

    /// Sets the cache configuration.
    pub fn cache_config(mut self, cache_config: Option<CacheConfig>) -> Self {
        self.cache_config = cache_config;
        self
    }

    /// Sets the data change callback.
    pub fn on_data_change(mut self, callback: impl Fn(DataChange) + 'static) -> Self {
        self.on_data_change = Some(Rc::new(callback));
        self
    }
}

impl fmt::Debug for FetchOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchOptions")
            .field("operation", &self.operation.name())
            .field("cache_config", &self.cache_config)
            .field("on_data_change", &self.on_data_change.is_some())
            .finish_non_exhaustive()
    }
}

/// Arguments to [`QueryFetcher::execute`].
#[derive(Clone)]
pub struct ExecuteOptions {
    pub environment: SharedEnvironment,
    pub operation: OperationDescriptor,
    pub cache_config: Option<CacheConfig>,
    /// Keep the references of earlier executions when this one completes.
    pub preserve_previous_references: bool,
}

impl ExecuteOptions {
    /// Creates options that release earlier references on completion.
    pub fn new(environment: SharedEnvironment, operation: OperationDescriptor) -> Self {
        Self {
            environment,
            operation,
            cache_config: None,
            preserve_previous_references: false,
        }
    }

    /// Sets the cache configuration.
    pub fn cache_config(mut self, cache_config: Option<CacheConfig>) -> Self {
        self.cache_config = cache_config;
        self
    }

    /// Sets `preserve_previous_references`.
    pub fn preserve_previous_references(mut self, preserve: bool) -> Self {
        self.preserve_previous_references = preserve;
        self
    }
}

/// Selection references moved from one fetcher to its successor.
#[derive(Debug, Default)]
pub struct SelectionReferences {
    pub cache_selection_reference: Option<SelectionReference>,
    pub selection_references: Vec<SelectionReference>,
}

impl SelectionReferences {
    /// Returns the number of references held.
    pub fn len(&self) -> usize {
        self.selection_references.len() + usize::from(self.cache_selection_reference.is_some())
    }

    /// Returns true if no reference is held.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Releases every reference, cache reference first.
    pub fn dispose(self) {
        if let Some(reference) = self.cache_selection_reference {
            reference.dispose();
        }
        for reference in self.selection_references {
            reference.dispose();
        }
    }
}

struct StoredFetch {
    environment: SharedEnvironment,
    operation: OperationDescriptor,
    cache_config: Option<CacheConfig>,
    callbacks: Vec<OnDataChange>,
}

#[derive(Default)]
struct FetcherState {
    fetch_options: Option<StoredFetch>,
    pending_request: Option<Disposable>,
    request_generation: u64,
    root_subscription: Option<Disposable>,
    selection_references: Vec<SelectionReference>,
    cache_selection_reference: Option<SelectionReference>,
    snapshot: Option<Snapshot>,
    error: Option<RelayError>,
    call_on_data_change_when_set: bool,
}

impl FetcherState {
    fn callbacks(&self) -> Vec<OnDataChange> {
        self.fetch_options
            .as_ref()
            .map(|options| options.callbacks.clone())
            .unwrap_or_default()
    }
}

fn notify(callbacks: &[OnDataChange], change: &DataChange) {
    for callback in callbacks {
        callback(change.clone());
    }
}

/// Fetches a query and keeps its data retained and observed.
///
/// Cloning returns a handle to the same fetcher.
#[derive(Clone, Default)]
pub struct QueryFetcher {
    state: Rc<RefCell<FetcherState>>,
}

impl QueryFetcher {
    /// Creates a fetcher holding no references.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a fetcher taking ownership of a predecessor's references.
    pub fn with_references(references: SelectionReferences) -> Self {
        let state = FetcherState {
            cache_selection_reference: references.cache_selection_reference,
            selection_references: references.selection_references,
            ..Default::default()
        };
        Self {
            state: Rc::new(RefCell::new(state)),
        }
    }

    fn from_weak(state: &Weak<RefCell<FetcherState>>) -> Option<Self> {
        state.upgrade().map(|state| Self { state })
    }

    /// Moves the held selection references out of the fetcher.
    pub fn take_selection_references(&self) -> SelectionReferences {
        let mut state = self.state.borrow_mut();
        SelectionReferences {
            cache_selection_reference: state.cache_selection_reference.take(),
            selection_references: std::mem::take(&mut state.selection_references),
        }
    }

    /// Returns the number of selection references held, the cache-only
    /// reference included.
    pub fn selection_reference_count(&self) -> usize {
        let state = self.state.borrow();
        state.selection_references.len() + usize::from(state.cache_selection_reference.is_some())
    }

    /// Returns the snapshot of the current fetch.
    pub fn snapshot(&self) -> Option<Snapshot> {
        self.state.borrow().snapshot.clone()
    }

    /// Returns the error of the current fetch.
    pub fn error(&self) -> Option<RelayError> {
        self.state.borrow().error.clone()
    }

    /// Returns true while a network request is in flight.
    pub fn is_fetching(&self) -> bool {
        self.state.borrow().pending_request.is_some()
    }

    /// Reads the operation from the store if all of its data is present,
    /// retaining it in place of any previous cache-only reference.
    pub fn lookup_in_store(
        &self,
        environment: &SharedEnvironment,
        operation: &OperationDescriptor,
    ) -> Option<Snapshot> {
        if !environment.check(&operation.root) {
            return None;
        }
        self.dispose_cache_selection_reference();
        let reference = environment.retain(&operation.root);
        self.state.borrow_mut().cache_selection_reference = Some(reference);
        Some(environment.lookup(&operation.fragment))
    }

    /// Returns a cold observable executing the operation.
    ///
    /// Every payload's root is retained. On completion, earlier references
    /// are released unless `preserve_previous_references` is set, and the new
    /// ones are kept. On error or cancellation, the new references join the
    /// held ones so the next fetch or [`dispose`](Self::dispose) releases them.
    pub fn execute(&self, options: ExecuteOptions) -> Observable<ExecutePayload> {
        let state = Rc::downgrade(&self.state);
        let ExecuteOptions {
            environment,
            operation,
            cache_config,
            preserve_previous_references,
        } = options;

        Observable::defer(move || {
            let next_references: Rc<RefCell<Vec<SelectionReference>>> = Rc::default();
            let keep = {
                let (state, next_references) = (state.clone(), next_references.clone());
                move || {
                    let references = std::mem::take(&mut *next_references.borrow_mut());
                    match QueryFetcher::from_weak(&state) {
                        Some(fetcher) => fetcher.state.borrow_mut().selection_references.extend(references),
                        None => drop(references),
                    }
                }
            };
            let keep = Rc::new(keep);

            environment
                .execute(ExecuteRequest::new(operation.clone()).with_cache_config(cache_config.clone()))
                .tap(
                    Tap::new()
                        .on_next({
                            let (environment, next_references) = (environment.clone(), next_references.clone());
                            move |payload: &ExecutePayload| {
                                let reference = environment.retain(&payload.operation.root);
                                next_references.borrow_mut().push(reference);
                            }
                        })
                        .on_error({
                            let keep = keep.clone();
                            move |_| keep()
                        })
                        .on_complete({
                            let (state, keep) = (state.clone(), keep.clone());
                            move || {
                                if !preserve_previous_references {
                                    if let Some(fetcher) = QueryFetcher::from_weak(&state) {
                                        fetcher.dispose_selection_references();
                                    }
                                }
                                keep();
                            }
                        })
                        .on_unsubscribe(move || keep()),
                )
        })
    }

    /// Starts fetching, cancelling the previous request.
    ///
    /// A callback in `options` replaces the registered ones; without one the
    /// registered callbacks carry over.
    ///
    /// Returns the snapshot if data arrived before returning, or the error
    /// if the execution failed before returning. Anything later reaches the
    /// registered data change callbacks only.
    pub fn fetch(&self, options: FetchOptions) -> RelayResult<Option<Snapshot>> {
        let FetchOptions {
            environment,
            operation,
            cache_config,
            on_data_change,
        } = options;
        tracing::debug!(operation = operation.name(), "fetch");

        self.dispose_request();
        {
            let mut state = self.state.borrow_mut();
            let previous = state
                .fetch_options
                .take()
                .map(|previous| previous.callbacks)
                .unwrap_or_default();
            let callbacks = match on_data_change {
                Some(callback) => vec![callback],
                None => previous,
            };
            state.fetch_options = Some(StoredFetch {
                environment: environment.clone(),
                operation: operation.clone(),
                cache_config: cache_config.clone(),
                callbacks,
            });
        }

        let generation = {
            let mut state = self.state.borrow_mut();
            state.request_generation = state.request_generation.wrapping_add(1);
            state.request_generation
        };
        let fetch_has_returned = Rc::new(Cell::new(false));
        let sync_error: Rc<RefCell<Option<RelayError>>> = Rc::default();
        let weak = Rc::downgrade(&self.state);

        let request = self
            .execute(ExecuteOptions::new(environment, operation).cache_config(cache_config))
            .finally({
                let weak = weak.clone();
                move || {
                    let Some(fetcher) = QueryFetcher::from_weak(&weak) else {
                        return;
                    };
                    // a callback may already have started the next request
                    let finished = {
                        let mut state = fetcher.state.borrow_mut();
                        if state.request_generation == generation {
                            state.pending_request.take()
                        } else {
                            None
                        }
                    };
                    if let Some(finished) = finished {
                        finished.forget();
                    }
                }
            })
            .subscribe(
                Observer::new()
                    .on_next({
                        let (weak, fetch_has_returned) = (weak.clone(), fetch_has_returned.clone());
                        move |_| {
                            let Some(fetcher) = QueryFetcher::from_weak(&weak) else {
                                return;
                            };
                            {
                                let mut state = fetcher.state.borrow_mut();
                                state.call_on_data_change_when_set = true;
                                state.error = None;
                            }
                            if let Err(error) = fetcher.on_query_data_available(fetch_has_returned.get()) {
                                tracing::error!(%error, "query data arrived without fetch options");
                            }
                        }
                    })
                    .on_error({
                        let (fetch_has_returned, sync_error) = (fetch_has_returned.clone(), sync_error.clone());
                        move |error| {
                            let Some(fetcher) = QueryFetcher::from_weak(&weak) else {
                                return;
                            };
                            let callbacks = {
                                let mut state = fetcher.state.borrow_mut();
                                state.call_on_data_change_when_set = true;
                                state.error = Some(error.clone());
                                state.snapshot = None;
                                state.callbacks()
                            };
                            if fetch_has_returned.get() {
                                tracing::debug!(%error, "fetch failed");
                                notify(&callbacks, &DataChange::Error(error));
                            } else {
                                *sync_error.borrow_mut() = Some(error);
                            }
                        }
                    }),
            );

        let superseded = {
            let mut state = self.state.borrow_mut();
            if request.closed() {
                false
            } else if state.request_generation == generation {
                state.pending_request = Some(request.clone().into_disposable());
                false
            } else {
                true
            }
        };
        if superseded {
            request.unsubscribe();
        }
        fetch_has_returned.set(true);

        let error = sync_error.borrow_mut().take();
        match error {
            Some(error) => Err(error),
            None => Ok(self.snapshot()),
        }
    }

    /// Replays the last fetch with the same options and callbacks.
    pub fn retry(&self) -> RelayResult<Option<Snapshot>> {
        let options = {
            let state = self.state.borrow();
            let stored = state.fetch_options.as_ref().ok_or_else(|| {
                RelayError::invariant("QueryFetcher: `retry` should be called after having called `fetch`")
            })?;
            FetchOptions {
                environment: stored.environment.clone(),
                operation: stored.operation.clone(),
                cache_config: stored.cache_config.clone(),
                on_data_change: None,
            }
        };
        self.fetch(options)
    }

    /// Registers a data change callback for the current fetch. If data or an
    /// error already arrived, the callback receives it immediately.
    pub fn set_on_data_change(&self, callback: impl Fn(DataChange) + 'static) -> RelayResult<()> {
        let callback: OnDataChange = Rc::new(callback);
        let buffered = {
            let mut state = self.state.borrow_mut();
            let stored = state.fetch_options.as_mut().ok_or_else(|| {
                RelayError::invariant(
                    "QueryFetcher: `set_on_data_change` should have been called after having called `fetch`",
                )
            })?;
            stored.callbacks.push(callback.clone());

            if !state.call_on_data_change_when_set {
                None
            } else if let Some(error) = &state.error {
                Some(DataChange::Error(error.clone()))
            } else {
                state.snapshot.clone().map(DataChange::Snapshot)
            }
        };
        if let Some(change) = buffered {
            callback(change);
        }
        Ok(())
    }

    fn on_query_data_available(&self, notify_first_result: bool) -> RelayResult<()> {
        let (environment, operation) = {
            let state = self.state.borrow();
            let stored = state.fetch_options.as_ref().ok_or_else(|| {
                RelayError::invariant(
                    "QueryFetcher: `on_query_data_available` should have been called after having called `fetch`",
                )
            })?;
            // only the first payload of a fetch is reported; later store
            // changes arrive through the root subscription
            if state.snapshot.is_some() {
                return Ok(());
            }
            (stored.environment.clone(), stored.operation.clone())
        };

        let snapshot = environment.lookup(&operation.fragment);
        let weak = Rc::downgrade(&self.state);
        let root_subscription = environment.subscribe(
            &snapshot,
            Box::new(move |snapshot| {
                if let Some(fetcher) = QueryFetcher::from_weak(&weak) {
                    let callbacks = fetcher.state.borrow().callbacks();
                    notify(&callbacks, &DataChange::Snapshot(snapshot));
                }
            }),
        );

        let (previous, callbacks) = {
            let mut state = self.state.borrow_mut();
            state.snapshot = Some(snapshot.clone());
            (state.root_subscription.replace(root_subscription), state.callbacks())
        };
        if let Some(previous) = previous {
            previous.dispose();
        }
        if notify_first_result {
            notify(&callbacks, &DataChange::Snapshot(snapshot));
        }
        Ok(())
    }

    /// Cancels the pending request and the root subscription and forgets
    /// the current snapshot. Selection references are kept.
    pub fn dispose_request(&self) {
        let (pending_request, root_subscription) = {
            let mut state = self.state.borrow_mut();
            state.snapshot = None;
            state.error = None;
            state.call_on_data_change_when_set = false;
            (state.pending_request.take(), state.root_subscription.take())
        };
        if let Some(request) = pending_request {
            request.dispose();
        }
        if let Some(subscription) = root_subscription {
            subscription.dispose();
        }
    }

    fn dispose_cache_selection_reference(&self) {
        let reference = self.state.borrow_mut().cache_selection_reference.take();
        if let Some(reference) = reference {
            reference.dispose();
        }
    }

    fn dispose_selection_references(&self) {
        self.dispose_cache_selection_reference();
        let references = std::mem::take(&mut self.state.borrow_mut().selection_references);
        tracing::trace!(count = references.len(), "releasing selection references");
        for reference in references {
            reference.dispose();
        }
    }

    /// Releases everything the fetcher holds. Safe to call repeatedly.
    pub fn dispose(&self) {
        self.dispose_request();
        self.dispose_selection_references();
    }
}

impl fmt::Debug for QueryFetcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("QueryFetcher")
            .field("operation", &state.fetch_options.as_ref().map(|o| o.operation.name().to_string()))
            .field("pending_request", &state.pending_request.is_some())
            .field("selection_references", &state.selection_references.len())
            .field("snapshot", &state.snapshot.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use vrelay_runtime::{ConcreteRequest, ErrorCode, GraphQLResponse, MemoryEnvironment, QueuedNetwork, Variables};

    fn operation() -> OperationDescriptor {
        OperationDescriptor::new(
            Rc::new(ConcreteRequest::query("ViewerQuery", "query ViewerQuery { viewer { id } }")),
            Variables::new(),
        )
    }

    fn recorder() -> (Rc<RefCell<Vec<DataChange>>>, impl Fn(DataChange) + 'static) {
        let changes: Rc<RefCell<Vec<DataChange>>> = Rc::default();
        let sink = changes.clone();
        (changes, move |change| sink.borrow_mut().push(change))
    }

    #[test]
    fn test_set_on_data_change_requires_fetch() {
        let fetcher = QueryFetcher::new();
        let err = fetcher.set_on_data_change(|_| {}).unwrap_err();
        assert_eq!(err.code, ErrorCode::Invariant);
    }

    #[test]
    fn test_late_callback_receives_buffered_snapshot() {
        let network = QueuedNetwork::new();
        let environment = MemoryEnvironment::new(network.clone());
        let fetcher = QueryFetcher::new();

        let result = fetcher.fetch(FetchOptions::new(environment.shared(), operation()));
        assert!(result.unwrap().is_none());
        network.resolve(GraphQLResponse::data(json!({"viewer": {"id": "1"}})));
        assert!(fetcher.snapshot().is_some());

        let (changes, callback) = recorder();
        fetcher.set_on_data_change(callback).unwrap();
        assert_eq!(changes.borrow().len(), 1);
        assert!(changes.borrow()[0].snapshot().is_some());
    }

    #[test]
    fn test_late_callback_receives_buffered_error() {
        let network = QueuedNetwork::new();
        let environment = MemoryEnvironment::new(network.clone());
        let fetcher = QueryFetcher::new();

        fetcher
            .fetch(FetchOptions::new(environment.shared(), operation()))
            .unwrap();
        network.reject(RelayError::network("offline"));

        let (changes, callback) = recorder();
        fetcher.set_on_data_change(callback).unwrap();
        assert_eq!(changes.borrow()[0].error().unwrap().message, "offline");
    }

    #[test]
    fn test_late_callback_without_outcome_waits() {
        let network = QueuedNetwork::new();
        let environment = MemoryEnvironment::new(network.clone());
        let fetcher = QueryFetcher::new();
        fetcher
            .fetch(FetchOptions::new(environment.shared(), operation()))
            .unwrap();

        let (changes, callback) = recorder();
        fetcher.set_on_data_change(callback).unwrap();
        assert!(changes.borrow().is_empty());

        network.resolve(GraphQLResponse::data(json!({"viewer": {"id": "1"}})));
        assert_eq!(changes.borrow().len(), 1);
    }

    #[test]
    fn test_references_move_to_successor() {
        let network = QueuedNetwork::new();
        let environment = MemoryEnvironment::new(network.clone());
        let fetcher = QueryFetcher::new();
        fetcher
            .fetch(FetchOptions::new(environment.shared(), operation()))
            .unwrap();
        network.resolve(GraphQLResponse::data(json!({"viewer": {"id": "1"}})));
        assert_eq!(fetcher.selection_reference_count(), 1);

        fetcher.dispose_request();
        let successor = QueryFetcher::with_references(fetcher.take_selection_references());
        fetcher.dispose();
        assert_eq!(environment.total_retain_count(), 1);

        successor.dispose();
        assert_eq!(environment.total_retain_count(), 0);
    }

    #[test]
    fn test_finished_request_is_not_pending() {
        let network = QueuedNetwork::new();
        let environment = MemoryEnvironment::new(network.clone());
        let fetcher = QueryFetcher::new();
        fetcher
            .fetch(FetchOptions::new(environment.shared(), operation()))
            .unwrap();
        assert!(fetcher.is_fetching());

        network.resolve(GraphQLResponse::data(json!({"viewer": {"id": "1"}})));
        assert!(!fetcher.is_fetching());
    }
}
