use super::network::Network;
use super::store::{ConnectionPage, Record, RecordStore};
use crate::disposable::{Disposable, SelectionReference};
use crate::environment::{Environment, ExecutePayload, ExecuteRequest, SharedEnvironment};
use crate::error::RelayError;
use crate::fragment::{ConnectionDirection, ConnectionMetadata};
use crate::observable::Observable;
use crate::operation::{OperationDescriptor, Selector};
use crate::snapshot::Snapshot;
use crate::variables::Variables;
use rustc_hash::FxHashSet;
use serde_json::Value;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

struct StoreSubscription {
    id: u64,
    snapshot: Snapshot,
    callback: Rc<dyn Fn(Snapshot)>,
}

struct PagedConnection {
    field: String,
    direction: ConnectionDirection,
    cursor_variable: String,
}

struct Inner {
    store: RefCell<RecordStore>,
    network: Box<dyn Network>,
    subscriptions: RefCell<Vec<StoreSubscription>>,
    next_subscription_id: Cell<u64>,
    connections: RefCell<Vec<PagedConnection>>,
}

impl Inner {
    fn read(&self, selector: &Selector) -> Snapshot {
        let result = self.store.borrow().read(&selector.data_id);
        Snapshot::new(
            selector.clone(),
            result.data,
            result.seen_records,
            result.is_missing_data,
        )
    }

    fn publish(&self, id: &str, data: &Value) {
        self.publish_page(id, data, &[]);
    }

    fn publish_page(&self, id: &str, data: &Value, pages: &[ConnectionPage]) {
        let updated = self.store.borrow_mut().publish_page(id, data, pages);
        self.notify(&updated);
    }

    fn connection_pages(&self, variables: &Variables) -> Vec<ConnectionPage> {
        self.connections
            .borrow()
            .iter()
            .map(|connection| ConnectionPage {
                field: connection.field.clone(),
                direction: connection.direction,
                cursor: variables
                    .get(&connection.cursor_variable)
                    .and_then(Value::as_str)
                    .map(str::to_string),
            })
            .collect()
    }

    fn notify(&self, updated: &FxHashSet<String>) {
        if updated.is_empty() {
            return;
        }
        let affected: Vec<(u64, Snapshot, Rc<dyn Fn(Snapshot)>)> = self
            .subscriptions
            .borrow()
            .iter()
            .filter(|subscription| {
                subscription
                    .snapshot
                    .seen_records()
                    .iter()
                    .any(|id| updated.contains(id))
            })
            .map(|subscription| (subscription.id, subscription.snapshot.clone(), subscription.callback.clone()))
            .collect();

        for (id, previous, callback) in affected {
            let next = self.read(previous.selector());
            let live = self
                .subscriptions
                .borrow_mut()
                .iter_mut()
                .find(|subscription| subscription.id == id)
                .map(|subscription| subscription.snapshot = next.clone())
                .is_some();
            // an earlier callback may have unsubscribed this one
            if live && next != previous {
                callback(next);
            }
        }
    }
}

/// An [`Environment`] backed by an in-memory [`RecordStore`].
///
/// Clones share the same store. Responses are committed under the root
/// record of the operation that fetched them.
#[derive(Clone)]
pub struct MemoryEnvironment {
    inner: Rc<Inner>,
}

impl MemoryEnvironment {
    /// Creates an environment with an empty store.
    pub fn new(network: impl Network + 'static) -> Self {
        Self {
            inner: Rc::new(Inner {
                store: RefCell::new(RecordStore::new()),
                network: Box::new(network),
                subscriptions: RefCell::new(Vec::new()),
                next_subscription_id: Cell::new(0),
                connections: RefCell::new(Vec::new()),
            }),
        }
    }

    /// Returns a shared handle. Containers compare environments by handle,
    /// so create it once and clone it.
    pub fn shared(&self) -> SharedEnvironment {
        Rc::new(self.clone())
    }

    /// Pages the `@connection` field described by `metadata`: responses to
    /// requests whose cursor variable is set are merged into the stored
    /// connection instead of replacing its edges.
    ///
    /// The cursor is read from the request variable named like the
    /// fragment's cursor variable.
    pub fn register_connection(&self, metadata: &ConnectionMetadata) {
        let field = metadata.path.as_ref().and_then(|path| path.last());
        let (Some(field), Some(cursor_variable)) = (field, metadata.cursor.as_ref()) else {
            tracing::warn!(?metadata, "connection without a path or cursor variable is not paged");
            return;
        };
        self.inner.connections.borrow_mut().push(PagedConnection {
            field: field.clone(),
            direction: metadata.direction.unwrap_or(ConnectionDirection::Forward),
            cursor_variable: cursor_variable.clone(),
        });
    }

    /// Writes `data` as the response of `operation`.
    pub fn commit_payload(&self, operation: &OperationDescriptor, data: &Value) {
        self.inner.publish(&operation.root.data_id, data);
    }

    /// Merges `data` into the record `id`.
    pub fn commit_record(&self, id: &str, data: &Value) {
        self.inner.publish(id, data);
    }

    /// Deletes the record `id`.
    pub fn delete_record(&self, id: &str) {
        if self.inner.store.borrow_mut().delete(id) {
            let mut updated = FxHashSet::default();
            updated.insert(id.to_string());
            self.inner.notify(&updated);
        }
    }

    /// Returns a copy of the record `id`.
    pub fn record(&self, id: &str) -> Option<Record> {
        self.inner.store.borrow().get(id).cloned()
    }

    /// Returns how many times the selector's root is retained.
    pub fn retain_count(&self, selector: &Selector) -> usize {
        self.inner.store.borrow().retain_count(&selector.data_id)
    }

    /// Returns the number of live retains across all roots.
    pub fn total_retain_count(&self) -> usize {
        self.inner.store.borrow().total_retain_count()
    }

    /// Returns the number of live store subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.inner.subscriptions.borrow().len()
    }

    /// Deletes every record not reachable from a retained root.
    pub fn gc(&self) -> usize {
        let removed = self.inner.store.borrow_mut().collect_garbage();
        tracing::debug!(removed, "collected garbage");
        removed
    }
}

impl fmt::Debug for MemoryEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryEnvironment")
            .field("records", &self.inner.store.borrow().len())
            .field("subscriptions", &self.subscription_count())
            .finish()
    }
}

impl Environment for MemoryEnvironment {
    fn check(&self, selector: &Selector) -> bool {
        let result = self.inner.store.borrow().read(&selector.data_id);
        result.data.is_some() && !result.is_missing_data
    }

    fn lookup(&self, selector: &Selector) -> Snapshot {
        self.inner.read(selector)
    }

    fn retain(&self, selector: &Selector) -> SelectionReference {
        let id = selector.data_id.clone();
        self.inner.store.borrow_mut().retain(&id);
        tracing::trace!(root = %id, "retain");

        let inner: Weak<Inner> = Rc::downgrade(&self.inner);
        SelectionReference::new(move || {
            if let Some(inner) = inner.upgrade() {
                inner.store.borrow_mut().release(&id);
            }
        })
    }

    fn execute(&self, request: ExecuteRequest) -> Observable<ExecutePayload> {
        let ExecuteRequest {
            operation,
            cache_config,
        } = request;
        tracing::debug!(operation = operation.name(), "execute");

        let responses = self.inner.network.execute(
            &operation.request.params,
            &operation.variables,
            cache_config.as_ref(),
        );
        let inner = Rc::downgrade(&self.inner);
        responses.merge_map(move |response| {
            let Some(inner) = inner.upgrade() else {
                return Observable::from_error(RelayError::store("environment was dropped"));
            };
            let response = match response.into_result() {
                Ok(response) => response,
                Err(error) => return Observable::from_error(error),
            };
            if let Some(data) = &response.data {
                let pages = inner.connection_pages(&operation.variables);
                inner.publish_page(&operation.root.data_id, data, &pages);
            }
            Observable::from_value(ExecutePayload {
                operation: operation.clone(),
                variables: operation.variables.clone(),
                response,
            })
        })
    }

    fn subscribe(&self, snapshot: &Snapshot, callback: Box<dyn Fn(Snapshot)>) -> Disposable {
        let id = self.inner.next_subscription_id.get();
        self.inner.next_subscription_id.set(id + 1);
        self.inner.subscriptions.borrow_mut().push(StoreSubscription {
            id,
            snapshot: snapshot.clone(),
            callback: Rc::from(callback),
        });

        let inner = Rc::downgrade(&self.inner);
        Disposable::new("store_subscription", move || {
            if let Some(inner) = inner.upgrade() {
                inner
                    .subscriptions
                    .borrow_mut()
                    .retain(|subscription| subscription.id != id);
            }
        })
    }
}
