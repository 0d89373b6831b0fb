//! Network layers for [`MemoryEnvironment`](super::MemoryEnvironment).

use crate::config::CacheConfig;
use crate::error::{RelayError, RelayResult};
use crate::observable::{Observable, Sink};
use crate::operation::RequestParameters;
use crate::payload::GraphQLResponse;
use crate::variables::Variables;
use std::cell::RefCell;
use std::rc::Rc;

/// Sends requests to a GraphQL endpoint.
pub trait Network {
    /// Returns a cold observable of responses for one request.
    fn execute(
        &self,
        params: &RequestParameters,
        variables: &Variables,
        cache_config: Option<&CacheConfig>,
    ) -> Observable<GraphQLResponse>;
}

/// A network answering synchronously from a function.
pub struct FnNetwork<F> {
    handler: Rc<F>,
}

impl<F> FnNetwork<F>
where
    F: Fn(&RequestParameters, &Variables) -> RelayResult<GraphQLResponse> + 'static,
{
    /// Wraps `handler`.
    pub fn new(handler: F) -> Self {
        Self {
            handler: Rc::new(handler),
        }
    }
}

impl<F> Network for FnNetwork<F>
where
    F: Fn(&RequestParameters, &Variables) -> RelayResult<GraphQLResponse> + 'static,
{
    fn execute(
        &self,
        params: &RequestParameters,
        variables: &Variables,
        _cache_config: Option<&CacheConfig>,
    ) -> Observable<GraphQLResponse> {
        let handler = self.handler.clone();
        let (params, variables) = (params.clone(), variables.clone());
        Observable::create(move |sink| {
            match handler(&params, &variables) {
                Ok(response) => {
                    sink.next(response);
                    sink.complete();
                }
                Err(error) => sink.error(error),
            }
            || {}
        })
    }
}

/// A request received by a [`QueuedNetwork`].
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedRequest {
    pub name: String,
    pub variables: Variables,
    pub cache_config: Option<CacheConfig>,
}

struct PendingRequest {
    request: RecordedRequest,
    sink: Sink<GraphQLResponse>,
}

#[derive(Default)]
struct QueueState {
    pending: Vec<PendingRequest>,
    history: Vec<RecordedRequest>,
}

/// A network whose requests stay open until answered by hand.
///
/// Clones share the same queue. Answers go to the oldest request that is
/// still open; cancelled requests are skipped.
#[derive(Clone, Default)]
pub struct QueuedNetwork {
    state: Rc<RefCell<QueueState>>,
}

impl QueuedNetwork {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of requests still open.
    pub fn pending_count(&self) -> usize {
        self.state
            .borrow()
            .pending
            .iter()
            .filter(|pending| !pending.sink.closed())
            .count()
    }

    /// Returns the number of requests received so far.
    pub fn request_count(&self) -> usize {
        self.state.borrow().history.len()
    }

    /// Returns every request received so far, oldest first.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.borrow().history.clone()
    }

    fn oldest_open(&self) -> Option<Sink<GraphQLResponse>> {
        let mut state = self.state.borrow_mut();
        state.pending.retain(|pending| !pending.sink.closed());
        state.pending.first().map(|pending| pending.sink.clone())
    }

    /// Emits `response` on the oldest open request without completing it.
    /// Returns false if no request is open.
    pub fn next(&self, response: GraphQLResponse) -> bool {
        self.oldest_open().map(|sink| sink.next(response)).is_some()
    }

    /// Emits `response` on the oldest open request and completes it.
    pub fn resolve(&self, response: GraphQLResponse) -> bool {
        self.oldest_open()
            .map(|sink| {
                sink.next(response);
                sink.complete();
            })
            .is_some()
    }

    /// Fails the oldest open request.
    pub fn reject(&self, error: RelayError) -> bool {
        self.oldest_open().map(|sink| sink.error(error)).is_some()
    }

    /// Completes the oldest open request.
    pub fn complete(&self) -> bool {
        self.oldest_open().map(|sink| sink.complete()).is_some()
    }

    /// Returns the oldest open request.
    pub fn peek(&self) -> Option<RecordedRequest> {
        let state = self.state.borrow();
        state
            .pending
            .iter()
            .find(|pending| !pending.sink.closed())
            .map(|pending| pending.request.clone())
    }
}

impl Network for QueuedNetwork {
    fn execute(
        &self,
        params: &RequestParameters,
        variables: &Variables,
        cache_config: Option<&CacheConfig>,
    ) -> Observable<GraphQLResponse> {
        let state = self.state.clone();
        let request = RecordedRequest {
            name: params.name.clone(),
            variables: variables.clone(),
            cache_config: cache_config.cloned(),
        };
        Observable::create(move |sink| {
            tracing::trace!(name = %request.name, "queued network request");
            let mut queue = state.borrow_mut();
            queue.history.push(request.clone());
            queue.pending.push(PendingRequest {
                request: request.clone(),
                sink,
            });
            || {}
        })
    }
}
