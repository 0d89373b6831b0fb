//! Cold, single-threaded observables.
//!
//! An [`Observable`] does nothing until it is subscribed; every subscription
//! runs the producer again. Events are delivered synchronously on the
//! caller's stack whenever the producer emits synchronously, which is what
//! lets the query fetcher return cached data from `fetch` directly.
//!
//! Delivery rules:
//! - after `error` or `complete` the sink is closed and drops further events;
//! - the producer's teardown runs exactly once, on close or on unsubscribe;
//! - an observer's `unsubscribe` hook only fires when the subscription is
//!   cancelled before the producer closed it.

use crate::error::{RelayError, RelayResult};
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;
use tokio::sync::mpsc;

type Teardown = Box<dyn FnOnce()>;

/// Callbacks receiving the events of one subscription.
pub struct Observer<T> {
    start: Option<Box<dyn FnMut(&Subscription)>>,
    next: Option<Box<dyn FnMut(T)>>,
    error: Option<Box<dyn FnMut(RelayError)>>,
    complete: Option<Box<dyn FnMut()>>,
    unsubscribe: Option<Box<dyn FnMut()>>,
}

impl<T> Default for Observer<T> {
    fn default() -> Self {
        Self {
            start: None,
            next: None,
            error: None,
            complete: None,
            unsubscribe: None,
        }
    }
}

impl<T: 'static> Observer<T> {
    /// Creates an observer that ignores every event.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an observer forwarding `next`, `error` and `complete` to `sink`.
    pub fn from_sink(sink: &Sink<T>) -> Self {
        let (next, error, complete) = (sink.clone(), sink.clone(), sink.clone());
        Self::new()
            .on_next(move |value| next.next(value))
            .on_error(move |err| error.error(err))
            .on_complete(move || complete.complete())
    }

    /// Called with the subscription before the producer starts.
    pub fn on_start(mut self, f: impl FnMut(&Subscription) + 'static) -> Self {
        self.start = Some(Box::new(f));
        self
    }

    /// Runs `f` before the start hook already set, if any.
    pub fn prepend_start(mut self, mut f: impl FnMut(&Subscription) + 'static) -> Self {
        let mut existing = self.start.take();
        self.start = Some(Box::new(move |subscription| {
            f(subscription);
            if let Some(hook) = existing.as_mut() {
                hook(subscription);
            }
        }));
        self
    }

    /// Called for each emitted value.
    pub fn on_next(mut self, f: impl FnMut(T) + 'static) -> Self {
        self.next = Some(Box::new(f));
        self
    }

    /// Called once if the producer fails.
    pub fn on_error(mut self, f: impl FnMut(RelayError) + 'static) -> Self {
        self.error = Some(Box::new(f));
        self
    }

    /// Called once if the producer completes.
    pub fn on_complete(mut self, f: impl FnMut() + 'static) -> Self {
        self.complete = Some(Box::new(f));
        self
    }

    /// Called once if the subscription is cancelled before it closed.
    pub fn on_unsubscribe(mut self, f: impl FnMut() + 'static) -> Self {
        self.unsubscribe = Some(Box::new(f));
        self
    }
}

impl<T> fmt::Debug for Observer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observer")
            .field("start", &self.start.is_some())
            .field("next", &self.next.is_some())
            .field("error", &self.error.is_some())
            .field("complete", &self.complete.is_some())
            .field("unsubscribe", &self.unsubscribe.is_some())
            .finish()
    }
}

struct SinkState<T> {
    closed: Cell<bool>,
    emitting: Cell<bool>,
    queued: RefCell<VecDeque<T>>,
    observer: RefCell<Observer<T>>,
    cleanup: RefCell<Option<Teardown>>,
}

impl<T> SinkState<T> {
    fn run_cleanup(&self) {
        self.queued.borrow_mut().clear();
        let cleanup = self.cleanup.borrow_mut().take();
        if let Some(cleanup) = cleanup {
            cleanup();
        }
    }
}

trait SubscriptionState {
    fn unsubscribe(&self);
    fn closed(&self) -> bool;
}

impl<T> SubscriptionState for SinkState<T> {
    fn unsubscribe(&self) {
        if self.closed.replace(true) {
            return;
        }
        let hook = self.observer.borrow_mut().unsubscribe.take();
        if let Some(mut hook) = hook {
            hook();
        }
        self.run_cleanup();
    }

    fn closed(&self) -> bool {
        self.closed.get()
    }
}

/// The producer side of a subscription.
pub struct Sink<T> {
    state: Rc<SinkState<T>>,
}

impl<T> Clone for Sink<T> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
        }
    }
}

impl<T: 'static> Sink<T> {
    /// Emits a value. Values emitted from inside the observer's own `next`
    /// callback are queued and delivered in order once it returns.
    pub fn next(&self, value: T) {
        let state = &self.state;
        if state.closed.get() {
            return;
        }
        if state.emitting.get() {
            state.queued.borrow_mut().push_back(value);
            return;
        }

        state.emitting.set(true);
        let mut pending = Some(value);
        while let Some(value) = pending.take() {
            if state.closed.get() {
                break;
            }
            let hook = state.observer.borrow_mut().next.take();
            if let Some(mut hook) = hook {
                hook(value);
                let mut observer = state.observer.borrow_mut();
                if observer.next.is_none() {
                    observer.next = Some(hook);
                }
            }
            pending = state.queued.borrow_mut().pop_front();
        }
        state.emitting.set(false);
    }

    /// Fails the subscription and closes the sink.
    pub fn error(&self, error: RelayError) {
        let state = &self.state;
        if state.closed.replace(true) {
            return;
        }
        let hook = state.observer.borrow_mut().error.take();
        match hook {
            Some(mut hook) => hook(error),
            None => tracing::error!(%error, "unhandled error in observable"),
        }
        state.run_cleanup();
    }

    /// Completes the subscription and closes the sink.
    pub fn complete(&self) {
        let state = &self.state;
        if state.closed.replace(true) {
            return;
        }
        let hook = state.observer.borrow_mut().complete.take();
        if let Some(mut hook) = hook {
            hook();
        }
        state.run_cleanup();
    }

    /// Returns true once the sink no longer accepts events.
    pub fn closed(&self) -> bool {
        self.state.closed.get()
    }
}

/// Handle to a running subscription.
///
/// Dropping the handle does not cancel the subscription.
#[derive(Clone)]
pub struct Subscription {
    state: Rc<dyn SubscriptionState>,
}

impl Subscription {
    /// Cancels the subscription. No-op once closed.
    pub fn unsubscribe(&self) {
        self.state.unsubscribe();
    }

    /// Returns true if the subscription completed, failed or was cancelled.
    pub fn closed(&self) -> bool {
        self.state.closed()
    }

    /// Returns true if both handles point to the same subscription.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.state, &other.state)
    }

    /// Converts the handle into a [`Disposable`](crate::Disposable) that
    /// cancels the subscription.
    pub fn into_disposable(self) -> crate::Disposable {
        crate::Disposable::new("subscription", move || self.unsubscribe())
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("closed", &self.closed())
            .finish()
    }
}

/// Side-effect hooks used by [`Observable::tap`].
pub struct Tap<T> {
    next: Option<Rc<dyn Fn(&T)>>,
    error: Option<Rc<dyn Fn(&RelayError)>>,
    complete: Option<Rc<dyn Fn()>>,
    unsubscribe: Option<Rc<dyn Fn()>>,
}

impl<T> Clone for Tap<T> {
    fn clone(&self) -> Self {
        Self {
            next: self.next.clone(),
            error: self.error.clone(),
            complete: self.complete.clone(),
            unsubscribe: self.unsubscribe.clone(),
        }
    }
}

impl<T> Default for Tap<T> {
    fn default() -> Self {
        Self {
            next: None,
            error: None,
            complete: None,
            unsubscribe: None,
        }
    }
}

impl<T: 'static> Tap<T> {
    /// Creates an empty set of hooks.
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs before each value is forwarded.
    pub fn on_next(mut self, f: impl Fn(&T) + 'static) -> Self {
        self.next = Some(Rc::new(f));
        self
    }

    /// Runs before an error is forwarded.
    pub fn on_error(mut self, f: impl Fn(&RelayError) + 'static) -> Self {
        self.error = Some(Rc::new(f));
        self
    }

    /// Runs before completion is forwarded.
    pub fn on_complete(mut self, f: impl Fn() + 'static) -> Self {
        self.complete = Some(Rc::new(f));
        self
    }

    /// Runs when the source is cancelled before it closed.
    pub fn on_unsubscribe(mut self, f: impl Fn() + 'static) -> Self {
        self.unsubscribe = Some(Rc::new(f));
        self
    }
}

/// A lazy, restartable producer of values.
pub struct Observable<T> {
    source: Rc<dyn Fn(Sink<T>) -> Teardown>,
}

impl<T> Clone for Observable<T> {
    fn clone(&self) -> Self {
        Self {
            source: self.source.clone(),
        }
    }
}

impl<T> fmt::Debug for Observable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Observable")
    }
}

impl<T: 'static> Observable<T> {
    /// Creates an observable from a producer. The producer returns its
    /// teardown, which runs once when the subscription closes.
    pub fn create<F, D>(producer: F) -> Self
    where
        F: Fn(Sink<T>) -> D + 'static,
        D: FnOnce() + 'static,
    {
        Self {
            source: Rc::new(move |sink| Box::new(producer(sink)) as Teardown),
        }
    }

    /// Emits `value` and completes.
    pub fn from_value(value: T) -> Self
    where
        T: Clone,
    {
        Self::create(move |sink| {
            sink.next(value.clone());
            sink.complete();
            || {}
        })
    }

    /// Fails immediately with `error`.
    pub fn from_error(error: RelayError) -> Self {
        Self::create(move |sink: Sink<T>| {
            sink.error(error.clone());
            || {}
        })
    }

    /// Completes without emitting.
    pub fn empty() -> Self {
        Self::create(|sink: Sink<T>| {
            sink.complete();
            || {}
        })
    }

    /// Builds a fresh observable for every subscription.
    pub fn defer(factory: impl Fn() -> Observable<T> + 'static) -> Self {
        Self::create(move |sink| {
            let subscription = factory().subscribe(Observer::from_sink(&sink));
            move || subscription.unsubscribe()
        })
    }

    /// Drives a channel opened per subscription on the current `LocalSet`.
    ///
    /// An `Err` item fails the subscription; the channel closing completes
    /// it. Cancelling aborts the driving task. Subscribing outside a tokio
    /// runtime fails the subscription with an internal error.
    ///
    /// # Panics
    ///
    /// Subscribing panics inside a runtime when not on a `tokio::task::LocalSet`.
    pub fn from_receiver(
        factory: impl Fn() -> mpsc::UnboundedReceiver<RelayResult<T>> + 'static,
    ) -> Self {
        Self::create(move |sink: Sink<T>| {
            let handle = match tokio::runtime::Handle::try_current() {
                Ok(_) => {
                    let mut receiver = factory();
                    Some(tokio::task::spawn_local(async move {
                        while let Some(item) = receiver.recv().await {
                            match item {
                                Ok(value) => sink.next(value),
                                Err(error) => {
                                    sink.error(error);
                                    return;
                                }
                            }
                        }
                        sink.complete();
                    }))
                }
                Err(error) => {
                    sink.error(RelayError::internal(format!(
                        "`from_receiver` subscribed outside a tokio runtime: {error}"
                    )));
                    None
                }
            };
            move || {
                if let Some(handle) = handle {
                    handle.abort();
                }
            }
        })
    }

    /// Starts the producer.
    pub fn subscribe(&self, mut observer: Observer<T>) -> Subscription {
        let start = observer.start.take();
        let state = Rc::new(SinkState {
            closed: Cell::new(false),
            emitting: Cell::new(false),
            queued: RefCell::new(VecDeque::new()),
            observer: RefCell::new(observer),
            cleanup: RefCell::new(None),
        });
        let subscription = Subscription {
            state: state.clone(),
        };

        if let Some(mut start) = start {
            start(&subscription);
        }
        if state.closed.get() {
            return subscription;
        }

        let teardown = (self.source)(Sink {
            state: state.clone(),
        });
        if state.closed.get() {
            teardown();
        } else {
            *state.cleanup.borrow_mut() = Some(teardown);
        }
        subscription
    }

    /// Transforms each value.
    pub fn map<U: 'static>(&self, f: impl Fn(T) -> U + 'static) -> Observable<U> {
        let source = self.clone();
        let f = Rc::new(f);
        Observable::create(move |sink: Sink<U>| {
            let f = f.clone();
            let (next, error) = (sink.clone(), sink.clone());
            let subscription = source.subscribe(
                Observer::new()
                    .on_next(move |value| next.next(f(value)))
                    .on_error(move |err| error.error(err))
                    .on_complete(move || sink.complete()),
            );
            move || subscription.unsubscribe()
        })
    }

    /// Runs side effects without altering the events.
    pub fn tap(&self, tap: Tap<T>) -> Observable<T> {
        let source = self.clone();
        Observable::create(move |sink: Sink<T>| {
            let tap = tap.clone();
            let (next, error) = (sink.clone(), sink.clone());
            let (on_next, on_error, on_complete) = (tap.next, tap.error, tap.complete);
            let mut observer = Observer::new()
                .on_next(move |value| {
                    if let Some(hook) = &on_next {
                        hook(&value);
                    }
                    next.next(value);
                })
                .on_error(move |err| {
                    if let Some(hook) = &on_error {
                        hook(&err);
                    }
                    error.error(err);
                })
                .on_complete(move || {
                    if let Some(hook) = &on_complete {
                        hook();
                    }
                    sink.complete();
                });
            if let Some(hook) = tap.unsubscribe {
                observer = observer.on_unsubscribe(move || hook());
            }
            let subscription = source.subscribe(observer);
            move || subscription.unsubscribe()
        })
    }

    /// Runs `f` once when the subscription completes, fails or is cancelled.
    pub fn finally(&self, f: impl Fn() + 'static) -> Observable<T> {
        let source = self.clone();
        let f = Rc::new(f);
        Observable::create(move |sink| {
            let subscription = source.subscribe(Observer::from_sink(&sink));
            let f = f.clone();
            move || {
                subscription.unsubscribe();
                f();
            }
        })
    }

    /// Maps each value to an inner observable and merges their output.
    ///
    /// Completes once the source and every inner observable completed.
    pub fn merge_map<U: 'static>(&self, f: impl Fn(T) -> Observable<U> + 'static) -> Observable<U> {
        let source = self.clone();
        let f = Rc::new(f);
        Observable::create(move |sink: Sink<U>| {
            let inner: Rc<RefCell<Vec<Subscription>>> = Rc::default();
            let active = Rc::new(Cell::new(0usize));
            let source_done = Rc::new(Cell::new(false));

            let on_next = {
                let (f, sink, inner) = (f.clone(), sink.clone(), inner.clone());
                let (active, source_done) = (active.clone(), source_done.clone());
                move |value| {
                    active.set(active.get() + 1);
                    let (next, error, complete) = (sink.clone(), sink.clone(), sink.clone());
                    let (active, source_done) = (active.clone(), source_done.clone());
                    let subscription = f(value).subscribe(
                        Observer::new()
                            .on_next(move |value| next.next(value))
                            .on_error(move |err| error.error(err))
                            .on_complete(move || {
                                active.set(active.get() - 1);
                                if source_done.get() && active.get() == 0 {
                                    complete.complete();
                                }
                            }),
                    );
                    inner.borrow_mut().push(subscription);
                }
            };
            let on_error = {
                let sink = sink.clone();
                move |err| sink.error(err)
            };
            let on_complete = {
                let sink = sink.clone();
                move || {
                    source_done.set(true);
                    if active.get() == 0 {
                        sink.complete();
                    }
                }
            };

            let outer = source.subscribe(
                Observer::new()
                    .on_next(on_next)
                    .on_error(on_error)
                    .on_complete(on_complete),
            );
            move || {
                outer.unsubscribe();
                let subscriptions = std::mem::take(&mut *inner.borrow_mut());
                for subscription in subscriptions {
                    subscription.unsubscribe();
                }
            }
        })
    }
}
