//! Fragment container that can refetch its data with new variables.

use crate::config::RefetchOptions;
use crate::container::{
    data_ids_changed, merge_props, Container, ContainerInput, ContainerSpec, ObserverOrCallback,
    Rendered, ScheduleUpdate, UpdateScheduler,
};
use crate::query_fetcher::{ExecuteOptions, QueryFetcher};
use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};
use vrelay_runtime::{
    assert_relay_context, get_variables_from_object, merge_variables, ConcreteRequest,
    FragmentSpecResolver, Observable, OperationDescriptor, Props, RelayContext, RelayError,
    RelayResult, SharedEnvironment, Subscription, Variables,
};

/// Variables for a refetch: given outright, or derived from the current
/// fragment variables.
#[derive(Clone)]
pub enum RefetchVariables {
    Variables(Variables),
    FromFragmentVariables(Rc<dyn Fn(&Variables) -> Variables>),
}

impl RefetchVariables {
    pub fn from_fn(f: impl Fn(&Variables) -> Variables + 'static) -> Self {
        Self::FromFragmentVariables(Rc::new(f))
    }
}

impl From<Variables> for RefetchVariables {
    fn from(variables: Variables) -> Self {
        Self::Variables(variables)
    }
}

impl fmt::Debug for RefetchVariables {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Variables(variables) => f.debug_tuple("Variables").field(variables).finish(),
            Self::FromFragmentVariables(_) => f.write_str("FromFragmentVariables"),
        }
    }
}

/// The `relay` prop of a refetch container.
#[derive(Clone)]
pub struct RefetchRelayProp {
    pub environment: SharedEnvironment,
    pub refetch: RefetchHandle,
}

impl fmt::Debug for RefetchRelayProp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefetchRelayProp").finish_non_exhaustive()
    }
}

/// Refetches through the container that rendered it.
#[derive(Clone)]
pub struct RefetchHandle {
    inner: Weak<RefetchInner>,
}

impl RefetchHandle {
    /// Fetches the container's query with `refetch_variables` merged over the
    /// root variables, then re-reads the fragments with `render_variables`
    /// (or the fetch variables when `None`). Cancels any refetch in flight.
    ///
    /// A callback observer is called with each result and with the error,
    /// but not on completion or cancellation.
    pub fn refetch(
        &self,
        refetch_variables: impl Into<RefetchVariables>,
        render_variables: Option<Variables>,
        observer: Option<ObserverOrCallback>,
        options: Option<RefetchOptions>,
    ) -> RelayResult<Subscription> {
        let inner = self
            .inner
            .upgrade()
            .ok_or_else(|| RelayError::invariant("RefetchContainer: `refetch` called after the container was dropped"))?;
        Ok(inner.refetch(refetch_variables.into(), render_variables, observer, options))
    }
}

impl fmt::Debug for RefetchHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefetchHandle")
            .field("alive", &(self.inner.strong_count() > 0))
            .finish()
    }
}

struct RefetchState {
    context: RelayContext,
    context_for_children: RelayContext,
    props: Props,
    data: Rc<Props>,
    resolver: Box<dyn FragmentSpecResolver>,
    // resolver replaced by an update, disposed once the host re-rendered
    prev_resolver: Option<Box<dyn FragmentSpecResolver>>,
    local_variables: Option<Variables>,
    refetch_subscription: Option<Subscription>,
    query_fetcher: Option<QueryFetcher>,
}

struct RefetchInner {
    spec: Rc<ContainerSpec>,
    query: Rc<ConcreteRequest>,
    state: RefCell<RefetchState>,
    scheduler: UpdateScheduler,
}

impl RefetchInner {
    fn refetch(
        self: &Rc<Self>,
        refetch_variables: RefetchVariables,
        render_variables: Option<Variables>,
        observer: Option<ObserverOrCallback>,
        options: Option<RefetchOptions>,
    ) -> Subscription {
        let observer = ObserverOrCallback::into_refetch_observer(observer);
        let (environment, fetch_variables, fragment_variables, previous, query_fetcher) = {
            let mut state = self.state.borrow_mut();
            let root_variables = state.context.variables.clone();
            let fetch_variables = match refetch_variables {
                RefetchVariables::Variables(variables) => variables,
                RefetchVariables::FromFragmentVariables(f) => {
                    f(&get_variables_from_object(&root_variables, self.spec.fragments(), &state.props))
                }
            };
            let fetch_variables = merge_variables(&root_variables, &fetch_variables);
            let fragment_variables = match render_variables {
                Some(render_variables) => merge_variables(&root_variables, &render_variables),
                None => fetch_variables.clone(),
            };
            state.local_variables = Some(fetch_variables.clone());
            let query_fetcher = state.query_fetcher.get_or_insert_with(QueryFetcher::new).clone();
            (
                state.context.environment.clone(),
                fetch_variables,
                fragment_variables,
                state.refetch_subscription.take(),
                query_fetcher,
            )
        };
        if let Some(previous) = previous {
            previous.unsubscribe();
        }

        tracing::debug!(container = %self.spec.container_name(), "refetch");
        let operation = OperationDescriptor::new(self.query.clone(), fetch_variables);
        let current: Rc<RefCell<Option<Subscription>>> = Rc::default();
        let weak = Rc::downgrade(self);

        query_fetcher
            .execute(
                ExecuteOptions::new(environment.clone(), operation)
                    .cache_config(options.map(RefetchOptions::cache_config))
                    .preserve_previous_references(true),
            )
            .merge_map({
                let weak = weak.clone();
                move |_| {
                    if let Some(inner) = weak.upgrade() {
                        inner.apply_fragment_variables(&environment, &fragment_variables);
                    }
                    Observable::from_value(())
                }
            })
            .finally({
                let (weak, current) = (weak.clone(), current.clone());
                move || {
                    let Some(inner) = weak.upgrade() else {
                        return;
                    };
                    // only the most recent refetch clears the slot
                    let current = current.borrow();
                    let mut state = inner.state.borrow_mut();
                    let is_current = matches!(
                        (&state.refetch_subscription, current.as_ref()),
                        (Some(active), Some(current)) if active.ptr_eq(current)
                    );
                    if is_current {
                        state.refetch_subscription = None;
                    }
                }
            })
            .subscribe(observer.prepend_start(move |subscription| {
                *current.borrow_mut() = Some(subscription.clone());
                if let Some(inner) = weak.upgrade() {
                    inner.state.borrow_mut().refetch_subscription = Some(subscription.clone());
                }
            }))
    }

    fn apply_fragment_variables(&self, environment: &SharedEnvironment, fragment_variables: &Variables) {
        let changed = {
            let mut state = self.state.borrow_mut();
            state.context_for_children = RelayContext::new(environment.clone(), fragment_variables.clone());
            state.resolver.set_variables(fragment_variables);
            let data = state.resolver.resolve();
            let changed = !Rc::ptr_eq(&data, &state.data);
            state.data = data;
            changed
        };
        if changed {
            self.scheduler.schedule();
        }
    }

    fn handle_fragment_data_update(&self) {
        let changed = {
            let mut state = self.state.borrow_mut();
            if state.prev_resolver.is_some() {
                return;
            }
            let data = state.resolver.resolve();
            let changed = !Rc::ptr_eq(&data, &state.data);
            state.data = data;
            changed
        };
        if changed {
            self.scheduler.schedule();
        }
    }

    fn subscribe_to_new_resolver(self: &Rc<Self>) {
        let weak = Rc::downgrade(self);
        let callback: Rc<dyn Fn()> = Rc::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.handle_fragment_data_update();
            }
        });
        let changed = {
            let mut state = self.state.borrow_mut();
            state.resolver.set_callback(callback);
            let data = state.resolver.resolve();
            let changed = !Rc::ptr_eq(&data, &state.data);
            state.data = data;
            changed
        };
        if changed {
            self.scheduler.schedule();
        }
    }
}

/// A fragment container whose `relay` prop can refetch the fragments
/// through `query`.
pub struct RefetchContainer {
    inner: Rc<RefetchInner>,
}

impl RefetchContainer {
    /// Creates the container and reads its initial data.
    pub fn new(
        spec: Rc<ContainerSpec>,
        query: Rc<ConcreteRequest>,
        context: Option<&RelayContext>,
        props: Props,
    ) -> RelayResult<Self> {
        let context = assert_relay_context(context)?.clone();
        let mut resolver = context.environment.create_fragment_spec_resolver(
            &context,
            &spec.container_name(),
            spec.fragments(),
            &props,
        );
        let data = resolver.resolve();

        Ok(Self {
            inner: Rc::new(RefetchInner {
                spec,
                query,
                state: RefCell::new(RefetchState {
                    context_for_children: context.clone(),
                    context,
                    props,
                    data,
                    resolver,
                    prev_resolver: None,
                    local_variables: None,
                    refetch_subscription: None,
                    query_fetcher: None,
                }),
                scheduler: UpdateScheduler::default(),
            }),
        })
    }

    /// Returns a handle refetching through this container.
    pub fn handle(&self) -> RefetchHandle {
        RefetchHandle {
            inner: Rc::downgrade(&self.inner),
        }
    }

    /// Returns true while a refetch is in flight.
    pub fn is_refetching(&self) -> bool {
        self.inner.state.borrow().refetch_subscription.is_some()
    }

    fn release_fetch(query_fetcher: Option<QueryFetcher>, subscription: Option<Subscription>) {
        if let Some(query_fetcher) = query_fetcher {
            query_fetcher.dispose();
        }
        if let Some(subscription) = subscription {
            subscription.unsubscribe();
        }
    }
}

impl Container for RefetchContainer {
    type Input = ContainerInput;
    type Output = Rendered<RefetchRelayProp>;

    fn mounted(&self) {
        self.inner.subscribe_to_new_resolver();
    }

    fn update(&self, input: ContainerInput) {
        let ContainerInput { context, props } = input;
        let spec = &self.inner.spec;
        let mut state = self.inner.state.borrow_mut();

        // records or variables changed: fetched data and pending refetches
        // no longer apply
        if !context.same_as(&state.context) || data_ids_changed(spec.fragments(), &state.props, &props) {
            let resolver = context.environment.create_fragment_spec_resolver(
                &context,
                &spec.container_name(),
                spec.fragments(),
                &props,
            );
            let previous = std::mem::replace(&mut state.resolver, resolver);
            if let Some(mut stale) = state.prev_resolver.replace(previous) {
                stale.dispose();
            }
            state.context_for_children = context.clone();
            state.context = context;
            state.local_variables = None;
        } else if state.local_variables.is_none() {
            state.resolver.set_props(&props);
        }
        state.props = props;
        let data = state.resolver.resolve();
        state.data = data;
    }

    fn updated(&self) {
        let (mut prev_resolver, query_fetcher, subscription) = {
            let mut state = self.inner.state.borrow_mut();
            let Some(prev_resolver) = state.prev_resolver.take() else {
                return;
            };
            (prev_resolver, state.query_fetcher.clone(), state.refetch_subscription.take())
        };
        prev_resolver.dispose();
        Self::release_fetch(query_fetcher, subscription);
        self.inner.subscribe_to_new_resolver();
    }

    fn before_destroy(&self) {
        let (query_fetcher, subscription) = {
            let mut state = self.inner.state.borrow_mut();
            state.resolver.dispose();
            if let Some(mut prev_resolver) = state.prev_resolver.take() {
                prev_resolver.dispose();
            }
            (state.query_fetcher.clone(), state.refetch_subscription.take())
        };
        Self::release_fetch(query_fetcher, subscription);
    }

    fn render(&self) -> Rendered<RefetchRelayProp> {
        let state = self.inner.state.borrow();
        Rendered {
            props: merge_props(&state.props, &state.data),
            relay: RefetchRelayProp {
                environment: state.context.environment.clone(),
                refetch: self.handle(),
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

impl fmt::Debug for RefetchContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.borrow();
        f.debug_struct("RefetchContainer")
            .field("name", &self.inner.spec.container_name())
            .field("data", &state.data)
            .field("local_variables", &state.local_variables)
            .field("refetching", &state.refetch_subscription.is_some())
            .finish()
    }
}
