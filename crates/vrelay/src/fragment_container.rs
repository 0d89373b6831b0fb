//! Container reading a component's fragment props from the store.

use crate::container::{
    data_ids_changed, merge_props, Container, ContainerInput, ContainerSpec, Rendered, ScheduleUpdate,
    UpdateScheduler,
};
use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};
use vrelay_runtime::{
    assert_relay_context, FragmentSpecResolver, Props, RelayContext, RelayResult, SharedEnvironment,
};

/// The `relay` prop of a fragment container.
#[derive(Clone)]
pub struct FragmentRelayProp {
    pub is_loading: bool,
    pub environment: SharedEnvironment,
}

impl fmt::Debug for FragmentRelayProp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FragmentRelayProp")
            .field("is_loading", &self.is_loading)
            .finish_non_exhaustive()
    }
}

struct FragmentState {
    context: RelayContext,
    props: Props,
    data: Rc<Props>,
    is_loading: bool,
    resolver: Box<dyn FragmentSpecResolver>,
}

impl FragmentState {
    /// Re-reads the resolver. Returns true if the rendered state changed.
    fn refresh(&mut self) -> bool {
        let data = self.resolver.resolve();
        let is_loading = self.resolver.is_loading();
        if Rc::ptr_eq(&data, &self.data) && is_loading == self.is_loading {
            return false;
        }
        self.data = data;
        self.is_loading = is_loading;
        true
    }
}

/// Resolves the fragments of [`ContainerSpec`] for the props it receives.
pub struct FragmentContainer {
    spec: Rc<ContainerSpec>,
    state: Rc<RefCell<FragmentState>>,
    scheduler: UpdateScheduler,
}

impl FragmentContainer {
    /// Creates the container and reads its initial data.
    ///
    /// Fails if no context was provided by an enclosing query renderer or
    /// container.
    pub fn new(spec: Rc<ContainerSpec>, context: Option<&RelayContext>, props: Props) -> RelayResult<Self> {
        let context = assert_relay_context(context)?.clone();
        let mut resolver = context.environment.create_fragment_spec_resolver(
            &context,
            &spec.container_name(),
            spec.fragments(),
            &props,
        );
        let data = resolver.resolve();
        let is_loading = resolver.is_loading();

        Ok(Self {
            spec,
            state: Rc::new(RefCell::new(FragmentState {
                context,
                props,
                data,
                is_loading,
                resolver,
            })),
            scheduler: UpdateScheduler::default(),
        })
    }

    fn handle_fragment_data_update(state: &Weak<RefCell<FragmentState>>, scheduler: &UpdateScheduler) {
        let Some(state) = state.upgrade() else {
            return;
        };
        let changed = state.borrow_mut().refresh();
        if changed {
            scheduler.schedule();
        }
    }

    fn subscribe_to_new_resolver(&self) {
        let callback: Rc<dyn Fn()> = Rc::new({
            let (state, scheduler) = (Rc::downgrade(&self.state), self.scheduler.clone());
            move || Self::handle_fragment_data_update(&state, &scheduler)
        });
        let changed = {
            let mut state = self.state.borrow_mut();
            state.resolver.set_callback(callback);
            // the store may have changed between render and mount
            state.refresh()
        };
        if changed {
            self.scheduler.schedule();
        }
    }
}

impl Container for FragmentContainer {
    type Input = ContainerInput;
    type Output = Rendered<FragmentRelayProp>;

    fn mounted(&self) {
        self.subscribe_to_new_resolver();
    }

    fn update(&self, input: ContainerInput) {
        let ContainerInput { context, props } = input;
        let mut state = self.state.borrow_mut();

        if !context.same_as(&state.context) || data_ids_changed(self.spec.fragments(), &state.props, &props) {
            tracing::debug!(container = %self.spec.container_name(), "recreating fragment resolver");
            state.resolver.dispose();
            state.resolver = context.environment.create_fragment_spec_resolver(
                &context,
                &self.spec.container_name(),
                self.spec.fragments(),
                &props,
            );
            state.context = context;
        } else {
            state.resolver.set_props(&props);
        }
        state.props = props;
        state.refresh();
    }

    fn updated(&self) {
        self.subscribe_to_new_resolver();
    }

    fn before_destroy(&self) {
        self.state.borrow_mut().resolver.dispose();
    }

    fn render(&self) -> Rendered<FragmentRelayProp> {
        let state = self.state.borrow();
        Rendered {
            props: merge_props(&state.props, &state.data),
            relay: FragmentRelayProp {
                is_loading: state.is_loading,
                environment: state.context.environment.clone(),
            },
        }
    }

    fn on_update(&self, callback: ScheduleUpdate) {
        self.scheduler.set(callback);
    }
}

impl fmt::Debug for FragmentContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("FragmentContainer")
            .field("name", &self.spec.container_name())
            .field("data", &state.data)
            .field("is_loading", &state.is_loading)
            .finish()
    }
}
