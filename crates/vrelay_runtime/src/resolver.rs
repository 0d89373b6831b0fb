//! Fragment resolvers: read a container's fragment props from the store and
//! report when they change.

use crate::context::RelayContext;
use crate::disposable::Disposable;
use crate::fragment::{get_data_ids_from_object, get_variables_from_object, DataIds, FragmentMap, FragmentNode, Props};
use crate::operation::{DataId, Selector};
use crate::variables::Variables;
use serde_json::Value;
use std::cell::{Cell, RefCell};
use std::rc::Rc;

/// Reads the data of every fragment a container declares.
pub trait FragmentSpecResolver {
    /// Returns the resolved props. Returns the same `Rc` as the previous call
    /// when nothing changed.
    fn resolve(&mut self) -> Rc<Props>;

    /// Returns true if some fragment data is not in the store yet.
    fn is_loading(&self) -> bool;

    /// Points the resolver at new fragment references.
    fn set_props(&mut self, props: &Props);

    /// Replaces the fragment variables.
    fn set_variables(&mut self, variables: &Variables);

    /// Sets the callback invoked when resolved data may have changed.
    fn set_callback(&mut self, callback: Rc<dyn Fn()>);

    /// Releases every store subscription. The resolver must not be used
    /// afterwards.
    fn dispose(&mut self);
}

type CallbackSlot = Rc<RefCell<Option<Rc<dyn Fn()>>>>;

/// Resolver reading through [`Environment::lookup`](crate::Environment::lookup)
/// and invalidated by [`Environment::subscribe`](crate::Environment::subscribe).
pub struct StoreFragmentSpecResolver {
    context: RelayContext,
    container_name: String,
    fragments: FragmentMap,
    props: Props,
    variables: Variables,
    resolved: Option<Rc<Props>>,
    is_loading: bool,
    stale: Rc<Cell<bool>>,
    callback: CallbackSlot,
    subscriptions: Vec<Disposable>,
}

impl StoreFragmentSpecResolver {
    /// Creates a resolver. Nothing is read until [`resolve`](FragmentSpecResolver::resolve).
    pub fn new(
        context: RelayContext,
        container_name: &str,
        fragments: FragmentMap,
        props: Props,
    ) -> Self {
        let variables = get_variables_from_object(&context.variables, &fragments, &props);
        Self {
            context,
            container_name: container_name.to_string(),
            fragments,
            props,
            variables,
            resolved: None,
            is_loading: false,
            stale: Rc::new(Cell::new(true)),
            callback: Rc::default(),
            subscriptions: Vec::new(),
        }
    }

    fn read(&mut self, fragment: &FragmentNode, data_id: &DataId) -> Value {
        let environment = &self.context.environment;
        let selector = Selector::new(data_id.clone(), fragment.name.clone(), self.variables.clone());
        let snapshot = environment.lookup(&selector);
        self.is_loading |= snapshot.is_missing_data();

        let (stale, callback) = (self.stale.clone(), self.callback.clone());
        self.subscriptions.push(environment.subscribe(
            &snapshot,
            Box::new(move |_| {
                stale.set(true);
                let callback = callback.borrow().clone();
                if let Some(callback) = callback {
                    callback();
                }
            }),
        ));

        snapshot.data().cloned().unwrap_or(Value::Null)
    }

    fn release_subscriptions(&mut self) {
        for subscription in self.subscriptions.drain(..) {
            subscription.dispose();
        }
    }
}

impl FragmentSpecResolver for StoreFragmentSpecResolver {
    fn resolve(&mut self) -> Rc<Props> {
        if let Some(resolved) = &self.resolved {
            if !self.stale.get() {
                return resolved.clone();
            }
        }

        self.release_subscriptions();
        self.is_loading = false;

        let ids = get_data_ids_from_object(&self.fragments, &self.props);
        let fragments = self.fragments.clone();
        let mut data = Props::new();
        for (key, fragment) in &fragments {
            let value = match &ids[key] {
                DataIds::Single(id) => self.read(fragment, id),
                DataIds::Plural(items) => Value::Array(
                    items
                        .iter()
                        .map(|id| id.as_ref().map_or(Value::Null, |id| self.read(fragment, id)))
                        .collect(),
                ),
                DataIds::None => {
                    if self.props.get(key).is_some_and(|value| !value.is_null()) {
                        tracing::warn!(
                            container = %self.container_name,
                            prop = %key,
                            "expected prop to be a fragment reference"
                        );
                    }
                    Value::Null
                }
            };
            data.insert(key.clone(), value);
        }

        self.stale.set(false);
        let resolved = match &self.resolved {
            Some(previous) if **previous == data => previous.clone(),
            _ => Rc::new(data),
        };
        self.resolved = Some(resolved.clone());
        resolved
    }

    fn is_loading(&self) -> bool {
        self.is_loading
    }

    fn set_props(&mut self, props: &Props) {
        if self.props != *props {
            self.props = props.clone();
            self.stale.set(true);
        }
    }

    fn set_variables(&mut self, variables: &Variables) {
        if self.variables != *variables {
            self.variables = variables.clone();
            self.stale.set(true);
        }
    }

    fn set_callback(&mut self, callback: Rc<dyn Fn()>) {
        *self.callback.borrow_mut() = Some(callback);
    }

    fn dispose(&mut self) {
        self.release_subscriptions();
        self.callback.borrow_mut().take();
    }
}
