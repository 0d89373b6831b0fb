//! Pieces shared by every container: the fragment spec, the lifecycle the
//! host component runtime drives, and re-render scheduling.
//!
//! A host drives a container like this:
//!
//! ```text
//! new ─► render ─► mounted ─┬─► update ─► render ─► updated ─┐
//!                           │                                │
//!                           └────────────────◄───────────────┘
//!                           └─► before_destroy
//! ```
//!
//! Store or network events arriving between host calls change the rendered
//! state directly and ask the host to re-render through the callback given
//! to [`Container::on_update`].

use serde_json::Value;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use vrelay_runtime::{
    get_data_ids_from_object, FragmentMap, FragmentNode, Observer, Props, RelayContext, RelayError,
    RelayResult,
};

/// What a container wraps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WrappedComponent {
    /// A component, possibly anonymous.
    Component(Option<String>),
    /// The container's default slot.
    Slot,
}

impl WrappedComponent {
    /// A named component.
    pub fn named(name: impl Into<String>) -> Self {
        Self::Component(Some(name.into()))
    }
}

/// Returns the wrapped component's display name.
pub fn component_name(component: &WrappedComponent) -> &str {
    match component {
        WrappedComponent::Component(Some(name)) => name,
        WrappedComponent::Component(None) => "component",
        WrappedComponent::Slot => "slot",
    }
}

/// Returns the container's display name.
pub fn container_name(component: &WrappedComponent) -> String {
    format!("relay-{}", component_name(component))
}

/// Checks that `spec` is a non-empty object of fragments.
pub fn assert_fragment_map(component_name: &str, spec: &Value) -> RelayResult<()> {
    let fragments = match spec {
        Value::Object(fragments) if !fragments.is_empty() => fragments,
        other => {
            return Err(RelayError::invalid_fragment(format!(
                "Could not create Relay Container for `{component_name}`. \
                 Expected a set of GraphQL fragments, got `{other}` instead."
            )))
        }
    };
    for (key, fragment) in fragments {
        if !fragment.is_object() {
            return Err(RelayError::invalid_fragment(format!(
                "Could not create Relay Container for `{component_name}`. \
                 The value of fragment `{key}` was expected to be a fragment, got `{fragment}` instead."
            )));
        }
    }
    Ok(())
}

/// A validated set of fragments bound to a wrapped component.
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    component: WrappedComponent,
    fragments: FragmentMap,
}

impl ContainerSpec {
    /// Creates a spec from compiled fragments.
    pub fn build(component: WrappedComponent, fragments: FragmentMap) -> RelayResult<Self> {
        if fragments.is_empty() {
            return Err(RelayError::invalid_fragment(format!(
                "Could not create Relay Container for `{}`. Expected a set of GraphQL fragments, got none.",
                component_name(&component)
            )));
        }
        Ok(Self {
            component,
            fragments,
        })
    }

    /// Creates a spec from the JSON form of compiled fragments.
    pub fn from_json(component: WrappedComponent, spec: &Value) -> RelayResult<Self> {
        let name = component_name(&component).to_string();
        assert_fragment_map(&name, spec)?;

        let mut fragments = FragmentMap::new();
        if let Value::Object(entries) = spec {
            for (key, fragment) in entries {
                let node: FragmentNode = serde_json::from_value(fragment.clone()).map_err(|e| {
                    RelayError::invalid_fragment(format!(
                        "Could not create Relay Container for `{name}`. Invalid fragment `{key}`: {e}"
                    ))
                })?;
                fragments.insert(key.clone(), node);
            }
        }
        Self::build(component, fragments)
    }

    pub fn component(&self) -> &WrappedComponent {
        &self.component
    }

    pub fn fragments(&self) -> &FragmentMap {
        &self.fragments
    }

    /// Names of the props holding fragment references.
    pub fn prop_names(&self) -> impl Iterator<Item = &str> {
        self.fragments.keys().map(String::as_str)
    }

    pub fn component_name(&self) -> &str {
        component_name(&self.component)
    }

    pub fn container_name(&self) -> String {
        container_name(&self.component)
    }
}

/// Returns true if a fragment prop points to different records.
pub fn data_ids_changed(fragments: &FragmentMap, prev: &Props, next: &Props) -> bool {
    get_data_ids_from_object(fragments, prev) != get_data_ids_from_object(fragments, next)
}

/// Returns `props` with every fragment prop replaced by its resolved data.
pub fn merge_props(props: &Props, data: &Props) -> Props {
    let mut merged = props.clone();
    for (key, value) in data {
        merged.insert(key.clone(), value.clone());
    }
    merged
}

/// Host callback requesting a re-render.
pub type ScheduleUpdate = Rc<dyn Fn()>;

/// Slot for the host's re-render callback.
#[derive(Clone, Default)]
pub struct UpdateScheduler {
    callback: Rc<RefCell<Option<ScheduleUpdate>>>,
}

impl UpdateScheduler {
    pub fn set(&self, callback: ScheduleUpdate) {
        *self.callback.borrow_mut() = Some(callback);
    }

    /// Asks the host to re-render. Does nothing until a callback is set.
    pub fn schedule(&self) {
        let callback = self.callback.borrow().clone();
        if let Some(callback) = callback {
            callback();
        }
    }
}

impl fmt::Debug for UpdateScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpdateScheduler")
            .field("set", &self.callback.borrow().is_some())
            .finish()
    }
}

/// Props and context a fragment-based container receives from its parent.
#[derive(Debug, Clone)]
pub struct ContainerInput {
    pub context: RelayContext,
    pub props: Props,
}

impl ContainerInput {
    pub fn new(context: RelayContext, props: Props) -> Self {
        Self { context, props }
    }
}

/// Props handed to the wrapped component: the container's props with
/// fragment references replaced by data, plus the `relay` prop.
#[derive(Debug, Clone)]
pub struct Rendered<R> {
    pub props: Props,
    pub relay: R,
}

/// Lifecycle driven by the host component runtime.
pub trait Container {
    /// Props accepted on update.
    type Input;
    /// Render output.
    type Output;

    /// Called once after the first render.
    fn mounted(&self);

    /// Called when props or the parent context change, before re-rendering.
    fn update(&self, input: Self::Input);

    /// Called after a re-render triggered by [`update`](Self::update).
    fn updated(&self);

    /// Called before the container is destroyed. Releases everything.
    fn before_destroy(&self);

    fn render(&self) -> Self::Output;

    /// Context provided to nested containers. `None` passes the parent's
    /// context through.
    fn context_for_children(&self) -> Option<RelayContext> {
        None
    }

    /// Sets the callback asking the host to re-render.
    fn on_update(&self, callback: ScheduleUpdate);
}

/// Callback receiving the outcome of a refetch or page load.
pub type CompletionCallback = Rc<dyn Fn(Option<RelayError>)>;

/// Either a full observer or a plain completion callback.
pub enum ObserverOrCallback {
    Observer(Observer<()>),
    Callback(CompletionCallback),
}

impl ObserverOrCallback {
    pub fn callback(f: impl Fn(Option<RelayError>) + 'static) -> Self {
        Self::Callback(Rc::new(f))
    }

    /// Callbacks see each refetched payload and errors.
    pub(crate) fn into_refetch_observer(observer: Option<Self>) -> Observer<()> {
        match observer {
            Some(Self::Observer(observer)) => observer,
            Some(Self::Callback(callback)) => {
                let on_error = callback.clone();
                Observer::new()
                    .on_next(move |()| callback(None))
                    .on_error(move |error| on_error(Some(error)))
            }
            None => Observer::new(),
        }
    }

    /// Callbacks see the end of a page load, however it ends.
    pub(crate) fn into_page_observer(observer: Option<Self>) -> Observer<()> {
        match observer {
            Some(Self::Observer(observer)) => observer,
            Some(Self::Callback(callback)) => {
                let (on_complete, on_unsubscribe) = (callback.clone(), callback.clone());
                Observer::new()
                    .on_error(move |error| callback(Some(error)))
                    .on_complete(move || on_complete(None))
                    .on_unsubscribe(move || on_unsubscribe(None))
            }
            None => Observer::new(),
        }
    }
}

impl From<Observer<()>> for ObserverOrCallback {
    fn from(observer: Observer<()>) -> Self {
        Self::Observer(observer)
    }
}

impl fmt::Debug for ObserverOrCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Observer(observer) => f.debug_tuple("Observer").field(observer).finish(),
            Self::Callback(_) => f.write_str("Callback"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::cell::Cell;
    use vrelay_runtime::{ErrorCode, Observable};

    #[test]
    fn test_names() {
        assert_eq!(container_name(&WrappedComponent::named("Story")), "relay-Story");
        assert_eq!(component_name(&WrappedComponent::Component(None)), "component");
        assert_eq!(container_name(&WrappedComponent::Slot), "relay-slot");
    }

    #[test]
    fn test_assert_fragment_map() {
        assert!(assert_fragment_map("Story", &json!({"story": {"name": "Story_story"}})).is_ok());

        let err = assert_fragment_map("Story", &json!(null)).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidFragment);
        assert!(err.message.contains("Expected a set of GraphQL fragments"));

        let err = assert_fragment_map("Story", &json!({"story": "Story_story"})).unwrap_err();
        assert!(err.message.contains("The value of fragment `story`"));
    }

    #[test]
    fn test_spec_from_json() {
        let spec = ContainerSpec::from_json(
            WrappedComponent::named("Story"),
            &json!({
                "story": {"name": "Story_story"},
                "comments": {"name": "Story_comments", "plural": true},
            }),
        )
        .unwrap();

        assert_eq!(spec.prop_names().collect::<Vec<_>>(), vec!["story", "comments"]);
        assert!(spec.fragments()["comments"].plural);
        assert_eq!(spec.container_name(), "relay-Story");

        let err = ContainerSpec::from_json(WrappedComponent::Slot, &json!({"story": {"plural": true}})).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidFragment);
    }

    #[test]
    fn test_page_callback_fires_on_complete() {
        let calls = Rc::new(Cell::new(0));
        let observer = ObserverOrCallback::into_page_observer(Some(ObserverOrCallback::callback({
            let calls = calls.clone();
            move |error| {
                assert!(error.is_none());
                calls.set(calls.get() + 1);
            }
        })));
        Observable::from_value(()).subscribe(observer);
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_refetch_callback_fires_on_next_and_error() {
        let errors: Rc<RefCell<Vec<Option<String>>>> = Rc::default();
        let callback: CompletionCallback = Rc::new({
            let errors = errors.clone();
            move |error: Option<RelayError>| errors.borrow_mut().push(error.map(|e| e.message))
        });

        Observable::from_value(()).subscribe(ObserverOrCallback::into_refetch_observer(Some(
            ObserverOrCallback::Callback(callback.clone()),
        )));
        Observable::from_error(RelayError::network("offline")).subscribe(
            ObserverOrCallback::into_refetch_observer(Some(ObserverOrCallback::Callback(callback))),
        );

        assert_eq!(*errors.borrow(), vec![None, Some("offline".to_string())]);
    }
}
