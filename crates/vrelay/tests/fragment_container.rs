//! Integration tests for fragment containers reading from a memory store.

use serde_json::json;
use std::cell::Cell;
use std::rc::Rc;
use vrelay::{Container, ContainerInput, ContainerSpec, FragmentContainer, WrappedComponent};
use vrelay_runtime::{
    variables_from_value, ErrorCode, FragmentMap, FragmentNode, MemoryEnvironment, Props, QueuedNetwork,
    RelayContext, Variables,
};

fn props(value: serde_json::Value) -> Props {
    variables_from_value(value).unwrap()
}

fn profile_spec() -> Rc<ContainerSpec> {
    let mut fragments = FragmentMap::new();
    fragments.insert("user".into(), FragmentNode::new("Profile_user"));
    Rc::new(ContainerSpec::build(WrappedComponent::named("Profile"), fragments).unwrap())
}

fn setup() -> (MemoryEnvironment, RelayContext) {
    let environment = MemoryEnvironment::new(QueuedNetwork::new());
    environment.commit_record("4", &json!({"id": "4", "name": "Zuck"}));
    environment.commit_record("5", &json!({"id": "5", "name": "Chan"}));
    let context = RelayContext::new(environment.shared(), Variables::new());
    (environment, context)
}

fn count_updates(container: &impl Container) -> Rc<Cell<usize>> {
    let updates = Rc::new(Cell::new(0));
    container.on_update(Rc::new({
        let updates = updates.clone();
        move || updates.set(updates.get() + 1)
    }));
    updates
}

#[test]
fn test_requires_context() {
    let err = FragmentContainer::new(profile_spec(), None, Props::new()).unwrap_err();
    assert_eq!(err.code, ErrorCode::InvalidContext);
}

#[test]
fn test_render_merges_fragment_data() {
    let (_environment, context) = setup();
    let container = FragmentContainer::new(
        profile_spec(),
        Some(&context),
        props(json!({"user": {"__id": "4"}, "title": "Profile"})),
    )
    .unwrap();

    let rendered = container.render();
    assert_eq!(rendered.props["user"]["name"], json!("Zuck"));
    assert_eq!(rendered.props["title"], json!("Profile"));
    assert!(!rendered.relay.is_loading);
    assert!(container.context_for_children().is_none());
}

#[test]
fn test_store_changes_schedule_updates() {
    let (environment, context) = setup();
    let container =
        FragmentContainer::new(profile_spec(), Some(&context), props(json!({"user": {"__id": "4"}}))).unwrap();
    let updates = count_updates(&container);

    // a change between render and mount is picked up when mounting
    environment.commit_record("4", &json!({"name": "Mark"}));
    container.mounted();
    assert_eq!(updates.get(), 1);
    assert_eq!(container.render().props["user"]["name"], json!("Mark"));

    environment.commit_record("4", &json!({"name": "Zuck"}));
    assert_eq!(updates.get(), 2);
    assert_eq!(container.render().props["user"]["name"], json!("Zuck"));

    // unrelated records do not re-render
    environment.commit_record("5", &json!({"name": "Priscilla"}));
    assert_eq!(updates.get(), 2);
}

#[test]
fn test_missing_record_is_loading() {
    let (environment, context) = setup();
    let container =
        FragmentContainer::new(profile_spec(), Some(&context), props(json!({"user": {"__id": "6"}}))).unwrap();
    container.mounted();
    assert!(container.render().relay.is_loading);

    environment.commit_record("6", &json!({"id": "6", "name": "Max"}));
    let rendered = container.render();
    assert!(!rendered.relay.is_loading);
    assert_eq!(rendered.props["user"]["name"], json!("Max"));
}

#[test]
fn test_update_switches_records_and_destroy_releases() {
    let (environment, context) = setup();
    let container =
        FragmentContainer::new(profile_spec(), Some(&context), props(json!({"user": {"__id": "4"}}))).unwrap();
    container.mounted();
    assert_eq!(environment.subscription_count(), 1);

    container.update(ContainerInput::new(context.clone(), props(json!({"user": {"__id": "5"}}))));
    container.updated();
    assert_eq!(container.render().props["user"]["name"], json!("Chan"));
    assert_eq!(environment.subscription_count(), 1);

    // the old record no longer affects the container
    let updates = count_updates(&container);
    environment.commit_record("4", &json!({"name": "Mark"}));
    assert_eq!(updates.get(), 0);

    // a new environment handle recreates the resolver as well
    let other = RelayContext::new(environment.shared(), Variables::new());
    container.update(ContainerInput::new(other, props(json!({"user": {"__id": "5"}}))));
    container.updated();
    assert_eq!(environment.subscription_count(), 1);

    container.before_destroy();
    assert_eq!(environment.subscription_count(), 0);
}
