//! Integration tests for refetch containers.

use serde_json::json;
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use vrelay::{
    Container, ContainerInput, ContainerSpec, ObserverOrCallback, RefetchContainer, RefetchOptions,
    RefetchVariables, WrappedComponent,
};
use vrelay_runtime::{
    variables_from_value, ArgumentDefinition, ConcreteRequest, ErrorCode, FragmentMap, FragmentNode,
    GraphQLResponse, MemoryEnvironment, Props, QueuedNetwork, RelayContext, RelayError, Variables,
};

fn object(value: serde_json::Value) -> Props {
    variables_from_value(value).unwrap()
}

fn profile_spec() -> Rc<ContainerSpec> {
    let mut fragments = FragmentMap::new();
    fragments.insert(
        "user".into(),
        FragmentNode::new("Profile_user").argument(ArgumentDefinition::RootArgument { name: "scale".into() }),
    );
    Rc::new(ContainerSpec::build(WrappedComponent::named("Profile"), fragments).unwrap())
}

fn refetch_query() -> Rc<ConcreteRequest> {
    Rc::new(ConcreteRequest::query(
        "ProfileRefetchQuery",
        "query ProfileRefetchQuery($id: ID!, $scale: Int) { user(id: $id) { ...Profile_user } }",
    ))
}

struct Setup {
    network: QueuedNetwork,
    memory: MemoryEnvironment,
    context: RelayContext,
    container: RefetchContainer,
    updates: Rc<Cell<usize>>,
}

fn setup() -> Setup {
    let network = QueuedNetwork::new();
    let memory = MemoryEnvironment::new(network.clone());
    memory.commit_record("4", &json!({"id": "4", "name": "Zuck"}));
    let context = RelayContext::new(memory.shared(), object(json!({"scale": 1})));

    let container = RefetchContainer::new(
        profile_spec(),
        refetch_query(),
        Some(&context),
        object(json!({"user": {"__id": "4"}})),
    )
    .unwrap();
    let updates = Rc::new(Cell::new(0));
    container.on_update(Rc::new({
        let updates = updates.clone();
        move || updates.set(updates.get() + 1)
    }));
    container.mounted();

    Setup {
        network,
        memory,
        context,
        container,
        updates,
    }
}

fn recorder() -> (Rc<RefCell<Vec<Option<ErrorCode>>>>, ObserverOrCallback) {
    let outcomes: Rc<RefCell<Vec<Option<ErrorCode>>>> = Rc::default();
    let callback = ObserverOrCallback::callback({
        let outcomes = outcomes.clone();
        move |error: Option<RelayError>| outcomes.borrow_mut().push(error.map(|e| e.code))
    });
    (outcomes, callback)
}

#[test]
fn test_refetch_merges_root_variables() {
    let s = setup();
    let (outcomes, callback) = recorder();

    let refetch = s.container.render().relay.refetch;
    let subscription = refetch
        .refetch(object(json!({"id": "4", "scale": 2})), None, Some(callback), None)
        .unwrap();
    assert!(s.container.is_refetching());
    assert!(!subscription.closed());

    let request = s.network.peek().unwrap();
    assert_eq!(request.name, "ProfileRefetchQuery");
    assert_eq!(request.variables, object(json!({"id": "4", "scale": 2})));
    assert!(request.cache_config.is_none());

    assert!(s
        .network
        .resolve(GraphQLResponse::data(json!({"user": {"id": "4", "name": "Mark"}}))));

    assert!(subscription.closed());
    assert!(!s.container.is_refetching());
    assert_eq!(*outcomes.borrow(), vec![None]);
    assert_eq!(s.updates.get(), 1);
    assert_eq!(s.container.render().props["user"]["name"], json!("Mark"));

    let children = s.container.context_for_children().unwrap();
    assert_eq!(children.variables, object(json!({"id": "4", "scale": 2})));
}

#[test]
fn test_refetch_from_fragment_variables() {
    let s = setup();
    let refetch = s.container.handle();
    refetch
        .refetch(
            RefetchVariables::from_fn(|fragment_variables: &Variables| {
                let mut variables = fragment_variables.clone();
                variables.insert("id".into(), json!("4"));
                variables
            }),
            Some(object(json!({"scale": 3}))),
            None,
            Some(RefetchOptions::forced()),
        )
        .unwrap();

    let request = s.network.peek().unwrap();
    assert_eq!(request.variables, object(json!({"id": "4", "scale": 1})));
    assert_eq!(request.cache_config.map(|config| config.force), Some(true));

    assert!(s.network.resolve(GraphQLResponse::data(json!({"user": {"id": "4"}}))));
    let children = s.container.context_for_children().unwrap();
    assert_eq!(children.variables["scale"], json!(3));
}

#[test]
fn test_new_refetch_cancels_pending_one() {
    let s = setup();
    let (outcomes, callback) = recorder();
    let refetch = s.container.handle();

    let first = refetch
        .refetch(object(json!({"id": "4"})), None, Some(callback), None)
        .unwrap();
    let second = refetch.refetch(object(json!({"id": "5"})), None, None, None).unwrap();

    assert!(first.closed());
    assert!(!second.closed());
    assert_eq!(s.network.pending_count(), 1);
    assert!(s.container.is_refetching());
    // callbacks are not told about cancellation
    assert!(outcomes.borrow().is_empty());

    assert!(s.network.resolve(GraphQLResponse::data(json!({"user": {"id": "5", "name": "Chan"}}))));
    assert!(!s.container.is_refetching());
}

#[test]
fn test_refetch_error_reaches_callback() {
    let s = setup();
    let (outcomes, callback) = recorder();
    s.container
        .handle()
        .refetch(object(json!({"id": "4"})), None, Some(callback), None)
        .unwrap();

    assert!(s.network.reject(RelayError::network("offline")));
    assert_eq!(*outcomes.borrow(), vec![Some(ErrorCode::NetworkError)]);
    assert!(!s.container.is_refetching());
    assert_eq!(s.container.render().props["user"]["name"], json!("Zuck"));
}

#[test]
fn test_refetched_data_survives_same_props() {
    let s = setup();
    let refetch = s.container.handle();
    refetch.refetch(object(json!({"id": "4"})), None, None, None).unwrap();
    assert!(s.network.resolve(GraphQLResponse::data(json!({"user": {"id": "4", "name": "Mark"}}))));

    // same records and context: the refetched variables stay in effect
    s.container
        .update(ContainerInput::new(s.context.clone(), object(json!({"user": {"__id": "4"}}))));
    s.container.updated();
    assert_eq!(s.container.context_for_children().unwrap().variables["id"], json!("4"));
    assert_eq!(s.memory.total_retain_count(), 1);

    // new records reset the container and release the refetch
    s.memory.commit_record("5", &json!({"id": "5", "name": "Chan"}));
    s.container
        .update(ContainerInput::new(s.context.clone(), object(json!({"user": {"__id": "5"}}))));
    s.container.updated();
    assert_eq!(s.container.render().props["user"]["name"], json!("Chan"));
    assert_eq!(s.container.context_for_children().unwrap().variables, s.context.variables);
    assert_eq!(s.memory.total_retain_count(), 0);
}

#[test]
fn test_destroy_releases_everything() {
    let s = setup();
    let refetch = s.container.handle();
    refetch.refetch(object(json!({"id": "4"})), None, None, None).unwrap();
    assert!(s.network.resolve(GraphQLResponse::data(json!({"user": {"id": "4"}}))));
    let pending = refetch.refetch(object(json!({"id": "4", "scale": 5})), None, None, None).unwrap();
    assert_eq!(s.memory.total_retain_count(), 1);

    s.container.before_destroy();
    assert!(pending.closed());
    assert_eq!(s.memory.total_retain_count(), 0);
    assert_eq!(s.memory.subscription_count(), 0);
    assert_eq!(s.network.pending_count(), 0);

    drop(s.container);
    let err = refetch.refetch(object(json!({"id": "4"})), None, None, None).unwrap_err();
    assert_eq!(err.code, ErrorCode::Invariant);
}
