//! Integration tests for pagination containers paging a `friends`
//! connection.

use serde_json::{json, Value};
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use vrelay::{
    ConnectionConfig, Container, ContainerSpec, ObserverOrCallback, PageOptions, PageVariables,
    PaginationContainer, WrappedComponent,
};
use vrelay_runtime::{
    variables_from_value, ArgumentDefinition, ConcreteRequest, ConnectionDirection, ConnectionMetadata,
    ErrorCode, FragmentMap, FragmentMetadata, FragmentNode, GraphQLResponse, MemoryEnvironment, Props,
    QueuedNetwork, RelayContext, RelayError, Variables,
};

fn object(value: Value) -> Props {
    variables_from_value(value).unwrap()
}

fn friends_connection() -> ConnectionMetadata {
    ConnectionMetadata {
        path: Some(vec!["friends".into()]),
        direction: Some(ConnectionDirection::Forward),
        cursor: Some("after".into()),
        count: Some("count".into()),
    }
}

fn friends_fragment() -> FragmentNode {
    FragmentNode::new("Friends_user")
        .argument(ArgumentDefinition::LocalArgument {
            name: "count".into(),
            default_value: json!(1),
        })
        .argument(ArgumentDefinition::LocalArgument {
            name: "after".into(),
            default_value: Value::Null,
        })
        .with_metadata(FragmentMetadata {
            connection: vec![friends_connection()],
        })
}

fn spec(fragment: FragmentNode) -> Rc<ContainerSpec> {
    let mut fragments = FragmentMap::new();
    fragments.insert("user".into(), fragment);
    Rc::new(ContainerSpec::build(WrappedComponent::named("Friends"), fragments).unwrap())
}

fn config() -> ConnectionConfig {
    let query = Rc::new(ConcreteRequest::query(
        "FriendsPaginationQuery",
        "query FriendsPaginationQuery($id: ID!, $count: Int!, $after: String) { \
         user(id: $id) { ...Friends_user @arguments(count: $count, after: $after) } }",
    ));
    ConnectionConfig::new(query, |props: &Props, page: PageVariables, _: &Variables| {
        object(json!({
            "id": props["user"]["id"],
            "count": page.count,
            "after": page.cursor,
        }))
    })
}

fn page(edges: &[(&str, &str)], has_next_page: bool) -> Value {
    let end_cursor = edges.last().map(|(cursor, _)| *cursor);
    json!({
        "edges": edges
            .iter()
            .map(|(cursor, id)| json!({"cursor": cursor, "node": {"id": id}}))
            .collect::<Vec<_>>(),
        "pageInfo": {"hasNextPage": has_next_page, "endCursor": end_cursor},
    })
}

struct Setup {
    network: QueuedNetwork,
    memory: MemoryEnvironment,
    container: PaginationContainer,
    updates: Rc<Cell<usize>>,
}

fn setup_with(user_id: &str) -> Setup {
    let network = QueuedNetwork::new();
    let memory = MemoryEnvironment::new(network.clone());
    memory.register_connection(&friends_connection());
    memory.commit_record("4", &json!({"id": "4", "friends": page(&[("c10", "10")], true)}));
    let context = RelayContext::new(memory.shared(), Variables::new());

    let container = PaginationContainer::new(
        spec(friends_fragment()),
        config(),
        Some(&context),
        object(json!({"user": {"__id": user_id}})),
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
        container,
        updates,
    }
}

fn setup() -> Setup {
    setup_with("4")
}

fn recorder() -> (Rc<RefCell<Vec<Option<ErrorCode>>>>, ObserverOrCallback) {
    let outcomes: Rc<RefCell<Vec<Option<ErrorCode>>>> = Rc::default();
    let callback = ObserverOrCallback::callback({
        let outcomes = outcomes.clone();
        move |error: Option<RelayError>| outcomes.borrow_mut().push(error.map(|e| e.code))
    });
    (outcomes, callback)
}

fn friends_response(edges: &[(&str, &str)], has_next_page: bool) -> GraphQLResponse {
    GraphQLResponse::data(json!({"user": {"id": "4", "friends": page(edges, has_next_page)}}))
}

#[test]
fn test_load_more_fetches_next_page() {
    let s = setup();
    let pagination = s.container.render().relay.pagination;
    assert!(pagination.has_more().unwrap());
    assert!(!pagination.is_loading());

    let (outcomes, callback) = recorder();
    let subscription = pagination.load_more(2, Some(callback), None).unwrap().unwrap();
    assert!(pagination.is_loading());
    assert!(s.container.is_a_request_in_flight());

    let request = s.network.peek().unwrap();
    assert_eq!(request.name, "FriendsPaginationQuery");
    assert_eq!(request.variables, object(json!({"id": "4", "count": 2, "after": "c10"})));
    assert!(request.cache_config.is_none());

    assert!(s.network.resolve(friends_response(&[("c11", "11"), ("c12", "12")], true)));

    assert!(subscription.closed());
    assert_eq!(*outcomes.borrow(), vec![None]);
    assert!(!pagination.is_loading());
    assert!(!s.container.is_a_request_in_flight());
    assert!(pagination.has_more().unwrap());
    assert_eq!(s.updates.get(), 1);

    let rendered = s.container.render();
    let friends = &rendered.props["user"]["friends"];
    assert_eq!(friends["edges"].as_array().unwrap().len(), 3);
    assert_eq!(friends["edges"][0]["node"]["id"], json!("10"));
    assert_eq!(friends["edges"][2]["node"]["id"], json!("12"));
    assert_eq!(friends["pageInfo"]["endCursor"], json!("c12"));
    assert_eq!(s.memory.total_retain_count(), 1);

    // the next page continues after the merged edges
    pagination.load_more(2, None, None).unwrap().unwrap();
    assert_eq!(
        s.network.peek().unwrap().variables,
        object(json!({"id": "4", "count": 2, "after": "c12"}))
    );
    assert!(s.network.resolve(friends_response(&[("c13", "13")], false)));
    assert!(!pagination.has_more().unwrap());
    let rendered = s.container.render();
    assert_eq!(rendered.props["user"]["friends"]["edges"].as_array().unwrap().len(), 4);
    assert_eq!(s.memory.total_retain_count(), 2);

    // a forced load asks for every loaded edge plus the page
    pagination.load_more(2, None, Some(PageOptions::forced())).unwrap().unwrap();
    assert_eq!(
        s.network.peek().unwrap().variables,
        object(json!({"id": "4", "count": 6, "after": null}))
    );
}

#[test]
fn test_new_page_load_cancels_previous() {
    let s = setup();
    let pagination = s.container.handle();
    let (first_outcomes, first_callback) = recorder();

    let first = pagination.load_more(2, Some(first_callback), None).unwrap().unwrap();
    let second = pagination.load_more(5, None, None).unwrap().unwrap();

    assert!(first.closed());
    assert!(!second.closed());
    // page callbacks hear about cancellation
    assert_eq!(*first_outcomes.borrow(), vec![None]);
    assert_eq!(s.network.pending_count(), 1);
    assert_eq!(s.network.peek().unwrap().variables["count"], json!(5));
    assert!(pagination.is_loading());
    assert!(s.container.is_a_request_in_flight());
}

#[test]
fn test_refetch_connection_forces_first_page() {
    let s = setup();
    let pagination = s.container.handle();
    pagination
        .refetch_connection(5, None, Some(object(json!({"orderBy": "name"}))))
        .unwrap();

    let request = s.network.peek().unwrap();
    assert_eq!(
        request.variables,
        object(json!({"id": "4", "count": 5, "after": null, "orderBy": "name"}))
    );
    assert_eq!(request.cache_config.map(|config| config.force), Some(true));

    assert!(s.network.resolve(friends_response(&[("c20", "20")], true)));
    let children = s.container.context_for_children().unwrap();
    assert_eq!(children.variables["orderBy"], json!("name"));
}

#[test]
fn test_forced_load_more_refetches_connection() {
    let s = setup();
    s.container
        .handle()
        .load_more(
            2,
            None,
            Some(PageOptions {
                force: true,
                rerun_param_experimental: Some(json!("rerun")),
            }),
        )
        .unwrap()
        .unwrap();

    let request = s.network.peek().unwrap();
    assert_eq!(request.variables, object(json!({"id": "4", "count": 3, "after": null})));
    assert_eq!(request.cache_config.map(|config| config.force), Some(true));
}

#[test]
fn test_forced_load_more_count_saturates() {
    let s = setup();
    s.container
        .handle()
        .load_more(u64::MAX, None, Some(PageOptions::forced()))
        .unwrap()
        .unwrap();
    assert_eq!(s.network.peek().unwrap().variables["count"], json!(u64::MAX));
}

#[test]
fn test_page_error_reaches_callback() {
    let s = setup();
    let pagination = s.container.handle();
    let (outcomes, callback) = recorder();
    pagination.load_more(2, Some(callback), None).unwrap();

    assert!(s.network.reject(RelayError::network("offline")));
    assert_eq!(*outcomes.borrow(), vec![Some(ErrorCode::NetworkError)]);
    assert!(!pagination.is_loading());
    assert!(pagination.has_more().unwrap());
}

#[test]
fn test_load_more_without_connection() {
    let s = setup_with("404");
    let pagination = s.container.handle();
    assert!(!pagination.has_more().unwrap());

    let (outcomes, callback) = recorder();
    assert!(pagination.load_more(2, Some(callback), None).unwrap().is_none());
    assert_eq!(*outcomes.borrow(), vec![None]);
    assert_eq!(s.network.request_count(), 0);
}

#[test]
fn test_connection_must_be_locatable() {
    let memory = MemoryEnvironment::new(QueuedNetwork::new());
    let context = RelayContext::new(memory.shared(), Variables::new());

    let err = PaginationContainer::new(
        spec(FragmentNode::new("Friends_user")),
        config(),
        Some(&context),
        object(json!({"user": {"__id": "4"}})),
    )
    .unwrap_err();
    assert_eq!(err.code, ErrorCode::ConnectionError);
    assert!(err.message.contains("getConnectionFromProps"));

    // explicit functions stand in for missing metadata
    let container = PaginationContainer::new(
        spec(FragmentNode::new("Friends_user")),
        config()
            .direction(ConnectionDirection::Forward)
            .connection_from_props(|props: &Props| props.get("user")?.get("friends").cloned())
            .fragment_variables(|variables: &Variables, _| variables.clone()),
        Some(&context),
        object(json!({"user": {"__id": "4"}})),
    );
    assert!(container.is_ok());
}

#[test]
fn test_destroy_releases_everything() {
    let s = setup();
    let pagination = s.container.handle();
    pagination.load_more(2, None, None).unwrap();
    assert!(s.network.resolve(friends_response(&[("c11", "11")], true)));
    let pending = pagination.load_more(2, None, None).unwrap().unwrap();
    assert_eq!(s.memory.total_retain_count(), 1);

    s.container.before_destroy();
    assert!(pending.closed());
    assert!(!s.container.is_a_request_in_flight());
    assert_eq!(s.memory.total_retain_count(), 0);
    assert_eq!(s.memory.subscription_count(), 0);
    assert_eq!(s.network.pending_count(), 0);

    drop(s.container);
    let err = pagination.load_more(2, None, None).unwrap_err();
    assert_eq!(err.code, ErrorCode::Invariant);
}
