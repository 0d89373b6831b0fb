//! Deduplicates query renderer requests between construction and mount.
//!
//! A renderer may be constructed several times for one mount. The first
//! construction fetches and records its fetcher here; later constructions
//! with the same request and variables reuse it. The entry is removed once
//! the renderer mounts, receives its first data change, retries after an
//! error, or commits an update.

use crate::query_fetcher::QueryFetcher;
use rustc_hash::FxHashMap;
use serde_json::{Map, Value};
use std::cell::RefCell;
use std::rc::Rc;
use vrelay_runtime::{RequestParameters, Snapshot, Variables};

/// Cached request state.
#[derive(Debug, Clone)]
pub struct RequestCacheEntry {
    pub query_fetcher: QueryFetcher,
    pub snapshot: Option<Snapshot>,
}

/// Shared map from request key to in-flight fetcher.
///
/// Cloning returns a handle to the same cache.
#[derive(Debug, Clone, Default)]
pub struct RequestCache {
    entries: Rc<RefCell<FxHashMap<String, RequestCacheEntry>>>,
}

impl RequestCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the entry stored under `key`.
    pub fn get(&self, key: &str) -> Option<RequestCacheEntry> {
        self.entries.borrow().get(key).cloned()
    }

    /// Returns true if an entry is stored under `key`.
    pub fn contains(&self, key: &str) -> bool {
        self.entries.borrow().contains_key(key)
    }

    /// Stores an entry, replacing any previous one.
    pub fn insert(&self, key: impl Into<String>, query_fetcher: QueryFetcher, snapshot: Option<Snapshot>) {
        let key = key.into();
        tracing::trace!(%key, "caching request");
        self.entries.borrow_mut().insert(
            key,
            RequestCacheEntry {
                query_fetcher,
                snapshot,
            },
        );
    }

    /// Removes the entry under `key`. Returns true if one was present.
    pub fn remove(&self, key: &str) -> bool {
        self.entries.borrow_mut().remove(key).is_some()
    }

    /// Returns the number of entries.
    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    /// Returns true if no entry is stored.
    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }
}

fn sorted(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(key, value)| (key.clone(), sorted(value)))
                    .collect::<Map<_, _>>(),
            )
        }
        Value::Array(items) => Value::Array(items.iter().map(sorted).collect()),
        other => other.clone(),
    }
}

/// Returns the key identifying a request: the persisted ID or query text,
/// plus the variables, serialized with sorted object keys.
pub fn request_cache_key(params: &RequestParameters, variables: &Variables) -> String {
    let mut key = Map::new();
    key.insert("id".into(), Value::String(params.identifier().to_string()));
    key.insert("variables".into(), sorted(&Value::Object(variables.clone())));
    Value::Object(key).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use vrelay_runtime::{variables_from_value, ConcreteRequest};

    #[test]
    fn test_key_ignores_variable_order() {
        let request = ConcreteRequest::query("FeedQuery", "query FeedQuery { feed { id } }");
        let a = variables_from_value(json!({"first": 10, "after": {"x": 1, "a": 2}})).unwrap();
        let b = variables_from_value(json!({"after": {"a": 2, "x": 1}, "first": 10})).unwrap();

        assert_eq!(request_cache_key(&request.params, &a), request_cache_key(&request.params, &b));
    }

    #[test]
    fn test_key_prefers_persisted_id() {
        let request = ConcreteRequest::query("FeedQuery", "query FeedQuery { feed { id } }").with_id("feed-1");
        let key = request_cache_key(&request.params, &Variables::new());
        assert_eq!(key, r#"{"id":"feed-1","variables":{}}"#);
    }

    #[test]
    fn test_insert_and_remove() {
        let cache = RequestCache::new();
        let shared = cache.clone();
        cache.insert("a", QueryFetcher::new(), None);

        assert!(shared.contains("a"));
        assert_eq!(shared.len(), 1);
        assert!(shared.remove("a"));
        assert!(!cache.remove("a"));
        assert!(cache.is_empty());
    }
}
