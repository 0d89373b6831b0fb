//! Normalized record storage.
//!
//! Objects carrying a string `id` field become records keyed by that ID;
//! other nested objects get a client ID derived from their parent's ID and
//! field path. Links are stored as `{"__ref": id}`.

use crate::fragment::{ConnectionDirection, FRAGMENT_ID_KEY};
use crate::operation::DataId;
use rustc_hash::{FxHashMap, FxHashSet};
use serde_json::{Map, Value};

/// A normalized record.
pub type Record = Map<String, Value>;

const REF_KEY: &str = "__ref";

const EDGES: &str = "edges";
const PAGE_INFO: &str = "pageInfo";
const CURSOR: &str = "cursor";
const END_CURSOR: &str = "endCursor";
const START_CURSOR: &str = "startCursor";
const HAS_NEXT_PAGE: &str = "hasNextPage";
const HAS_PREVIOUS_PAGE: &str = "hasPreviousPage";

/// A page of a connection field being written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionPage {
    /// Name of the connection field.
    pub field: String,
    pub direction: ConnectionDirection,
    /// Cursor the page continues from. `None` replaces the stored edges.
    pub cursor: Option<String>,
}

fn link(id: &str) -> Value {
    let mut object = Map::new();
    object.insert(REF_KEY.to_string(), Value::String(id.to_string()));
    Value::Object(object)
}

fn linked_id(value: &Value) -> Option<&str> {
    value.as_object()?.get(REF_KEY)?.as_str()
}

fn record_id(path: &str, fields: &Map<String, Value>) -> DataId {
    fields
        .get("id")
        .and_then(Value::as_str)
        .map_or_else(|| path.to_string(), str::to_string)
}

/// Result of a denormalizing read.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReadResult {
    pub data: Option<Value>,
    pub seen_records: FxHashSet<DataId>,
    pub is_missing_data: bool,
}

/// In-memory record store with per-root retain counts.
#[derive(Debug, Default)]
pub struct RecordStore {
    records: FxHashMap<DataId, Record>,
    retain_counts: FxHashMap<DataId, usize>,
}

impl RecordStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if the store holds no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Returns a record.
    pub fn get(&self, id: &str) -> Option<&Record> {
        self.records.get(id)
    }

    /// Returns true if the record exists.
    pub fn has(&self, id: &str) -> bool {
        self.records.contains_key(id)
    }

    /// Normalizes `data` into the record `id`, merging with existing fields.
    /// Returns the IDs of records whose content changed.
    pub fn publish(&mut self, id: &str, data: &Value) -> FxHashSet<DataId> {
        self.publish_page(id, data, &[])
    }

    /// Like [`publish`](Self::publish), merging the given connection pages
    /// into the stored connections instead of replacing their edges.
    ///
    /// A forward page is appended when its cursor is the stored
    /// `endCursor`, a backward page prepended when it is the stored
    /// `startCursor`; other pages with a cursor are ignored. Edges whose
    /// cursor is already stored are skipped.
    pub fn publish_page(&mut self, id: &str, data: &Value, pages: &[ConnectionPage]) -> FxHashSet<DataId> {
        let mut updated = FxHashSet::default();
        if let Value::Object(fields) = data {
            self.publish_object(id, fields, pages, &mut updated);
        } else {
            tracing::warn!(record = id, "ignoring non-object payload");
        }
        updated
    }

    /// Removes a record.
    pub fn delete(&mut self, id: &str) -> bool {
        self.records.remove(id).is_some()
    }

    fn publish_object(
        &mut self,
        id: &str,
        fields: &Map<String, Value>,
        pages: &[ConnectionPage],
        updated: &mut FxHashSet<DataId>,
    ) {
        let normalized: Vec<(String, Value)> = fields
            .iter()
            .filter(|(key, _)| key.as_str() != FRAGMENT_ID_KEY)
            .map(|(key, value)| {
                let path = format!("{id}:{key}");
                let page = pages.iter().find(|page| page.field == *key && page.cursor.is_some());
                let value = match (page, value) {
                    (Some(page), Value::Object(connection)) => {
                        self.merge_connection(&path, connection, page, pages, updated)
                    }
                    _ => self.normalize(&path, value, pages, updated),
                };
                (key.clone(), value)
            })
            .collect();

        // nested objects may have written this record already
        let mut next = self.records.get(id).cloned().unwrap_or_default();
        next.extend(normalized);
        if self.records.get(id) != Some(&next) {
            self.records.insert(id.to_string(), next);
            updated.insert(id.to_string());
        }
    }

    fn normalize(
        &mut self,
        path: &str,
        value: &Value,
        pages: &[ConnectionPage],
        updated: &mut FxHashSet<DataId>,
    ) -> Value {
        match value {
            Value::Object(fields) => {
                let id = record_id(path, fields);
                self.publish_object(&id, fields, pages, updated);
                link(&id)
            }
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .enumerate()
                    .map(|(index, item)| self.normalize(&format!("{path}:{index}"), item, pages, updated))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    fn merge_connection(
        &mut self,
        path: &str,
        fields: &Map<String, Value>,
        page: &ConnectionPage,
        pages: &[ConnectionPage],
        updated: &mut FxHashSet<DataId>,
    ) -> Value {
        let id = record_id(path, fields);
        let (Some(cursor), Some(existing)) = (page.cursor.as_deref(), self.records.get(&id).cloned()) else {
            self.publish_object(&id, fields, pages, updated);
            return link(&id);
        };

        let (boundary_key, page_info_keys) = match page.direction {
            ConnectionDirection::Forward => (END_CURSOR, [END_CURSOR, HAS_NEXT_PAGE]),
            ConnectionDirection::Backward => (START_CURSOR, [START_CURSOR, HAS_PREVIOUS_PAGE]),
        };
        let page_info_id = existing.get(PAGE_INFO).and_then(linked_id).map(str::to_string);
        let boundary = page_info_id
            .as_deref()
            .and_then(|page_info| self.records.get(page_info))
            .and_then(|page_info| page_info.get(boundary_key))
            .and_then(Value::as_str)
            .map(str::to_string);
        let Some(page_info_id) = page_info_id.filter(|_| boundary.as_deref() == Some(cursor)) else {
            tracing::warn!(connection = %id, cursor, "ignoring page that does not continue the stored connection");
            return link(&id);
        };

        let stored_edges: Vec<Value> = existing.get(EDGES).and_then(Value::as_array).cloned().unwrap_or_default();
        let stored_cursors: FxHashSet<String> = stored_edges
            .iter()
            .filter_map(linked_id)
            .filter_map(|edge| self.records.get(edge)?.get(CURSOR)?.as_str())
            .map(str::to_string)
            .collect();

        let mut added = Vec::new();
        for edge in fields.get(EDGES).and_then(Value::as_array).into_iter().flatten() {
            let edge_cursor = edge.get(CURSOR).and_then(Value::as_str);
            if edge_cursor.is_some_and(|edge_cursor| stored_cursors.contains(edge_cursor)) {
                continue;
            }
            let index = stored_edges.len() + added.len();
            added.push(self.normalize(&format!("{id}:{EDGES}:{index}"), edge, pages, updated));
        }
        let edges: Vec<Value> = match page.direction {
            ConnectionDirection::Forward => stored_edges.into_iter().chain(added).collect(),
            ConnectionDirection::Backward => added.into_iter().chain(stored_edges).collect(),
        };

        if let Some(Value::Object(page_info)) = fields.get(PAGE_INFO) {
            let page_side: Map<String, Value> = page_info
                .iter()
                .filter(|(key, _)| page_info_keys.contains(&key.as_str()))
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect();
            self.publish_object(&page_info_id, &page_side, pages, updated);
        }

        let rest: Map<String, Value> = fields
            .iter()
            .filter(|(key, _)| key.as_str() != EDGES && key.as_str() != PAGE_INFO)
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        self.publish_object(&id, &rest, pages, updated);

        let edges = Value::Array(edges);
        let record = self.records.entry(id.clone()).or_default();
        if record.get(EDGES) != Some(&edges) {
            record.insert(EDGES.to_string(), edges);
            updated.insert(id.clone());
        }
        link(&id)
    }

    /// Reads the record `id`, following links. Every materialized record
    /// carries its ID under `__id` so it can be passed on as a fragment
    /// reference.
    pub fn read(&self, id: &str) -> ReadResult {
        let mut result = ReadResult::default();
        if !self.records.contains_key(id) {
            result.seen_records.insert(id.to_string());
            result.is_missing_data = true;
            return result;
        }
        let mut path = Vec::new();
        result.data = Some(self.read_record(id, &mut path, &mut result));
        result
    }

    fn read_record(&self, id: &str, path: &mut Vec<DataId>, result: &mut ReadResult) -> Value {
        result.seen_records.insert(id.to_string());
        let Some(record) = self.records.get(id) else {
            result.is_missing_data = true;
            return Value::Null;
        };

        let mut object = Map::new();
        object.insert(FRAGMENT_ID_KEY.to_string(), Value::String(id.to_string()));
        // cycles are cut at the back edge, leaving a bare reference
        if path.iter().any(|visited| visited == id) {
            return Value::Object(object);
        }

        path.push(id.to_string());
        for (key, value) in record {
            object.insert(key.clone(), self.read_value(value, path, result));
        }
        path.pop();
        Value::Object(object)
    }

    fn read_value(&self, value: &Value, path: &mut Vec<DataId>, result: &mut ReadResult) -> Value {
        if let Some(id) = linked_id(value) {
            return self.read_record(id, path, result);
        }
        match value {
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|item| self.read_value(item, path, result))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    /// Increments the retain count of a root.
    pub fn retain(&mut self, id: &str) {
        *self.retain_counts.entry(id.to_string()).or_insert(0) += 1;
    }

    /// Decrements the retain count of a root.
    pub fn release(&mut self, id: &str) {
        if let Some(count) = self.retain_counts.get_mut(id) {
            *count -= 1;
            if *count == 0 {
                self.retain_counts.remove(id);
            }
        } else {
            tracing::error!(record = id, "released a root that was not retained");
        }
    }

    /// Returns the retain count of a root.
    pub fn retain_count(&self, id: &str) -> usize {
        self.retain_counts.get(id).copied().unwrap_or(0)
    }

    /// Returns the total number of live retains.
    pub fn total_retain_count(&self) -> usize {
        self.retain_counts.values().sum()
    }

    /// Deletes every record not reachable from a retained root. Returns the
    /// number of deleted records.
    pub fn collect_garbage(&mut self) -> usize {
        let mut reachable: FxHashSet<DataId> = FxHashSet::default();
        let mut stack: Vec<DataId> = self.retain_counts.keys().cloned().collect();
        while let Some(id) = stack.pop() {
            if !reachable.insert(id.clone()) {
                continue;
            }
            if let Some(record) = self.records.get(&id) {
                for value in record.values() {
                    collect_links(value, &mut stack);
                }
            }
        }

        let before = self.records.len();
        self.records.retain(|id, _| reachable.contains(id));
        before - self.records.len()
    }
}

fn collect_links(value: &Value, out: &mut Vec<DataId>) {
    if let Some(id) = linked_id(value) {
        out.push(id.to_string());
    } else if let Value::Array(items) = value {
        for item in items {
            collect_links(item, out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_publish_normalizes_by_id() {
        let mut store = RecordStore::new();
        let updated = store.publish(
            "root",
            &json!({"me": {"id": "4", "name": "Zuck", "address": {"city": "Menlo Park"}}}),
        );

        assert!(updated.contains("root"));
        assert!(updated.contains("4"));
        assert!(store.has("4:address"));
        assert_eq!(store.get("root").unwrap()["me"], json!({"__ref": "4"}));
    }

    #[test]
    fn test_read_denormalizes() {
        let mut store = RecordStore::new();
        store.publish("root", &json!({"friends": [{"id": "1", "name": "A"}, {"id": "2", "name": "B"}]}));

        let result = store.read("root");
        assert!(!result.is_missing_data);
        assert_eq!(
            result.data.unwrap(),
            json!({
                "__id": "root",
                "friends": [{"__id": "1", "id": "1", "name": "A"}, {"__id": "2", "id": "2", "name": "B"}]
            })
        );
        assert_eq!(result.seen_records.len(), 3);
    }

    #[test]
    fn test_read_missing() {
        let mut store = RecordStore::new();
        assert!(store.read("nope").is_missing_data);

        store.publish("root", &json!({"me": {"id": "4"}}));
        store.delete("4");
        let result = store.read("root");
        assert!(result.is_missing_data);
        assert_eq!(result.data.unwrap()["me"], Value::Null);
    }

    #[test]
    fn test_republish_unchanged_reports_nothing() {
        let mut store = RecordStore::new();
        store.publish("root", &json!({"me": {"id": "4", "name": "Zuck"}}));
        let updated = store.publish("root", &json!({"me": {"id": "4", "name": "Zuck"}}));
        assert!(updated.is_empty());

        let updated = store.publish("4", &json!({"name": "Mark"}));
        assert_eq!(updated.into_iter().collect::<Vec<_>>(), vec!["4".to_string()]);
    }

    fn friends(edges: &[(&str, &str)], end_cursor: &str, has_next_page: bool) -> Value {
        json!({
            "edges": edges
                .iter()
                .map(|(cursor, id)| json!({"cursor": cursor, "node": {"id": id}}))
                .collect::<Vec<_>>(),
            "pageInfo": {"startCursor": edges[0].0, "endCursor": end_cursor, "hasNextPage": has_next_page},
        })
    }

    fn edge_cursors(store: &RecordStore) -> Vec<Value> {
        let data = store.read("4").data.unwrap();
        data["friends"]["edges"]
            .as_array()
            .unwrap()
            .iter()
            .map(|edge| edge["cursor"].clone())
            .collect()
    }

    #[test]
    fn test_connection_pages_are_merged() {
        let mut store = RecordStore::new();
        store.publish("4", &json!({"id": "4", "friends": friends(&[("c10", "10")], "c10", true)}));

        let forward = |cursor: Option<&str>| ConnectionPage {
            field: "friends".into(),
            direction: ConnectionDirection::Forward,
            cursor: cursor.map(str::to_string),
        };
        let updated = store.publish_page(
            "root",
            &json!({"user": {"id": "4", "friends": friends(&[("c10", "10"), ("c11", "11")], "c11", false)}}),
            &[forward(Some("c10"))],
        );
        assert!(updated.contains("4:friends"));
        assert_eq!(edge_cursors(&store), vec![json!("c10"), json!("c11")]);
        let page_info = &store.read("4").data.unwrap()["friends"]["pageInfo"];
        assert_eq!(page_info["startCursor"], json!("c10"));
        assert_eq!(page_info["endCursor"], json!("c11"));
        assert_eq!(page_info["hasNextPage"], json!(false));

        // a stale cursor leaves the connection alone
        store.publish_page(
            "root",
            &json!({"user": {"id": "4", "friends": friends(&[("c20", "20")], "c20", true)}}),
            &[forward(Some("c10"))],
        );
        assert_eq!(edge_cursors(&store).len(), 2);

        // no cursor means a first page
        store.publish_page(
            "root",
            &json!({"user": {"id": "4", "friends": friends(&[("c30", "30")], "c30", true)}}),
            &[forward(None)],
        );
        assert_eq!(edge_cursors(&store), vec![json!("c30")]);
    }

    #[test]
    fn test_backward_pages_are_prepended() {
        let mut store = RecordStore::new();
        store.publish("4", &json!({"friends": friends(&[("c10", "10")], "c10", true)}));

        store.publish_page(
            "4",
            &json!({"friends": {
                "edges": [{"cursor": "c9", "node": {"id": "9"}}],
                "pageInfo": {"startCursor": "c9", "hasPreviousPage": false, "endCursor": "c9"},
            }}),
            &[ConnectionPage {
                field: "friends".into(),
                direction: ConnectionDirection::Backward,
                cursor: Some("c10".into()),
            }],
        );
        assert_eq!(edge_cursors(&store), vec![json!("c9"), json!("c10")]);
        let page_info = &store.read("4").data.unwrap()["friends"]["pageInfo"];
        assert_eq!(page_info["startCursor"], json!("c9"));
        assert_eq!(page_info["endCursor"], json!("c10"));
        assert_eq!(page_info["hasPreviousPage"], json!(false));
    }

    #[test]
    fn test_cycles_are_cut() {
        let mut store = RecordStore::new();
        store.publish("1", &json!({"best": {"id": "2", "best": {"id": "1"}}}));

        let data = store.read("1").data.unwrap();
        assert_eq!(data["best"]["best"], json!({"__id": "1"}));
    }

    #[test]
    fn test_collect_garbage() {
        let mut store = RecordStore::new();
        store.publish("a", &json!({"me": {"id": "4"}}));
        store.publish("b", &json!({"me": {"id": "5"}}));
        store.retain("a");

        assert_eq!(store.collect_garbage(), 2);
        assert!(store.has("a"));
        assert!(store.has("4"));
        assert!(!store.has("5"));

        store.release("a");
        assert_eq!(store.retain_count("a"), 0);
        assert_eq!(store.collect_garbage(), 2);
        assert!(store.is_empty());
    }
}
