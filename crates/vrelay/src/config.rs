//! Configuration types accepted by the containers and the query renderer.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use vrelay_runtime::CacheConfig;

/// Where a query renderer reads its first result from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataFrom {
    /// Always fetch; render loading until the network answers.
    #[default]
    NetworkOnly,
    /// Render cached data when the store has all of it, then fetch.
    StoreThenNetwork,
}

/// Field names of a paginated connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConnectionInterface {
    pub edges: String,
    pub page_info: String,
    pub has_next_page: String,
    pub has_previous_page: String,
    pub end_cursor: String,
    pub start_cursor: String,
}

impl Default for ConnectionInterface {
    fn default() -> Self {
        Self {
            edges: "edges".into(),
            page_info: "pageInfo".into(),
            has_next_page: "hasNextPage".into(),
            has_previous_page: "hasPreviousPage".into(),
            end_cursor: "endCursor".into(),
            start_cursor: "startCursor".into(),
        }
    }
}

/// Options of a refetch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefetchOptions {
    /// Skip the cache and always hit the network.
    pub force: bool,
}

impl RefetchOptions {
    /// Options forcing a network request.
    pub fn forced() -> Self {
        Self { force: true }
    }

    pub(crate) fn cache_config(self) -> CacheConfig {
        CacheConfig::default().force(self.force)
    }
}

/// Options of a page load.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PageOptions {
    /// Refetch the whole connection instead of loading the next page.
    pub force: bool,
    /// Opaque value handed to the network layer alongside the request.
    pub rerun_param_experimental: Option<Value>,
}

impl PageOptions {
    /// Options forcing a network request.
    pub fn forced() -> Self {
        Self {
            force: true,
            rerun_param_experimental: None,
        }
    }

    pub(crate) fn cache_config(&self) -> CacheConfig {
        let config = CacheConfig::default().force(self.force);
        match &self.rerun_param_experimental {
            Some(param) => config.rerun_param(param.clone()),
            None => config,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_data_from_names() {
        let data_from: DataFrom = serde_json::from_value(json!("STORE_THEN_NETWORK")).unwrap();
        assert_eq!(data_from, DataFrom::StoreThenNetwork);
        assert_eq!(DataFrom::default(), DataFrom::NetworkOnly);
    }

    #[test]
    fn test_connection_interface_partial_override() {
        let interface: ConnectionInterface =
            serde_json::from_value(json!({"edges": "nodes", "endCursor": "last"})).unwrap();
        assert_eq!(interface.edges, "nodes");
        assert_eq!(interface.end_cursor, "last");
        assert_eq!(interface.page_info, "pageInfo");
    }

    #[test]
    fn test_page_options_cache_config() {
        let options = PageOptions {
            force: true,
            rerun_param_experimental: Some(json!({"param": "after"})),
        };
        let config = options.cache_config();
        assert!(config.force);
        assert_eq!(config.rerun_param_experimental, Some(json!({"param": "after"})));

        assert!(!PageOptions::default().cache_config().force);
        assert!(RefetchOptions::forced().cache_config().force);
    }
}
