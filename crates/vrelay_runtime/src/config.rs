//! Per-request cache configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Cache behaviour requested for one execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheConfig {
    /// Bypass any network-level response cache.
    #[serde(default)]
    pub force: bool,

    /// Re-run the request on this interval.
    #[serde(default, with = "duration_millis")]
    pub poll: Option<Duration>,

    /// Opaque parameter forwarded to the network layer when re-running.
    #[serde(default)]
    pub rerun_param_experimental: Option<serde_json::Value>,

    /// Free-form metadata forwarded to the network layer.
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

impl CacheConfig {
    /// Creates a config that forces a network round trip.
    pub fn forced() -> Self {
        Self {
            force: true,
            ..Default::default()
        }
    }

    /// Sets `force`.
    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Sets the poll interval.
    pub fn poll(mut self, interval: Duration) -> Self {
        self.poll = Some(interval);
        self
    }

    /// Sets the experimental rerun parameter.
    pub fn rerun_param(mut self, param: serde_json::Value) -> Self {
        self.rerun_param_experimental = Some(param);
        self
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
        value
            .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
            .serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}
