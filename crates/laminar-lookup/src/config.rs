//! Lookup join configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::LookupJoinError;

/// Property key holding the cache settings inside a source's properties.
pub const LOOKUP_PROPS_KEY: &str = "lookup";

/// Default cache entry time-to-live in milliseconds (5 minutes).
pub const DEFAULT_CACHE_TTL_MS: u64 = 300_000;

/// Cache settings of a lookup join.
///
/// Deserialized from the `"lookup"` entry of the lookup source properties:
///
/// ```json
/// { "lookup": { "cache": true, "cacheTtl": 60000, "cacheMissingKey": false } }
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LookupConf {
    /// Whether lookup results are cached.
    pub cache: bool,
    /// Entry time-to-live in milliseconds.
    pub cache_ttl: u64,
    /// Whether empty lookup results are cached too.
    pub cache_missing_key: bool,
}

impl Default for LookupConf {
    fn default() -> Self {
        Self {
            cache: false,
            cache_ttl: DEFAULT_CACHE_TTL_MS,
            cache_missing_key: false,
        }
    }
}

impl LookupConf {
    /// Reads the `"lookup"` entry of `props`. Missing entry → defaults.
    ///
    /// # Errors
    ///
    /// Returns [`LookupJoinError::Config`] if the entry is not an object or
    /// holds values of the wrong type, or if [`validate`](Self::validate)
    /// fails.
    pub fn from_props(props: &Map<String, Value>) -> Result<Self, LookupJoinError> {
        let conf = match props.get(LOOKUP_PROPS_KEY) {
            None | Some(Value::Null) => Self::default(),
            Some(v @ Value::Object(_)) => serde_json::from_value(v.clone())
                .map_err(|e| LookupJoinError::Config(format!("invalid lookup properties: {e}")))?,
            Some(other) => {
                return Err(LookupJoinError::Config(format!(
                    "lookup properties must be an object, got {other}"
                )))
            }
        };
        conf.validate()?;
        Ok(conf)
    }

    /// Checks cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns [`LookupJoinError::Config`] if caching is enabled with a zero TTL.
    pub fn validate(&self) -> Result<(), LookupJoinError> {
        if self.cache && self.cache_ttl == 0 {
            return Err(LookupJoinError::Config(
                "cacheTtl must be positive when cache is enabled".to_string(),
            ));
        }
        Ok(())
    }

    /// Entry time-to-live.
    #[must_use]
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl)
    }
}

/// Options of the lookup source a join node reads from.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceOptions {
    /// Lookup source type (e.g. `"memory"`, `"redis"`, `"sql"`).
    pub source_type: String,
    /// Source properties, including the `"lookup"` cache settings.
    pub props: Map<String, Value>,
}

impl SourceOptions {
    /// Creates options for `source_type` with no properties.
    #[must_use]
    pub fn new(source_type: impl Into<String>) -> Self {
        Self {
            source_type: source_type.into(),
            props: Map::new(),
        }
    }

    /// Replaces the properties.
    #[must_use]
    pub fn with_props(mut self, props: Map<String, Value>) -> Self {
        self.props = props;
        self
    }
}

/// Runtime options of a lookup join node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeOptions {
    /// Capacity of the node's input and output channels.
    pub buffer_length: usize,
}

impl Default for NodeOptions {
    fn default() -> Self {
        Self {
            buffer_length: 1024,
        }
    }
}
