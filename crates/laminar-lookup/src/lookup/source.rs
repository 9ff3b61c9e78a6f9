//! Async lookup source trait.
//!
//! [`LookupSource`] answers keyed queries against external reference data
//! (a database table, a remote key-value store, a file). A lookup join node
//! calls it once per row on cache miss, or once per row when caching is off.
//!
//! The trait is object-safe (via `async_trait`) because sources are created
//! by factories and handed out by the [`LookupRegistry`](super::registry::LookupRegistry)
//! as `Box<dyn LookupSource>`.

use std::time::Duration;

use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

/// Errors from lookup source operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LookupError {
    /// Connection to the external system failed.
    #[error("connection failed: {0}")]
    Connection(String),

    /// Query execution failed.
    #[error("query failed: {0}")]
    Query(String),

    /// The operation timed out.
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    /// The source is not available (e.g., not initialized).
    #[error("not available: {0}")]
    NotAvailable(String),

    /// Internal error (codec failure, invalid arguments, etc.).
    #[error("internal: {0}")]
    Internal(String),
}

/// One record returned by a lookup source.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LookupRecord {
    /// Field name → value.
    pub message: Map<String, Value>,
    /// Optional annotations (e.g. row version, source partition).
    pub metadata: Map<String, Value>,
}

impl LookupRecord {
    /// Creates a record with no metadata.
    #[must_use]
    pub fn new(message: Map<String, Value>) -> Self {
        Self {
            message,
            metadata: Map::new(),
        }
    }

    /// Attaches metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Per-call context handed to a [`LookupSource`].
#[derive(Debug, Clone)]
pub struct LookupContext {
    /// Name of the lookup join node issuing the query.
    pub node: String,
    /// Cancelled when the node shuts down. Sources may use it to abandon
    /// long-running queries early.
    pub cancel: CancellationToken,
}

impl LookupContext {
    /// Creates a context for `node`.
    #[must_use]
    pub fn new(node: impl Into<String>, cancel: CancellationToken) -> Self {
        Self {
            node: node.into(),
            cancel,
        }
    }
}

/// External keyed data source for lookup joins.
///
/// ## Implementing
///
/// `lookup` receives the projection (`fields`, empty = all), the lookup-side
/// key column names, and one value per key column, positionally aligned with
/// `keys`. It returns every matching record in the order the source defines;
/// the join emits them in that order. An empty vector means no match.
#[async_trait::async_trait]
pub trait LookupSource: Send + Sync {
    /// Queries records whose `keys` columns equal `values`.
    async fn lookup(
        &self,
        ctx: &LookupContext,
        fields: &[String],
        keys: &[String],
        values: &[Value],
    ) -> Result<Vec<LookupRecord>, LookupError>;

    /// Source name for logging.
    fn source_name(&self) -> &str;

    /// Health check. Default: always healthy.
    async fn health_check(&self) -> Result<(), LookupError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// Single-key in-memory source for unit tests.
    struct StaticSource {
        rows: Vec<Map<String, Value>>,
    }

    #[async_trait::async_trait]
    impl LookupSource for StaticSource {
        async fn lookup(
            &self,
            _ctx: &LookupContext,
            fields: &[String],
            keys: &[String],
            values: &[Value],
        ) -> Result<Vec<LookupRecord>, LookupError> {
            if keys.len() != values.len() {
                return Err(LookupError::Internal("keys/values length mismatch".into()));
            }
            Ok(self
                .rows
                .iter()
                .filter(|r| keys.iter().zip(values).all(|(k, v)| r.get(k) == Some(v)))
                .map(|r| {
                    let message = if fields.is_empty() {
                        r.clone()
                    } else {
                        r.iter()
                            .filter(|(k, _)| fields.contains(k))
                            .map(|(k, v)| (k.clone(), v.clone()))
                            .collect()
                    };
                    LookupRecord::new(message)
                })
                .collect())
        }

        fn source_name(&self) -> &'static str {
            "static_test"
        }
    }

    fn obj(v: Value) -> Map<String, Value> {
        match v {
            Value::Object(m) => m,
            _ => panic!("expected object"),
        }
    }

    #[tokio::test]
    async fn test_lookup_projection_and_match() {
        let source = StaticSource {
            rows: vec![
                obj(json!({"id": 1, "name": "a", "tier": "gold"})),
                obj(json!({"id": 2, "name": "b", "tier": "silver"})),
            ],
        };
        let ctx = LookupContext::new("n", CancellationToken::new());

        let out = source
            .lookup(&ctx, &["name".into()], &["id".into()], &[json!(2)])
            .await
            .unwrap();
        assert_eq!(out, vec![LookupRecord::new(obj(json!({"name": "b"})))]);

        let none = source
            .lookup(&ctx, &[], &["id".into()], &[json!(3)])
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_lookup_argument_mismatch() {
        let source = StaticSource { rows: vec![] };
        let ctx = LookupContext::new("n", CancellationToken::new());
        let err = source
            .lookup(&ctx, &[], &["id".into()], &[])
            .await
            .unwrap_err();
        assert!(matches!(err, LookupError::Internal(_)));
    }

    #[tokio::test]
    async fn test_health_check_default() {
        let source = StaticSource { rows: vec![] };
        assert!(source.health_check().await.is_ok());
        assert_eq!(source.source_name(), "static_test");
    }
}
