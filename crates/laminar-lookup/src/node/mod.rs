//! Lookup join node.
//!
//! A [`LookupJoinNode`] enriches each incoming row (or each row of an
//! incoming window) with records fetched from an external
//! [`LookupSource`], optionally through a [`LookupCache`].
//!
//! # Per-row algorithm
//!
//! 1. Evaluate every join key expression against the row.
//! 2. If any key is null, the row has no match (no cache or source access).
//! 3. Otherwise consult the cache (if enabled); on miss query the source and
//!    populate the cache.
//! 4. Merge: one join tuple per matched record; with no match, one tuple
//!    holding only the row for a left join and nothing for an inner join.
//!
//! The task loop driving a node lives in [`task`](self::task).

pub mod emitter;
pub mod item;
pub mod metrics;
mod task;

use std::fmt::{self, Write as _};
use std::sync::Arc;

use serde_json::Value;

use crate::config::{LookupConf, NodeOptions, SourceOptions};
use crate::error::LookupJoinError;
use crate::expr::{FunctionRegistry, KeyEvaluator};
use crate::lookup::cache::{LookupCache, LookupRows};
use crate::lookup::source::{LookupContext, LookupRecord, LookupSource};
use crate::tuple::{JoinTuple, JoinTuples, Tuple};

pub use emitter::Emitter;
pub use item::{InputItem, NodeOutput};
pub use metrics::{LookupNodeMetrics, MetricsSnapshot};
pub use task::{LookupNodeHandle, RunningNode};

/// Join type for lookup joins.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum LookupJoinType {
    /// Inner join: only emit rows with a match.
    #[default]
    Inner,
    /// Left outer join: emit all stream rows, with no right side for
    /// non-matches.
    LeftOuter,
}

impl fmt::Display for LookupJoinType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inner => write!(f, "Inner"),
            Self::LeftOuter => write!(f, "LeftOuter"),
        }
    }
}

/// A lookup join operator instance.
///
/// Immutable once built; [`spawn`](Self::spawn) or [`start`](Self::start)
/// moves it into its task.
pub struct LookupJoinNode {
    name: String,
    source_type: String,
    join_type: LookupJoinType,
    fields: Vec<String>,
    keys: Vec<String>,
    key_exprs: Vec<Box<dyn KeyEvaluator>>,
    functions: FunctionRegistry,
    conf: LookupConf,
    options: NodeOptions,
}

impl LookupJoinNode {
    /// Creates a node.
    ///
    /// * `name`: node name; also the lookup source instance it attaches to
    ///   and the emitter of every matched record
    /// * `fields`: projection requested from the source (empty = all)
    /// * `keys`: lookup-side key columns
    /// * `key_exprs`: stream-side key expressions, aligned with `keys`
    ///
    /// # Errors
    ///
    /// Returns [`LookupJoinError::MissingSourceType`] if the source type is
    /// empty, or [`LookupJoinError::Config`] if the cache settings are
    /// malformed or `keys` and `key_exprs` differ in length.
    pub fn new(
        name: impl Into<String>,
        fields: Vec<String>,
        keys: Vec<String>,
        join_type: LookupJoinType,
        key_exprs: Vec<Box<dyn KeyEvaluator>>,
        source_options: &SourceOptions,
        options: NodeOptions,
    ) -> Result<Self, LookupJoinError> {
        if source_options.source_type.is_empty() {
            return Err(LookupJoinError::MissingSourceType);
        }
        if keys.len() != key_exprs.len() {
            return Err(LookupJoinError::Config(format!(
                "{} lookup keys but {} key expressions",
                keys.len(),
                key_exprs.len()
            )));
        }
        let conf = LookupConf::from_props(&source_options.props)?;

        Ok(Self {
            name: name.into(),
            source_type: source_options.source_type.clone(),
            join_type,
            fields,
            keys,
            key_exprs,
            functions: FunctionRegistry::with_builtins(),
            conf,
            options,
        })
    }

    /// Replaces the function registry key expressions are evaluated with.
    #[must_use]
    pub fn with_functions(mut self, functions: FunctionRegistry) -> Self {
        self.functions = functions;
        self
    }

    /// Node name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Lookup source type.
    #[must_use]
    pub fn source_type(&self) -> &str {
        &self.source_type
    }

    /// Join type.
    #[must_use]
    pub fn join_type(&self) -> LookupJoinType {
        self.join_type
    }

    /// Cache settings.
    #[must_use]
    pub fn conf(&self) -> &LookupConf {
        &self.conf
    }

    /// Runtime options.
    #[must_use]
    pub fn options(&self) -> &NodeOptions {
        &self.options
    }

    /// Looks up one row and appends its join tuples to `out`.
    ///
    /// # Errors
    ///
    /// Returns [`LookupJoinError::KeyEvaluation`] or
    /// [`LookupJoinError::Lookup`]; `out` is left untouched in that case.
    pub(crate) async fn lookup_row(
        &self,
        ctx: &LookupContext,
        row: &Tuple,
        source: &dyn LookupSource,
        cache: Option<&LookupCache>,
        out: &mut JoinTuples,
    ) -> Result<(), LookupJoinError> {
        let mut values = Vec::with_capacity(self.key_exprs.len());
        let mut has_null = false;
        for expr in &self.key_exprs {
            let v = expr.evaluate(row, &self.functions)?;
            has_null |= v.is_null();
            values.push(v);
        }

        // A null key never matches; neither the cache nor the source is touched.
        let matches: LookupRows = if has_null {
            Arc::from(Vec::new())
        } else if let Some(cache) = cache {
            let key = cache_key(&values);
            match cache.get(&key) {
                Some(rows) => rows,
                None => {
                    let rows: LookupRows = source
                        .lookup(ctx, &self.fields, &self.keys, &values)
                        .await?
                        .into();
                    cache.set(key, Arc::clone(&rows));
                    rows
                }
            }
        } else {
            source
                .lookup(ctx, &self.fields, &self.keys, &values)
                .await?
                .into()
        };

        self.merge(row, &matches, out);
        Ok(())
    }

    fn merge(&self, row: &Tuple, matches: &[LookupRecord], out: &mut JoinTuples) {
        if matches.is_empty() {
            match self.join_type {
                LookupJoinType::LeftOuter => out.content.push(JoinTuple::from_row(row.clone())),
                LookupJoinType::Inner => {
                    tracing::debug!(node = %self.name, emitter = %row.emitter, "Lookup node no result found for tuple");
                }
            }
            return;
        }

        let now = chrono::Utc::now().timestamp_millis();
        out.content.reserve(matches.len());
        for record in matches {
            let mut merged = JoinTuple::from_row(row.clone());
            merged.add_tuple(Tuple {
                emitter: self.name.clone(),
                message: record.message.clone(),
                metadata: record.metadata.clone(),
                timestamp: now,
            });
            out.content.push(merged);
        }
    }
}

impl fmt::Debug for LookupJoinNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LookupJoinNode")
            .field("name", &self.name)
            .field("source_type", &self.source_type)
            .field("join_type", &self.join_type)
            .field("fields", &self.fields)
            .field("keys", &self.keys)
            .field("key_exprs", &self.key_exprs.len())
            .field("conf", &self.conf)
            .finish_non_exhaustive()
    }
}

/// Canonical cache key of a join key vector: its compact JSON text.
///
/// Distinguishes types (`7` vs `"7"`), and object keys are ordered, so equal
/// vectors always map to the same key.
pub(crate) fn cache_key(values: &[Value]) -> String {
    let mut key = String::with_capacity(values.len() * 8 + 2);
    key.push('[');
    for (i, v) in values.iter().enumerate() {
        if i > 0 {
            key.push(',');
        }
        // Writing into a String cannot fail.
        let _ = write!(key, "{v}");
    }
    key.push(']');
    key
}
