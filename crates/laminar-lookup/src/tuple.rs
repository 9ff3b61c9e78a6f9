//! Row, window and joined-tuple data model.
//!
//! - [`Tuple`]: one event (field map + metadata + emitter + timestamp)
//! - [`WindowTuples`]: an ordered group of tuples sharing a [`WindowRange`]
//! - [`JoinTuple`]: one output row of a join, original event first
//! - [`JoinTuples`]: the batch of join tuples produced from one input item

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A single event flowing through the pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Tuple {
    /// Name of the stream or node that produced this tuple.
    pub emitter: String,
    /// Field name → value.
    pub message: Map<String, Value>,
    /// Arbitrary key/value annotations (source offsets, headers, ...).
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
    /// Milliseconds since UNIX epoch.
    pub timestamp: i64,
}

impl Tuple {
    /// Creates a tuple with no metadata.
    #[must_use]
    pub fn new(emitter: impl Into<String>, message: Map<String, Value>, timestamp: i64) -> Self {
        Self {
            emitter: emitter.into(),
            message,
            metadata: Map::new(),
            timestamp,
        }
    }

    /// Attaches metadata, replacing any existing annotations.
    #[must_use]
    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }

    /// Field value by name.
    #[must_use]
    pub fn value(&self, key: &str) -> Option<&Value> {
        self.message.get(key)
    }

    /// Metadata value by name.
    #[must_use]
    pub fn meta(&self, key: &str) -> Option<&Value> {
        self.metadata.get(key)
    }
}

/// Bounds of a window, in milliseconds for time windows or row counts for
/// count windows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WindowRange {
    /// Inclusive start.
    pub start: i64,
    /// Exclusive end.
    pub end: i64,
}

impl WindowRange {
    /// Creates a new range.
    #[must_use]
    pub const fn new(start: i64, end: i64) -> Self {
        Self { start, end }
    }
}

/// An ordered, finite group of tuples produced by a window operator.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WindowTuples {
    /// Rows in window order.
    pub rows: Vec<Tuple>,
    /// Range the rows belong to.
    pub range: WindowRange,
}

impl WindowTuples {
    /// Creates a window from its rows and range.
    #[must_use]
    pub fn new(rows: Vec<Tuple>, range: WindowRange) -> Self {
        Self { rows, range }
    }

    /// Number of rows in the window.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the window holds no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// One output row of a join.
///
/// The first constituent is always the original event. A lookup join adds
/// at most one more constituent: the matched external record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JoinTuple {
    /// Constituent tuples, original event first.
    pub tuples: Vec<Tuple>,
}

impl JoinTuple {
    /// Starts a join tuple from the original event.
    #[must_use]
    pub fn from_row(row: Tuple) -> Self {
        Self { tuples: vec![row] }
    }

    /// Appends a constituent.
    pub fn add_tuple(&mut self, tuple: Tuple) {
        self.tuples.push(tuple);
    }

    /// The original event.
    #[must_use]
    pub fn row(&self) -> Option<&Tuple> {
        self.tuples.first()
    }

    /// The joined right-hand record, if any.
    #[must_use]
    pub fn matched(&self) -> Option<&Tuple> {
        self.tuples.get(1)
    }

    /// Resolves `key` across constituents.
    ///
    /// With an `emitter`, only the constituent emitted by it is searched.
    /// Without one, the first constituent holding the field wins.
    #[must_use]
    pub fn value(&self, key: &str, emitter: Option<&str>) -> Option<&Value> {
        match emitter {
            Some(name) => self
                .tuples
                .iter()
                .find(|t| t.emitter == name)
                .and_then(|t| t.value(key)),
            None => self.tuples.iter().find_map(|t| t.value(key)),
        }
    }

    /// Flattened field view. Earlier constituents win on name clashes.
    #[must_use]
    pub fn to_map(&self) -> Map<String, Value> {
        let mut merged = Map::new();
        for tuple in self.tuples.iter().rev() {
            for (k, v) in &tuple.message {
                merged.insert(k.clone(), v.clone());
            }
        }
        merged
    }
}

/// The batch of join tuples produced from one input item.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JoinTuples {
    /// Join tuples in emission order.
    pub content: Vec<JoinTuple>,
    /// Window the batch was derived from; `None` for a single-row input.
    pub window_range: Option<WindowRange>,
}

impl JoinTuples {
    /// Empty batch for a single-row input.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty batch tagged with a window range.
    #[must_use]
    pub fn for_window(range: WindowRange) -> Self {
        Self {
            content: Vec::new(),
            window_range: Some(range),
        }
    }

    /// Number of join tuples.
    #[must_use]
    pub fn len(&self) -> usize {
        self.content.len()
    }

    /// Whether the batch holds no join tuples.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }
}
