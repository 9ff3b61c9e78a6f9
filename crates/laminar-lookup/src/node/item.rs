//! Items flowing into and out of a lookup join node.

use std::fmt;

use crate::error::LookupJoinError;
use crate::tuple::{JoinTuples, Tuple, WindowTuples};

/// An item received from the upstream stage.
#[derive(Debug, Clone)]
pub enum InputItem {
    /// A single event.
    Row(Tuple),
    /// A window of events.
    Window(WindowTuples),
    /// Output of another join. Not accepted by a lookup join.
    Joined(JoinTuples),
    /// An error raised upstream, forwarded downstream unchanged.
    Error(LookupJoinError),
}

impl InputItem {
    /// Short description of the item shape, for error messages.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Row(_) => "Row",
            Self::Window(_) => "Window",
            Self::Joined(_) => "JoinTuples",
            Self::Error(_) => "Error",
        }
    }
}

impl fmt::Display for InputItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Row(t) => write!(f, "Row(emitter={})", t.emitter),
            Self::Window(w) => write!(
                f,
                "Window(rows={}, range=[{}, {}))",
                w.len(),
                w.range.start,
                w.range.end
            ),
            Self::Joined(j) => write!(f, "JoinTuples(len={})", j.len()),
            Self::Error(e) => write!(f, "Error({e})"),
        }
    }
}

impl From<Tuple> for InputItem {
    fn from(row: Tuple) -> Self {
        Self::Row(row)
    }
}

impl From<WindowTuples> for InputItem {
    fn from(window: WindowTuples) -> Self {
        Self::Window(window)
    }
}

/// An item emitted to downstream stages: one per processed input item.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeOutput {
    /// Join results of one input item.
    Batch(JoinTuples),
    /// The input item failed; no partial results are emitted for it.
    Error(LookupJoinError),
}

impl NodeOutput {
    /// The batch, if this is one.
    #[must_use]
    pub fn batch(&self) -> Option<&JoinTuples> {
        match self {
            Self::Batch(b) => Some(b),
            Self::Error(_) => None,
        }
    }

    /// The error, if this is one.
    #[must_use]
    pub fn error(&self) -> Option<&LookupJoinError> {
        match self {
            Self::Batch(_) => None,
            Self::Error(e) => Some(e),
        }
    }
}
