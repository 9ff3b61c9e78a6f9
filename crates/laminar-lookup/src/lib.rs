//! # `LaminarDB` Lookup Join
//!
//! A streaming operator that enriches rows with records fetched from an
//! external lookup source (a dimension table, a key/value store, a REST
//! endpoint), with an optional TTL cache in front of the source.
//!
//! ## Wiring
//!
//! ```text
//!            InputItem                 NodeOutput
//! upstream ────────────▶ LookupJoinNode ────────────▶ downstream
//!                          │      ▲
//!                  lookup  │      │ records
//!                          ▼      │
//!                  LookupCache ─▶ LookupSource (attached from LookupRegistry)
//! ```
//!
//! Build a [`LookupJoinNode`], register a source under the node's name in a
//! [`LookupRegistry`], then [`start`](LookupJoinNode::start) the node.

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

/// Lookup and node settings parsed from source properties.
pub mod config;

/// Error types.
pub mod error;

/// Stable `LDB-NNNN` error codes.
pub mod error_codes;

/// Join key expressions and the scalar functions they call.
pub mod expr;

/// Lookup sources, their registry and the TTL result cache.
pub mod lookup;

/// The lookup join node and its task.
pub mod node;

/// Test doubles (mock lookup source). Enabled by the `testing` feature.
#[cfg(any(test, feature = "testing"))]
pub mod testing;

/// Rows and join tuples flowing through the operator.
pub mod tuple;

pub use config::{LookupConf, NodeOptions, SourceOptions};
pub use error::LookupJoinError;
pub use expr::{FunctionRegistry, KeyEvaluator, KeyExpr};
pub use lookup::{
    LookupCache, LookupContext, LookupError, LookupRecord, LookupRegistry, LookupSource,
};
pub use node::{
    Emitter, InputItem, LookupJoinNode, LookupJoinType, LookupNodeHandle, NodeOutput, RunningNode,
};
pub use tuple::{JoinTuple, JoinTuples, Tuple, WindowRange, WindowTuples};

/// Result type for lookup join operations.
pub type Result<T> = std::result::Result<T, LookupJoinError>;
