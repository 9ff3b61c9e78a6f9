//! Error types for the lookup join operator.

use crate::error_codes::{
    INTERNAL, INVALID_CONFIG, JOIN_INVALID_INPUT, JOIN_KEY_EVALUATION_FAILED,
    LOOKUP_QUERY_FAILED, MISSING_CONFIG, UPSTREAM_ERROR,
};
use crate::expr::EvalError;
use crate::lookup::registry::RegistryError;
use crate::lookup::source::LookupError;

/// Errors raised by a lookup join node.
///
/// Startup errors ([`Config`](Self::Config), [`MissingSourceType`](Self::MissingSourceType),
/// [`Registry`](Self::Registry)) and [`Panic`](Self::Panic) go to the
/// pipeline's fatal error channel. Everything else is emitted downstream in
/// place of the batch of the item that failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LookupJoinError {
    /// Malformed lookup configuration.
    #[error("[{code}] invalid lookup configuration: {0}", code = INVALID_CONFIG)]
    Config(String),

    /// The lookup source options carry no type.
    #[error("[{code}] source type is not specified", code = MISSING_CONFIG)]
    MissingSourceType,

    /// Attaching the lookup source failed.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// The external lookup failed for a row.
    #[error("[{code}] lookup failed: {0}", code = LOOKUP_QUERY_FAILED)]
    Lookup(#[from] LookupError),

    /// A join key expression failed for a row.
    #[error("[{code}] join key evaluation failed: {0}", code = JOIN_KEY_EVALUATION_FAILED)]
    KeyEvaluation(#[from] EvalError),

    /// The node received an input shape it cannot join.
    #[error("[{code}] run lookup node error: invalid input type but got {0}", code = JOIN_INVALID_INPUT)]
    InvalidInput(String),

    /// An error produced by an upstream stage, passed through unchanged.
    #[error("[{code}] upstream error: {0}", code = UPSTREAM_ERROR)]
    Upstream(String),

    /// The node task panicked.
    #[error("[{code}] lookup node panicked: {0}", code = INTERNAL)]
    Panic(String),
}

impl LookupJoinError {
    /// Whether this error ends the node (as opposed to failing one item).
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Config(_) | Self::MissingSourceType | Self::Registry(_) | Self::Panic(_)
        )
    }
}
