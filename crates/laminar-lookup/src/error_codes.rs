//! Structured error codes for the lookup join operator.
//!
//! Every error raised by this crate carries a stable `LDB-NNNN` code that is
//! present in the error message (grep-able in logs) and never reused.
//!
//! # Code Ranges
//!
//! | Range | Category |
//! |-------|----------|
//! | `LDB-0xxx` | General / configuration |
//! | `LDB-3xxx` | Join operations |
//! | `LDB-5xxx` | Lookup source / registry I/O |
//! | `LDB-8xxx` | Internal / should-not-happen |

// ── General / Configuration (LDB-0xxx) ──

/// Invalid configuration value.
pub const INVALID_CONFIG: &str = "LDB-0001";
/// Missing required configuration key.
pub const MISSING_CONFIG: &str = "LDB-0002";

// ── Join (LDB-3xxx) ──

/// Join key expression could not be evaluated.
pub const JOIN_KEY_EVALUATION_FAILED: &str = "LDB-3005";
/// Input item shape not accepted by the join operator.
pub const JOIN_INVALID_INPUT: &str = "LDB-3006";

// ── Lookup Source / Registry (LDB-5xxx) ──

/// External lookup query failed.
pub const LOOKUP_QUERY_FAILED: &str = "LDB-5030";
/// Lookup source instance not registered.
pub const LOOKUP_SOURCE_NOT_FOUND: &str = "LDB-5031";
/// Lookup source instance already exists.
pub const LOOKUP_SOURCE_ALREADY_EXISTS: &str = "LDB-5032";
/// Lookup source instance is attached to another node.
pub const LOOKUP_SOURCE_IN_USE: &str = "LDB-5033";
/// No factory registered for the lookup source type.
pub const LOOKUP_SOURCE_TYPE_UNKNOWN: &str = "LDB-5034";
/// Lookup source factory failed to build an instance.
pub const LOOKUP_SOURCE_CREATE_FAILED: &str = "LDB-5035";

// ── Internal / Should-Not-Happen (LDB-8xxx) ──

/// Internal error (a bug).
pub const INTERNAL: &str = "LDB-8001";
/// Error forwarded from an upstream pipeline stage.
pub const UPSTREAM_ERROR: &str = "LDB-8005";
