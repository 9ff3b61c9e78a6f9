//! # Lookup Module
//!
//! External lookup sources and the machinery a lookup join node uses to
//! query them.
//!
//! ## Module Overview
//!
//! - [`source`]: `LookupSource` trait, `LookupRecord`, `LookupError`
//! - [`cache`]: TTL cache of lookup results keyed by join key vector
//! - [`registry`]: named source instances with exclusive attach/detach

/// TTL cache for lookup results.
pub mod cache;
/// Named lookup source instances.
pub mod registry;
/// Async lookup source trait.
pub mod source;

pub use cache::{LookupCache, LookupRows};
pub use registry::{AttachedSource, LookupRegistry, LookupSourceFactory, RegistryError};
pub use source::{LookupContext, LookupError, LookupRecord, LookupSource};
