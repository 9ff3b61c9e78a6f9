//! Registry of named lookup source instances.
//!
//! A pipeline registers lookup sources (directly, or by type through a
//! [`LookupSourceFactory`]) under the name of the lookup table they serve.
//! A lookup join node [`attach`](LookupRegistry::attach)es to its instance on
//! start and owns it exclusively until the returned [`AttachedSource`] is
//! dropped, which hands the instance back.
//!
//! ```text
//! register/create ──▶ Idle ──attach()──▶ Attached ──drop(guard)──▶ Idle
//!                      │
//!                      └──drop_instance()──▶ removed
//! ```

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::{Map, Value};

use crate::error_codes::{
    LOOKUP_SOURCE_ALREADY_EXISTS, LOOKUP_SOURCE_CREATE_FAILED, LOOKUP_SOURCE_IN_USE,
    LOOKUP_SOURCE_NOT_FOUND, LOOKUP_SOURCE_TYPE_UNKNOWN,
};
use crate::lookup::source::{LookupError, LookupSource};

/// Errors from registry operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// No instance is registered under the name.
    #[error("[{code}] lookup source '{0}' not found", code = LOOKUP_SOURCE_NOT_FOUND)]
    NotFound(String),

    /// An instance is already registered under the name.
    #[error("[{code}] lookup source '{0}' already exists", code = LOOKUP_SOURCE_ALREADY_EXISTS)]
    AlreadyExists(String),

    /// The instance is attached to a running node.
    #[error("[{code}] lookup source '{0}' is already attached", code = LOOKUP_SOURCE_IN_USE)]
    InUse(String),

    /// No factory is registered for the source type.
    #[error("[{code}] unknown lookup source type '{0}'", code = LOOKUP_SOURCE_TYPE_UNKNOWN)]
    UnknownType(String),

    /// The factory failed to build the instance.
    #[error("[{code}] failed to create lookup source '{name}': {source}", code = LOOKUP_SOURCE_CREATE_FAILED)]
    Create {
        /// Instance name.
        name: String,
        /// Factory failure.
        source: LookupError,
    },
}

/// Builds lookup sources of one type from their properties.
pub trait LookupSourceFactory: Send + Sync {
    /// Creates a source instance.
    ///
    /// # Errors
    ///
    /// Returns [`LookupError`] if the properties are invalid or the source
    /// cannot be initialized.
    fn create(&self, props: &Map<String, Value>) -> Result<Box<dyn LookupSource>, LookupError>;
}

impl<F> LookupSourceFactory for F
where
    F: Fn(&Map<String, Value>) -> Result<Box<dyn LookupSource>, LookupError> + Send + Sync,
{
    fn create(&self, props: &Map<String, Value>) -> Result<Box<dyn LookupSource>, LookupError> {
        self(props)
    }
}

/// Registration slot. `source` is `None` while the instance is attached.
struct Slot {
    source_type: String,
    source: Option<Box<dyn LookupSource>>,
}

#[derive(Default)]
struct RegistryInner {
    factories: FxHashMap<String, Arc<dyn LookupSourceFactory>>,
    instances: FxHashMap<String, Slot>,
}

/// Registry of lookup source factories and named instances.
///
/// Cheap to clone; clones share the same state.
#[derive(Clone, Default)]
pub struct LookupRegistry {
    inner: Arc<Mutex<RegistryInner>>,
}

impl LookupRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) the factory for `source_type`.
    pub fn register_factory(
        &self,
        source_type: impl Into<String>,
        factory: impl LookupSourceFactory + 'static,
    ) {
        self.inner
            .lock()
            .factories
            .insert(source_type.into(), Arc::new(factory));
    }

    /// Builds an instance of `source_type` from `props` and registers it as
    /// `name`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::AlreadyExists`], [`RegistryError::UnknownType`]
    /// or [`RegistryError::Create`].
    pub fn create_instance(
        &self,
        name: &str,
        source_type: &str,
        props: &Map<String, Value>,
    ) -> Result<(), RegistryError> {
        let factory = {
            let inner = self.inner.lock();
            if inner.instances.contains_key(name) {
                return Err(RegistryError::AlreadyExists(name.to_string()));
            }
            inner
                .factories
                .get(source_type)
                .cloned()
                .ok_or_else(|| RegistryError::UnknownType(source_type.to_string()))?
        };

        // Factories may do I/O; build outside the lock.
        let source = factory.create(props).map_err(|source| RegistryError::Create {
            name: name.to_string(),
            source,
        })?;
        self.insert(name, source_type, source)
    }

    /// Registers a prebuilt source as `name`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::AlreadyExists`] if `name` is taken.
    pub fn register_instance(
        &self,
        name: &str,
        source_type: &str,
        source: Box<dyn LookupSource>,
    ) -> Result<(), RegistryError> {
        self.insert(name, source_type, source)
    }

    fn insert(
        &self,
        name: &str,
        source_type: &str,
        source: Box<dyn LookupSource>,
    ) -> Result<(), RegistryError> {
        let mut inner = self.inner.lock();
        if inner.instances.contains_key(name) {
            return Err(RegistryError::AlreadyExists(name.to_string()));
        }
        inner.instances.insert(
            name.to_string(),
            Slot {
                source_type: source_type.to_string(),
                source: Some(source),
            },
        );
        tracing::debug!(lookup_source = %name, source_type, "Lookup source registered");
        Ok(())
    }

    /// Takes exclusive ownership of the instance registered as `name`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] if nothing is registered under
    /// `name`, or [`RegistryError::InUse`] if it is already attached.
    pub fn attach(&self, name: &str) -> Result<AttachedSource, RegistryError> {
        let mut inner = self.inner.lock();
        let slot = inner
            .instances
            .get_mut(name)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;
        let source = slot
            .source
            .take()
            .ok_or_else(|| RegistryError::InUse(name.to_string()))?;
        tracing::debug!(lookup_source = %name, "Lookup source attached");
        Ok(AttachedSource {
            name: name.to_string(),
            source: Some(source),
            registry: Arc::downgrade(&self.inner),
        })
    }

    /// Removes the idle instance registered as `name`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] or [`RegistryError::InUse`].
    pub fn drop_instance(&self, name: &str) -> Result<(), RegistryError> {
        let mut inner = self.inner.lock();
        match inner.instances.get(name) {
            None => Err(RegistryError::NotFound(name.to_string())),
            Some(slot) if slot.source.is_none() => Err(RegistryError::InUse(name.to_string())),
            Some(_) => {
                inner.instances.remove(name);
                tracing::debug!(lookup_source = %name, "Lookup source dropped");
                Ok(())
            }
        }
    }

    /// Whether `name` is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.inner.lock().instances.contains_key(name)
    }

    /// Whether `name` is registered and currently attached.
    #[must_use]
    pub fn is_attached(&self, name: &str) -> bool {
        self.inner
            .lock()
            .instances
            .get(name)
            .is_some_and(|slot| slot.source.is_none())
    }

    /// Source type `name` was registered with.
    #[must_use]
    pub fn source_type(&self, name: &str) -> Option<String> {
        self.inner
            .lock()
            .instances
            .get(name)
            .map(|slot| slot.source_type.clone())
    }
}

impl std::fmt::Debug for LookupRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        let mut factories: Vec<&String> = inner.factories.keys().collect();
        factories.sort();
        let mut instances: Vec<&String> = inner.instances.keys().collect();
        instances.sort();
        f.debug_struct("LookupRegistry")
            .field("factories", &factories)
            .field("instances", &instances)
            .finish()
    }
}

/// Exclusive handle to an attached lookup source.
///
/// Dropping it detaches: the instance returns to the registry (if the
/// registry and the slot still exist) and can be attached again.
pub struct AttachedSource {
    name: String,
    source: Option<Box<dyn LookupSource>>,
    registry: Weak<Mutex<RegistryInner>>,
}

impl AttachedSource {
    /// Name the instance is registered under.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The attached source.
    #[must_use]
    pub fn source(&self) -> &dyn LookupSource {
        // Only `Drop` takes the source out.
        self.source
            .as_deref()
            .unwrap_or_else(|| unreachable!("attached source taken before drop"))
    }
}

impl Drop for AttachedSource {
    fn drop(&mut self) {
        let Some(source) = self.source.take() else {
            return;
        };
        let Some(inner) = self.registry.upgrade() else {
            return;
        };
        let mut inner = inner.lock();
        if let Some(slot) = inner.instances.get_mut(&self.name) {
            slot.source = Some(source);
            tracing::debug!(lookup_source = %self.name, "Lookup source detached");
        }
    }
}

impl std::fmt::Debug for AttachedSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttachedSource")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}
