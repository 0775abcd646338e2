//! Dependency loading for type-based handler registration.
//!
//! The bus can register or execute a handler given only its type; a
//! [`DependencyLoader`] turns that type into an instance.

use std::any::{type_name, Any, TypeId};
use std::sync::Arc;

use dashmap::DashMap;

use crate::error::LoadError;

type Instance = Arc<dyn Any + Send + Sync>;
type Factory = Arc<dyn Fn() -> Instance + Send + Sync>;

/// Produces instances by type.
pub trait DependencyLoader: Send + Sync + 'static {
    /// Produce an instance of the type identified by `type_id`.
    ///
    /// # Errors
    ///
    /// Returns [`LoadError::Unresolved`] when the type is unknown.
    fn instantiate(&self, type_id: TypeId, type_name: &'static str) -> Result<Instance, LoadError>;
}

impl dyn DependencyLoader {
    /// Produce an instance of `T`.
    ///
    /// # Errors
    ///
    /// Returns a [`LoadError`] when `T` is unknown or the loader produced a
    /// value of another type.
    pub fn load<T: Any + Send + Sync>(&self) -> Result<Arc<T>, LoadError> {
        let name = type_name::<T>();
        self.instantiate(TypeId::of::<T>(), name)?
            .downcast::<T>()
            .map_err(|_| LoadError::TypeMismatch { type_name: name })
    }
}

// ---------------------------------------------------------------------------
// FactoryLoader
// ---------------------------------------------------------------------------

/// Loader backed by factories registered per type.
#[derive(Default)]
pub struct FactoryLoader {
    factories: DashMap<TypeId, Factory>,
}

impl FactoryLoader {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a fresh `T` with `factory` on every load.
    pub fn provide<T, F>(&self, factory: F)
    where
        T: Any + Send + Sync,
        F: Fn() -> T + Send + Sync + 'static,
    {
        self.factories
            .insert(TypeId::of::<T>(), Arc::new(move || Arc::new(factory()) as Instance));
    }

    /// Build a fresh `T::default()` on every load.
    pub fn provide_default<T: Any + Send + Sync + Default>(&self) {
        self.provide(T::default);
    }

    /// Hand out the same instance on every load.
    pub fn provide_shared<T: Any + Send + Sync>(&self, instance: Arc<T>) {
        self.factories.insert(
            TypeId::of::<T>(),
            Arc::new(move || Arc::clone(&instance) as Instance),
        );
    }

    #[must_use]
    pub fn contains<T: Any>(&self) -> bool {
        self.factories.contains_key(&TypeId::of::<T>())
    }
}

impl DependencyLoader for FactoryLoader {
    fn instantiate(&self, type_id: TypeId, type_name: &'static str) -> Result<Instance, LoadError> {
        // Clone the factory out so the map shard is not held while it runs.
        let factory = self
            .factories
            .get(&type_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(LoadError::Unresolved { type_name })?;
        Ok(factory())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
