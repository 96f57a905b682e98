//! Service registry — named, type-erased services shared between plugins.
//!
//! One registry abstraction, chosen at kernel construction. The kernel
//! ships a single map-backed implementation; hosts that need a different
//! backing store implement [`ServiceRegistry`] themselves.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use thiserror::Error;

/// A registered service: type-erased, shared, thread-safe.
pub type Service = Arc<dyn Any + Send + Sync>;

/// Service registry failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    /// A service with this name already exists; the original stays visible.
    #[error("service '{name}' is already registered")]
    AlreadyRegistered {
        /// The contested service name.
        name: String,
    },
    /// No service with this name exists.
    #[error("service '{name}' is not registered")]
    NotFound {
        /// The requested service name.
        name: String,
    },
}

/// Uniform registry surface for named services.
pub trait ServiceRegistry: Send + Sync {
    /// Register `service` under `name`.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::AlreadyRegistered`] if the name is taken;
    /// the previously registered service is left in place.
    fn register(&self, name: &str, service: Service) -> Result<(), ServiceError>;

    /// Look up the service registered under `name`.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::NotFound`] if no such service exists.
    fn get(&self, name: &str) -> Result<Service, ServiceError>;

    /// Read-only snapshot of every registered service, keyed by name.
    fn snapshot(&self) -> HashMap<String, Service>;
}

/// Downcast a [`Service`] to its concrete type.
pub fn service_as<T: Any + Send + Sync>(service: &Service) -> Option<Arc<T>> {
    Arc::clone(service).downcast::<T>().ok()
}

/// The in-memory [`ServiceRegistry`] implementation used by the kernel.
#[derive(Default)]
pub struct MapServiceRegistry {
    services: RwLock<HashMap<String, Service>>,
}

impl std::fmt::Debug for MapServiceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = match self.services.read() {
            Ok(map) => map.len(),
            Err(_) => 0,
        };
        f.debug_struct("MapServiceRegistry")
            .field("count", &count)
            .finish()
    }
}

impl MapServiceRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }
}

impl ServiceRegistry for MapServiceRegistry {
    fn register(&self, name: &str, service: Service) -> Result<(), ServiceError> {
        let mut map = match self.services.write() {
            Ok(map) => map,
            Err(poisoned) => poisoned.into_inner(),
        };
        if map.contains_key(name) {
            return Err(ServiceError::AlreadyRegistered {
                name: name.to_owned(),
            });
        }
        map.insert(name.to_owned(), service);
        Ok(())
    }

    fn get(&self, name: &str) -> Result<Service, ServiceError> {
        let map = match self.services.read() {
            Ok(map) => map,
            Err(poisoned) => poisoned.into_inner(),
        };
        map.get(name).cloned().ok_or_else(|| ServiceError::NotFound {
            name: name.to_owned(),
        })
    }

    fn snapshot(&self) -> HashMap<String, Service> {
        match self.services.read() {
            Ok(map) => map.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}
