use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use crate::error::DbError;

use super::memory::MemoryDriver;
use super::Driver;

/// Name → driver lookup used when opening endpoints
pub struct DriverRegistry {
    drivers: DashMap<String, Arc<dyn Driver>>,
}

impl Default for DriverRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl DriverRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            drivers: DashMap::new(),
        }
    }

    /// Create a registry with the built-in drivers registered
    pub fn with_defaults() -> Self {
        let registry = Self::new();
        registry.register(Arc::new(MemoryDriver::new()));
        #[cfg(feature = "sqlite")]
        registry.register(Arc::new(super::sqlite::SqliteDriver::new()));
        registry
    }

    /// Register a driver under its own name, replacing any previous one
    pub fn register(&self, driver: Arc<dyn Driver>) -> Option<Arc<dyn Driver>> {
        let name = driver.name().to_string();
        self.register_as(name, driver)
    }

    /// Register a driver under an alias
    pub fn register_as(
        &self,
        name: impl Into<String>,
        driver: Arc<dyn Driver>,
    ) -> Option<Arc<dyn Driver>> {
        let name = name.into();
        debug!(driver = %name, "Registered database driver");
        self.drivers.insert(name, driver)
    }

    /// Look up a driver by name
    pub fn get(&self, name: &str) -> Result<Arc<dyn Driver>, DbError> {
        self.drivers
            .get(name)
            .map(|r| r.value().clone())
            .ok_or_else(|| DbError::UnknownDriver(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.drivers.contains_key(name)
    }

    /// Registered driver names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.drivers.iter().map(|r| r.key().clone()).collect();
        names.sort();
        names
    }
}
