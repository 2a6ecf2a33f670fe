//! Integration test entry point
//!
//! Run with: cargo test --test integration
//!
//! Most tests run against the in-memory driver, which needs no server. The
//! `sqlite` module exercises the SQLite driver against temporary files.

mod lifecycle;
mod routing;
mod transaction;

use std::sync::Arc;

use sqlkit::driver::{MemoryConnection, MemoryDriver, MemoryState};
use sqlkit::{
    Connection, DatabaseConfig, DriverRegistry, EndpointConfig, HealthCheckConfig, Manager,
};
use tokio_util::sync::CancellationToken;

/// A leader and `n` followers served by one in-memory driver
pub struct Cluster {
    pub driver: Arc<MemoryDriver>,
    pub registry: DriverRegistry,
    pub config: DatabaseConfig,
}

impl Cluster {
    /// Cluster with background health checks disabled
    pub fn new(followers: usize) -> Self {
        let driver = Arc::new(MemoryDriver::new());
        let registry = DriverRegistry::new();
        registry.register(driver.clone());

        let mut config = DatabaseConfig::new(EndpointConfig::new("memory", "primary", 5432, "app"))
            .with_health(HealthCheckConfig::disabled());
        for i in 0..followers {
            config = config.with_follower(EndpointConfig::new(
                "memory",
                format!("replica-{}", i),
                5432,
                "app",
            ));
        }

        Self {
            driver,
            registry,
            config,
        }
    }

    /// Enable background checks every `interval_ms`
    pub fn with_health_interval(mut self, interval_ms: u64) -> Self {
        self.config.health = HealthCheckConfig {
            enabled: true,
            check_interval_ms: interval_ms,
            check_timeout_ms: interval_ms / 2,
        };
        self
    }

    pub fn leader_state(&self) -> Arc<MemoryState> {
        self.driver.endpoint_state(&self.config.leader)
    }

    pub fn follower_state(&self, index: usize) -> Arc<MemoryState> {
        self.driver.endpoint_state(&self.config.followers[index])
    }

    pub async fn connect(&self) -> Manager {
        self.try_connect().await.expect("manager should connect")
    }

    pub async fn try_connect(&self) -> Result<Manager, sqlkit::DbError> {
        Manager::connect_with(self.config.clone(), &self.registry, &CancellationToken::new()).await
    }
}

/// Host name behind an in-memory connection, e.g. "replica-1"
pub fn host_of(conn: &Arc<dyn Connection>) -> String {
    let label = conn
        .as_any()
        .downcast_ref::<MemoryConnection>()
        .expect("in-memory connection")
        .state()
        .label()
        .to_string();
    label
        .split(';')
        .find_map(|part| part.strip_prefix("host="))
        .unwrap_or(&label)
        .to_string()
}
