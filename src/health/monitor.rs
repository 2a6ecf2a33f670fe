use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{EndpointRole, HealthCheckConfig};
use crate::driver::Connection;
use crate::metrics::metrics;
use crate::pool::Topology;

use super::state::{ConnectionHealth, HealthTable, NO_CONNECTION};

/// Periodically pings every endpoint and publishes the results
pub struct HealthMonitor {
    topology: Arc<Topology>,
    table: Arc<HealthTable>,
    interval: Duration,
    timeout: Duration,
}

impl HealthMonitor {
    pub fn new(topology: Arc<Topology>, table: Arc<HealthTable>, config: &HealthCheckConfig) -> Self {
        Self {
            topology,
            table,
            interval: config.interval(),
            timeout: config.timeout(),
        }
    }

    /// Run probe cycles until `shutdown` is cancelled.
    ///
    /// The first cycle runs one interval after the spawn; connect already
    /// verified every endpoint.
    pub fn spawn(self: Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        info!(
            interval_ms = self.interval.as_millis() as u64,
            timeout_ms = self.timeout.as_millis() as u64,
            "Health monitor started"
        );

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                // An in-flight cycle is abandoned on shutdown
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = self.check_all() => {}
                }
            }

            info!("Health monitor stopped");
        })
    }

    /// Probe the leader and every follower slot once, in order
    pub async fn check_all(&self) {
        self.check(EndpointRole::Leader, Some(self.topology.leader()))
            .await;

        for (index, slot) in self.topology.follower_slots().iter().enumerate() {
            self.check(EndpointRole::Follower(index), slot.as_ref())
                .await;
        }
    }

    async fn check(&self, role: EndpointRole, conn: Option<&Arc<dyn Connection>>) {
        let health = match conn {
            Some(conn) => self.probe(role, conn.as_ref()).await,
            None => ConnectionHealth::unhealthy(NO_CONNECTION, Duration::ZERO),
        };
        self.publish(role, health);
    }

    async fn probe(&self, role: EndpointRole, conn: &dyn Connection) -> ConnectionHealth {
        let start = Instant::now();
        let result = tokio::time::timeout(self.timeout, conn.ping()).await;
        let elapsed = start.elapsed();

        let (health, outcome) = match result {
            Ok(Ok(())) => (ConnectionHealth::healthy(elapsed), "success"),
            Ok(Err(e)) => (ConnectionHealth::unhealthy(e.to_string(), elapsed), "failure"),
            Err(_) => (ConnectionHealth::unhealthy("timeout", elapsed), "timeout"),
        };
        metrics().record_health_check(role, outcome, elapsed.as_secs_f64());
        health
    }

    fn publish(&self, role: EndpointRole, health: ConnectionHealth) {
        let healthy = health.healthy;
        let error = health.error.clone();
        let response_time_ms = health.response_time.as_millis() as u64;

        let Some(previous) = self.table.replace(role, health) else {
            return;
        };
        metrics().set_endpoint_healthy(role, healthy);

        match (previous.healthy, healthy) {
            (false, true) => info!(endpoint = %role, response_time_ms, "Endpoint became healthy"),
            (true, false) => warn!(endpoint = %role, error = %error, "Endpoint became unhealthy"),
            _ => debug!(endpoint = %role, healthy, response_time_ms, error = %error, "Health check complete"),
        }
    }
}
