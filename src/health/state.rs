//! Health snapshots for the leader and followers
//!
//! A snapshot is replaced as a whole on every probe, so a reader never sees
//! the flag from one probe next to the error text of another.

use std::time::{Duration, SystemTime};

use parking_lot::RwLock;

use crate::config::EndpointRole;

/// Reason recorded for a follower slot that has no handle
pub const NO_CONNECTION: &str = "connection is nil";

/// Result of the latest probe of one endpoint
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionHealth {
    pub healthy: bool,
    /// When the probe ran; `None` until the first check
    pub last_check: Option<SystemTime>,
    /// Error text if unhealthy, empty otherwise
    pub error: String,
    /// Round-trip time of the probe
    pub response_time: Duration,
}

impl ConnectionHealth {
    /// A passing check recorded now
    pub fn healthy(response_time: Duration) -> Self {
        Self {
            healthy: true,
            last_check: Some(SystemTime::now()),
            error: String::new(),
            response_time,
        }
    }

    /// A failing check recorded now
    pub fn unhealthy(error: impl Into<String>, response_time: Duration) -> Self {
        Self {
            healthy: false,
            last_check: Some(SystemTime::now()),
            error: error.into(),
            response_time,
        }
    }
}

/// Health of every endpoint, followers in configuration order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Health {
    pub leader: ConnectionHealth,
    pub followers: Vec<ConnectionHealth>,
}

impl Health {
    pub fn healthy_followers(&self) -> usize {
        self.followers.iter().filter(|h| h.healthy).count()
    }
}

/// Shared health table written by the monitor and read by the router
#[derive(Debug)]
pub struct HealthTable {
    inner: RwLock<Health>,
}

impl HealthTable {
    /// Table with every endpoint unknown (unhealthy)
    pub fn new(follower_count: usize) -> Self {
        Self::from_snapshot(Health {
            leader: ConnectionHealth::default(),
            followers: vec![ConnectionHealth::default(); follower_count],
        })
    }

    pub fn from_snapshot(health: Health) -> Self {
        Self {
            inner: RwLock::new(health),
        }
    }

    /// Copy of the whole table
    pub fn snapshot(&self) -> Health {
        self.inner.read().clone()
    }

    /// Snapshot of one endpoint, `None` for an unknown follower index
    pub fn get(&self, role: EndpointRole) -> Option<ConnectionHealth> {
        let health = self.inner.read();
        match role {
            EndpointRole::Leader => Some(health.leader.clone()),
            EndpointRole::Follower(i) => health.followers.get(i).cloned(),
        }
    }

    pub fn is_healthy(&self, role: EndpointRole) -> bool {
        let health = self.inner.read();
        match role {
            EndpointRole::Leader => health.leader.healthy,
            EndpointRole::Follower(i) => health.followers.get(i).map_or(false, |h| h.healthy),
        }
    }

    pub fn leader_healthy(&self) -> bool {
        self.is_healthy(EndpointRole::Leader)
    }

    /// Replace one endpoint's snapshot, returning the previous one.
    ///
    /// An out-of-range follower index is ignored and returns `None`.
    pub fn replace(&self, role: EndpointRole, next: ConnectionHealth) -> Option<ConnectionHealth> {
        let mut health = self.inner.write();
        let slot = match role {
            EndpointRole::Leader => &mut health.leader,
            EndpointRole::Follower(i) => health.followers.get_mut(i)?,
        };
        Some(std::mem::replace(slot, next))
    }

    /// Mark an endpoint unhealthy until its next probe
    pub fn mark_unhealthy(&self, role: EndpointRole, reason: impl Into<String>) {
        self.replace(role, ConnectionHealth::unhealthy(reason, Duration::ZERO));
    }

    /// Mark an endpoint healthy until its next probe
    pub fn mark_healthy(&self, role: EndpointRole) {
        self.replace(role, ConnectionHealth::healthy(Duration::ZERO));
    }
}
