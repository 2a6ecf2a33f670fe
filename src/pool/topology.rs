use std::sync::Arc;

use tracing::{info, warn};

use crate::config::{DatabaseConfig, EndpointConfig, EndpointRole};
use crate::driver::{Connection, DriverRegistry};
use crate::error::DbError;

use super::connector::establish;

/// The live handles of one manager, fixed after construction
pub struct Topology {
    driver: String,
    leader: Arc<dyn Connection>,
    /// One slot per configured follower; `None` where connecting failed
    followers: Vec<Option<Arc<dyn Connection>>>,
}

/// A follower that could not be connected at startup
#[derive(Debug)]
pub struct FollowerFailure {
    pub index: usize,
    pub error: DbError,
}

impl Topology {
    /// Connect the leader (required) and every follower (best effort).
    ///
    /// Returns the topology together with the followers that failed, in
    /// configuration order.
    pub async fn connect(
        config: &DatabaseConfig,
        registry: &DriverRegistry,
    ) -> Result<(Self, Vec<FollowerFailure>), DbError> {
        let leader_driver = registry.get(&config.leader.driver)?;
        let leader = establish(
            leader_driver.as_ref(),
            &config.leader,
            EndpointRole::Leader,
            &config.pool,
        )
        .await?;
        info!(addr = %config.leader.addr(), driver = %config.leader.driver, "Leader connected");

        let mut followers = Vec::with_capacity(config.followers.len());
        let mut failures = Vec::new();
        for (index, follower) in config.followers.iter().enumerate() {
            let endpoint = inherit_driver(follower, &config.leader);
            match connect_follower(&endpoint, index, config, registry).await {
                Ok(conn) => {
                    info!(index, addr = %endpoint.addr(), "Follower connected");
                    followers.push(Some(conn));
                }
                Err(error) => {
                    warn!(index, addr = %endpoint.addr(), error = %error, "Failed to connect follower, skipping");
                    followers.push(None);
                    failures.push(FollowerFailure { index, error });
                }
            }
        }

        Ok((
            Self {
                driver: config.leader.driver.clone(),
                leader,
                followers,
            },
            failures,
        ))
    }

    /// Assemble a topology from handles that are already open
    pub fn from_parts(
        driver: impl Into<String>,
        leader: Arc<dyn Connection>,
        followers: Vec<Option<Arc<dyn Connection>>>,
    ) -> Self {
        Self {
            driver: driver.into(),
            leader,
            followers,
        }
    }

    /// Leader driver name
    pub fn driver(&self) -> &str {
        &self.driver
    }

    pub fn leader(&self) -> &Arc<dyn Connection> {
        &self.leader
    }

    /// Follower at a configured position, if it connected
    pub fn follower(&self, index: usize) -> Option<&Arc<dyn Connection>> {
        self.followers.get(index).and_then(Option::as_ref)
    }

    pub fn follower_slots(&self) -> &[Option<Arc<dyn Connection>>] {
        &self.followers
    }

    /// Number of configured follower positions, connected or not
    pub fn follower_count(&self) -> usize {
        self.followers.len()
    }

    /// Every present handle with its role, leader first
    pub fn endpoints(&self) -> impl Iterator<Item = (EndpointRole, &Arc<dyn Connection>)> {
        std::iter::once((EndpointRole::Leader, &self.leader)).chain(
            self.followers
                .iter()
                .enumerate()
                .filter_map(|(i, slot)| slot.as_ref().map(|c| (EndpointRole::Follower(i), c))),
        )
    }
}

async fn connect_follower(
    endpoint: &EndpointConfig,
    index: usize,
    config: &DatabaseConfig,
    registry: &DriverRegistry,
) -> Result<Arc<dyn Connection>, DbError> {
    let driver = registry.get(&endpoint.driver)?;
    establish(
        driver.as_ref(),
        endpoint,
        EndpointRole::Follower(index),
        &config.pool,
    )
    .await
}

/// A follower without a driver uses the leader's
fn inherit_driver(follower: &EndpointConfig, leader: &EndpointConfig) -> EndpointConfig {
    let mut endpoint = follower.clone();
    if endpoint.driver.is_empty() {
        endpoint.driver = leader.driver.clone();
    }
    endpoint
}
