//! Leader/follower connection manager
//!
//! Construction validates the configuration, connects the leader (required)
//! and every follower (best effort), seeds the health table and starts the
//! health monitor. Everything after that is lock-light reads of fixed handles.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{DatabaseConfig, EndpointRole};
use crate::driver::{Connection, DriverRegistry, TxOptions};
use crate::error::{CloseFailure, DbError};
use crate::health::{ConnectionHealth, Health, HealthMonitor, HealthTable};
use crate::metrics::{metrics, TransactionKind};
use crate::pool::{FollowerFailure, Topology};
use crate::router::{Access, Executor, FollowerRouter, RouteTarget, RwSplitter};
use crate::transaction::{self, CallScope, TransactionError};

/// Handle to one leader and its followers
pub struct Manager {
    config: DatabaseConfig,
    topology: Arc<Topology>,
    health: Arc<HealthTable>,
    router: FollowerRouter,
    monitor: Arc<HealthMonitor>,
    monitor_task: Mutex<Option<JoinHandle<()>>>,
    /// Lifecycle token; cancelling it stops the monitor
    shutdown: CancellationToken,
    closed: AtomicBool,
}

impl Manager {
    /// Connect using the built-in drivers
    pub async fn connect(config: DatabaseConfig) -> Result<Self, DbError> {
        Self::connect_with(config, &DriverRegistry::with_defaults(), &CancellationToken::new()).await
    }

    /// Connect resolving drivers from `registry`.
    ///
    /// The manager's lifecycle token is a child of `shutdown`: cancelling the
    /// parent stops the health monitor too.
    pub async fn connect_with(
        config: DatabaseConfig,
        registry: &DriverRegistry,
        shutdown: &CancellationToken,
    ) -> Result<Self, DbError> {
        config.validate()?;

        let (topology, failures) = Topology::connect(&config, registry).await?;
        let topology = Arc::new(topology);
        let health = Arc::new(HealthTable::from_snapshot(initial_health(&topology, &failures)));

        let monitor = Arc::new(HealthMonitor::new(
            topology.clone(),
            health.clone(),
            &config.health,
        ));
        let shutdown = shutdown.child_token();
        let monitor_task = if config.health.enabled {
            Some(monitor.clone().spawn(shutdown.clone()))
        } else {
            info!("Health checks are disabled");
            None
        };

        info!(
            driver = %topology.driver(),
            followers = topology.follower_count(),
            followers_connected = topology.follower_count() - failures.len(),
            "Database manager connected"
        );

        Ok(Self {
            config,
            topology,
            health,
            router: FollowerRouter::new(),
            monitor,
            monitor_task: Mutex::new(monitor_task),
            shutdown,
            closed: AtomicBool::new(false),
        })
    }

    /// Connection for writes
    pub fn leader(&self) -> Arc<dyn Connection> {
        self.topology.leader().clone()
    }

    /// Connection for reads: the next healthy follower, else the leader
    pub fn follower(&self) -> Arc<dyn Connection> {
        self.select_follower().1
    }

    /// Like [`Manager::follower`], also naming the endpoint chosen
    pub fn select_follower(&self) -> (EndpointRole, Arc<dyn Connection>) {
        self.router.select(&self.topology, &self.health)
    }

    /// Leader driver name
    pub fn driver(&self) -> &str {
        self.topology.driver()
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    /// Latest health of every endpoint
    pub fn health(&self) -> Health {
        self.health.snapshot()
    }

    /// Whether the leader passed its last check
    pub fn is_healthy(&self) -> bool {
        self.health.leader_healthy()
    }

    /// The shared health table
    pub fn health_table(&self) -> &Arc<HealthTable> {
        &self.health
    }

    /// Follower handles by configured position; `None` where connect failed
    pub fn follower_slots(&self) -> &[Option<Arc<dyn Connection>>] {
        self.topology.follower_slots()
    }

    /// Run one probe cycle now instead of waiting for the next tick
    pub async fn check_health_now(&self) {
        self.monitor.check_all().await;
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Stop the health monitor and close every handle.
    ///
    /// Every endpoint is closed even if an earlier one fails; all failures are
    /// returned together. Calling it again is a no-op.
    pub async fn close(&self) -> Result<(), DbError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        self.shutdown.cancel();
        let task = self.monitor_task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(error = %e, "Health monitor task ended abnormally");
            }
        }

        let mut failures = Vec::new();
        for (role, conn) in self.topology.endpoints() {
            if let Err(error) = conn.close().await {
                warn!(endpoint = %role, error = %error, "Failed to close connection");
                failures.push(CloseFailure { role, error });
            }
        }

        info!(failures = failures.len(), "Database manager closed");
        if failures.is_empty() {
            Ok(())
        } else {
            Err(DbError::Close(failures))
        }
    }

    /// Write target for `scope`: its transaction, else the leader
    pub fn connection(&self, scope: &CallScope) -> Executor {
        self.executor(scope, Access::Write)
    }

    /// Read target for `scope`: its transaction, else a routed follower
    pub fn read_connection(&self, scope: &CallScope) -> Executor {
        self.executor(scope, Access::Read)
    }

    fn executor(&self, scope: &CallScope, access: Access) -> Executor {
        match (RwSplitter::route(access, scope.in_transaction()), scope.transaction()) {
            (RouteTarget::Transaction, Some(tx)) => Executor::Transaction(tx.clone()),
            (RouteTarget::Follower, _) => {
                let (role, conn) = self.select_follower();
                Executor::Connection { role, conn }
            }
            _ => Executor::Connection {
                role: EndpointRole::Leader,
                conn: self.leader(),
            },
        }
    }

    /// Run `body` in a transaction on the leader with default options
    pub async fn with_transaction<F, Fut, T, E>(
        &self,
        scope: &CallScope,
        body: F,
    ) -> Result<T, TransactionError<E>>
    where
        F: FnOnce(CallScope) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.with_transaction_options(scope, TxOptions::default(), body)
            .await
    }

    /// Run `body` in a transaction on the leader.
    ///
    /// The body's scope carries the transaction. An `Err` from the body rolls
    /// back; `Ok` commits; a panic rolls back and is resumed.
    pub async fn with_transaction_options<F, Fut, T, E>(
        &self,
        scope: &CallScope,
        options: TxOptions,
        body: F,
    ) -> Result<T, TransactionError<E>>
    where
        F: FnOnce(CallScope) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let kind = TransactionKind::ReadWrite;
        transaction::ensure_not_nested(scope, kind)?;
        self.ensure_open()?;

        transaction::run(
            self.topology.leader().as_ref(),
            EndpointRole::Leader,
            options,
            kind,
            scope,
            body,
        )
        .await
    }

    /// Run `body` in a read-only transaction on a follower
    pub async fn with_read_only_transaction<F, Fut, T, E>(
        &self,
        scope: &CallScope,
        body: F,
    ) -> Result<T, TransactionError<E>>
    where
        F: FnOnce(CallScope) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.with_read_only_transaction_options(scope, TxOptions::read_only(), body)
            .await
    }

    /// Run `body` in a read-only transaction on a follower.
    ///
    /// `read_only` is forced on whatever `options` say. With no healthy
    /// follower the transaction runs on the leader. The success path still
    /// commits.
    pub async fn with_read_only_transaction_options<F, Fut, T, E>(
        &self,
        scope: &CallScope,
        options: TxOptions,
        body: F,
    ) -> Result<T, TransactionError<E>>
    where
        F: FnOnce(CallScope) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let kind = TransactionKind::ReadOnly;
        transaction::ensure_not_nested(scope, kind)?;
        self.ensure_open()?;

        let (role, conn) = self.select_follower();
        if role.is_leader() && self.topology.follower_count() > 0 {
            debug!("Read-only transaction running on the leader");
        }

        let options = TxOptions {
            read_only: true,
            ..options
        };
        transaction::run(conn.as_ref(), role, options, kind, scope, body).await
    }

    fn ensure_open<E>(&self) -> Result<(), TransactionError<E>> {
        if self.is_closed() {
            return Err(TransactionError::Closed);
        }
        Ok(())
    }
}

impl Drop for Manager {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl std::fmt::Debug for Manager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Manager")
            .field("driver", &self.topology.driver())
            .field("followers", &self.topology.follower_count())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

/// Health as of construction: every connected handle just passed its ping
fn initial_health(topology: &Topology, failures: &[FollowerFailure]) -> Health {
    let mut followers = vec![ConnectionHealth::default(); topology.follower_count()];
    for (index, slot) in topology.follower_slots().iter().enumerate() {
        if slot.is_some() {
            followers[index] = ConnectionHealth::healthy(Default::default());
        }
    }
    for failure in failures {
        if let Some(entry) = followers.get_mut(failure.index) {
            *entry = ConnectionHealth::unhealthy(failure.error.to_string(), Default::default());
        }
    }

    for (role, healthy) in std::iter::once((EndpointRole::Leader, true))
        .chain(followers.iter().enumerate().map(|(i, h)| (EndpointRole::Follower(i), h.healthy)))
    {
        metrics().set_endpoint_healthy(role, healthy);
    }

    Health {
        leader: ConnectionHealth::healthy(Default::default()),
        followers,
    }
}
