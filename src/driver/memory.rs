//! In-process driver
//!
//! Keeps no data; it tracks what was asked of it and fails on demand. Useful
//! for exercising routing, health and transaction handling without a server,
//! both here and in downstream repository tests.

use std::any::Any;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::config::{EndpointConfig, PoolConfig};
use crate::error::DbError;

use super::{Connection, Driver, Transaction, TxOptions};

/// Driver whose connections live in process memory
pub struct MemoryDriver {
    name: String,
    /// Endpoint state keyed by DSN, shared by every handle opened from it
    states: DashMap<String, Arc<MemoryState>>,
    /// Time of every `open` call, in order
    open_attempts: Mutex<Vec<Instant>>,
}

impl Default for MemoryDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDriver {
    pub fn new() -> Self {
        Self::named("memory")
    }

    /// Create a driver registered under a different name
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            states: DashMap::new(),
            open_attempts: Mutex::new(Vec::new()),
        }
    }

    /// State for a DSN, created on first use so it can be set up before open
    pub fn state(&self, dsn: &str) -> Arc<MemoryState> {
        self.states
            .entry(dsn.to_string())
            .or_insert_with(|| Arc::new(MemoryState::new(dsn)))
            .clone()
    }

    /// State for the DSN an endpoint renders to
    pub fn endpoint_state(&self, endpoint: &EndpointConfig) -> Arc<MemoryState> {
        self.state(&endpoint.dsn())
    }

    /// Number of `open` calls so far
    pub fn open_count(&self) -> usize {
        self.open_attempts.lock().len()
    }

    /// Times of every `open` call
    pub fn open_attempts(&self) -> Vec<Instant> {
        self.open_attempts.lock().clone()
    }
}

#[async_trait]
impl Driver for MemoryDriver {
    fn name(&self) -> &str {
        &self.name
    }

    async fn open(&self, dsn: &str, pool: &PoolConfig) -> Result<Arc<dyn Connection>, DbError> {
        self.open_attempts.lock().push(Instant::now());

        let state = self.state(dsn);
        state.opens.fetch_add(1, Ordering::SeqCst);
        if state.refuse_open.load(Ordering::SeqCst) {
            debug!(dsn = %dsn, "Memory driver refusing open");
            return Err(DbError::Driver("connection refused".into()));
        }

        *state.pool.lock() = Some(pool.clone());
        state.closed.store(false, Ordering::SeqCst);
        Ok(Arc::new(MemoryConnection { state }))
    }
}

/// Shared, inspectable state behind one in-memory endpoint
pub struct MemoryState {
    label: String,
    pool: Mutex<Option<PoolConfig>>,
    ping_delay: Mutex<Option<Duration>>,
    begin_options: Mutex<Vec<TxOptions>>,

    refuse_open: AtomicBool,
    reachable: AtomicBool,
    fail_begin: AtomicBool,
    fail_commit: AtomicBool,
    fail_rollback: AtomicBool,
    fail_close: AtomicBool,
    closed: AtomicBool,

    opens: AtomicU64,
    pings: AtomicU64,
    executed: AtomicU64,
    begun: AtomicU64,
    committed: AtomicU64,
    rolled_back: AtomicU64,
    active: AtomicU64,
    closes: AtomicU64,
}

impl MemoryState {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            pool: Mutex::new(None),
            ping_delay: Mutex::new(None),
            begin_options: Mutex::new(Vec::new()),
            refuse_open: AtomicBool::new(false),
            reachable: AtomicBool::new(true),
            fail_begin: AtomicBool::new(false),
            fail_commit: AtomicBool::new(false),
            fail_rollback: AtomicBool::new(false),
            fail_close: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            opens: AtomicU64::new(0),
            pings: AtomicU64::new(0),
            executed: AtomicU64::new(0),
            begun: AtomicU64::new(0),
            committed: AtomicU64::new(0),
            rolled_back: AtomicU64::new(0),
            active: AtomicU64::new(0),
            closes: AtomicU64::new(0),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    // Failure injection

    pub fn refuse_open(&self, refuse: bool) {
        self.refuse_open.store(refuse, Ordering::SeqCst);
    }

    /// Make pings succeed or fail
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Delay every ping, e.g. to trip probe timeouts
    pub fn set_ping_delay(&self, delay: Option<Duration>) {
        *self.ping_delay.lock() = delay;
    }

    pub fn fail_begin(&self, fail: bool) {
        self.fail_begin.store(fail, Ordering::SeqCst);
    }

    pub fn fail_commit(&self, fail: bool) {
        self.fail_commit.store(fail, Ordering::SeqCst);
    }

    pub fn fail_rollback(&self, fail: bool) {
        self.fail_rollback.store(fail, Ordering::SeqCst);
    }

    pub fn fail_close(&self, fail: bool) {
        self.fail_close.store(fail, Ordering::SeqCst);
    }

    // Inspection

    /// Pool policy passed to the most recent open
    pub fn pool_config(&self) -> Option<PoolConfig> {
        self.pool.lock().clone()
    }

    /// Options of every transaction begun, in order
    pub fn begin_options(&self) -> Vec<TxOptions> {
        self.begin_options.lock().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn opens(&self) -> u64 {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn pings(&self) -> u64 {
        self.pings.load(Ordering::SeqCst)
    }

    pub fn executed(&self) -> u64 {
        self.executed.load(Ordering::SeqCst)
    }

    pub fn begun(&self) -> u64 {
        self.begun.load(Ordering::SeqCst)
    }

    pub fn committed(&self) -> u64 {
        self.committed.load(Ordering::SeqCst)
    }

    pub fn rolled_back(&self) -> u64 {
        self.rolled_back.load(Ordering::SeqCst)
    }

    /// Transactions begun and not yet finished
    pub fn active_transactions(&self) -> u64 {
        self.active.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> u64 {
        self.closes.load(Ordering::SeqCst)
    }

    fn check_open(&self) -> Result<(), DbError> {
        if self.is_closed() {
            return Err(DbError::Driver("connection is closed".into()));
        }
        Ok(())
    }
}

/// Connection handle over a [`MemoryState`]
pub struct MemoryConnection {
    state: Arc<MemoryState>,
}

impl MemoryConnection {
    /// Standalone handle with fresh state
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            state: Arc::new(MemoryState::new(label)),
        }
    }

    pub fn from_state(state: Arc<MemoryState>) -> Self {
        Self { state }
    }

    pub fn state(&self) -> &Arc<MemoryState> {
        &self.state
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn ping(&self) -> Result<(), DbError> {
        self.state.pings.fetch_add(1, Ordering::SeqCst);
        let delay = *self.state.ping_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.state.check_open()?;
        if !self.state.reachable.load(Ordering::SeqCst) {
            return Err(DbError::Driver("ping failed: endpoint unreachable".into()));
        }
        Ok(())
    }

    async fn begin(&self, options: &TxOptions) -> Result<Box<dyn Transaction>, DbError> {
        self.state.check_open()?;
        if self.state.fail_begin.load(Ordering::SeqCst) {
            return Err(DbError::Driver("begin refused".into()));
        }
        self.state.begin_options.lock().push(*options);
        self.state.begun.fetch_add(1, Ordering::SeqCst);
        self.state.active.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryTransaction {
            state: self.state.clone(),
            finished: false,
        }))
    }

    async fn execute(&self, _sql: &str) -> Result<u64, DbError> {
        self.state.check_open()?;
        self.state.executed.fetch_add(1, Ordering::SeqCst);
        Ok(0)
    }

    async fn close(&self) -> Result<(), DbError> {
        self.state.closes.fetch_add(1, Ordering::SeqCst);
        self.state.closed.store(true, Ordering::SeqCst);
        if self.state.fail_close.load(Ordering::SeqCst) {
            return Err(DbError::Driver(format!("{}: close failed", self.state.label)));
        }
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Transaction over a [`MemoryState`]
pub struct MemoryTransaction {
    state: Arc<MemoryState>,
    finished: bool,
}

impl MemoryTransaction {
    fn finish(&mut self) {
        if !self.finished {
            self.finished = true;
            self.state.active.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn execute(&mut self, _sql: &str) -> Result<u64, DbError> {
        self.state.check_open()?;
        self.state.executed.fetch_add(1, Ordering::SeqCst);
        Ok(0)
    }

    async fn commit(self: Box<Self>) -> Result<(), DbError> {
        let mut this = self;
        this.finish();
        if this.state.fail_commit.load(Ordering::SeqCst) {
            return Err(DbError::Driver("commit failed".into()));
        }
        this.state.committed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), DbError> {
        let mut this = self;
        this.finish();
        if this.state.fail_rollback.load(Ordering::SeqCst) {
            return Err(DbError::Driver("rollback failed".into()));
        }
        this.state.rolled_back.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl Drop for MemoryTransaction {
    fn drop(&mut self) {
        self.finish();
    }
}
