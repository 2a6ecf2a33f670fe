//! Database driver seams
//!
//! The manager never speaks a wire protocol itself. It resolves a
//! [`Driver`] by name, asks it to open a pooled [`Connection`] from a DSN,
//! and begins [`Transaction`]s on that connection.

mod memory;
mod registry;
#[cfg(feature = "sqlite")]
mod sqlite;

pub use memory::{MemoryConnection, MemoryDriver, MemoryState, MemoryTransaction};
pub use registry::DriverRegistry;
#[cfg(feature = "sqlite")]
pub use sqlite::{SqliteConnection, SqliteDriver};

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::PoolConfig;
use crate::error::DbError;

/// Opens pooled connection handles from connection strings
#[async_trait]
pub trait Driver: Send + Sync {
    /// Registry name, e.g. "sqlite3"
    fn name(&self) -> &str;

    /// Open a pooled handle. Implementations may defer network I/O until the
    /// first use; the caller verifies liveness with [`Connection::ping`].
    async fn open(&self, dsn: &str, pool: &PoolConfig) -> Result<Arc<dyn Connection>, DbError>;
}

/// A pooled connection handle to one endpoint
#[async_trait]
pub trait Connection: Any + Send + Sync {
    /// Liveness probe
    async fn ping(&self) -> Result<(), DbError>;

    /// Begin a transaction with the given options
    async fn begin(&self, options: &TxOptions) -> Result<Box<dyn Transaction>, DbError>;

    /// Execute a statement outside any transaction, returning rows affected
    async fn execute(&self, sql: &str) -> Result<u64, DbError>;

    /// Close the pool. Further use fails.
    async fn close(&self) -> Result<(), DbError>;

    /// Access the concrete handle, e.g. to reach a driver's native pool
    fn as_any(&self) -> &dyn Any;
}

/// An open transaction. Exactly one of `commit` or `rollback` consumes it.
#[async_trait]
pub trait Transaction: Send {
    async fn execute(&mut self, sql: &str) -> Result<u64, DbError>;

    async fn commit(self: Box<Self>) -> Result<(), DbError>;

    async fn rollback(self: Box<Self>) -> Result<(), DbError>;
}

/// Transaction isolation level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Snapshot,
    Serializable,
}

impl IsolationLevel {
    pub fn as_sql(&self) -> &'static str {
        match self {
            IsolationLevel::ReadUncommitted => "READ UNCOMMITTED",
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::Snapshot => "SNAPSHOT",
            IsolationLevel::Serializable => "SERIALIZABLE",
        }
    }
}

/// Options used to begin a transaction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TxOptions {
    /// Isolation level; `None` uses the driver's default
    pub isolation: Option<IsolationLevel>,
    pub read_only: bool,
}

impl TxOptions {
    pub fn read_only() -> Self {
        Self {
            isolation: None,
            read_only: true,
        }
    }

    pub fn with_isolation(mut self, level: IsolationLevel) -> Self {
        self.isolation = Some(level);
        self
    }
}
