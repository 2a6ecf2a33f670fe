//! sqlkit: a leader/follower database connection manager
//!
//! [`Manager`] owns one leader and any number of followers. It probes them in
//! the background, routes reads round-robin across healthy followers (falling
//! back to the leader), and runs closures inside transactions that commit or
//! roll back exactly once, panics included.
//!
//! Transactions travel through an explicit [`CallScope`]: repository code
//! asks the manager for [`Manager::connection`] or
//! [`Manager::read_connection`] with the scope it was given and gets the
//! active transaction when there is one.

pub mod config;
pub mod driver;
pub mod error;
pub mod health;
pub mod manager;
pub mod metrics;
pub mod pool;
pub mod router;
pub mod transaction;

pub use config::{DatabaseConfig, EndpointConfig, EndpointRole, HealthCheckConfig, PoolConfig};
pub use driver::{Connection, Driver, DriverRegistry, IsolationLevel, Transaction, TxOptions};
pub use error::{CloseFailure, DbError};
pub use health::{ConnectionHealth, Health};
pub use manager::Manager;
pub use metrics::metrics;
pub use router::Executor;
pub use transaction::{CallScope, RollbackAfterPanic, TransactionError, TxHandle};
