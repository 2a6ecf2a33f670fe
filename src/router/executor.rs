use std::sync::Arc;

use crate::config::EndpointRole;
use crate::driver::Connection;
use crate::error::DbError;
use crate::transaction::TxHandle;

/// A connection-like target for repository code: either the active
/// transaction or a pooled handle
#[derive(Clone)]
pub enum Executor {
    Transaction(TxHandle),
    Connection {
        role: EndpointRole,
        conn: Arc<dyn Connection>,
    },
}

impl Executor {
    /// Execute a statement, returning rows affected
    pub async fn execute(&self, sql: &str) -> Result<u64, DbError> {
        match self {
            Executor::Transaction(tx) => tx.execute(sql).await,
            Executor::Connection { conn, .. } => conn.execute(sql).await,
        }
    }

    /// Endpoint that will serve the statement
    pub fn role(&self) -> EndpointRole {
        match self {
            Executor::Transaction(tx) => tx.role(),
            Executor::Connection { role, .. } => *role,
        }
    }

    pub fn is_transaction(&self) -> bool {
        matches!(self, Executor::Transaction(_))
    }

    /// The pooled handle, when not inside a transaction
    pub fn connection(&self) -> Option<&Arc<dyn Connection>> {
        match self {
            Executor::Transaction(_) => None,
            Executor::Connection { conn, .. } => Some(conn),
        }
    }
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Executor::Transaction(tx) => f.debug_tuple("Transaction").field(tx).finish(),
            Executor::Connection { role, .. } => {
                f.debug_struct("Connection").field("role", role).finish_non_exhaustive()
            }
        }
    }
}
