use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::config::EndpointRole;
use crate::driver::Transaction;
use crate::error::DbError;

static NEXT_TX_ID: AtomicU64 = AtomicU64::new(1);

/// Shared handle to a transaction begun by the coordinator.
///
/// Clones refer to the same transaction. Once the coordinator commits or
/// rolls back, every clone fails with [`DbError::TransactionDone`].
#[derive(Clone)]
pub struct TxHandle {
    id: u64,
    role: EndpointRole,
    read_only: bool,
    tx: Arc<Mutex<Option<Box<dyn Transaction>>>>,
}

impl TxHandle {
    pub(crate) fn new(tx: Box<dyn Transaction>, role: EndpointRole, read_only: bool) -> Self {
        Self {
            id: NEXT_TX_ID.fetch_add(1, Ordering::Relaxed),
            role,
            read_only,
            tx: Arc::new(Mutex::new(Some(tx))),
        }
    }

    /// Process-unique id, for logs
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Endpoint the transaction runs on
    pub fn role(&self) -> EndpointRole {
        self.role
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Execute a statement inside the transaction
    pub async fn execute(&self, sql: &str) -> Result<u64, DbError> {
        let mut guard = self.tx.lock().await;
        match guard.as_mut() {
            Some(tx) => tx.execute(sql).await,
            None => Err(DbError::TransactionDone),
        }
    }

    /// Whether the transaction has been committed or rolled back
    pub async fn is_finished(&self) -> bool {
        self.tx.lock().await.is_none()
    }

    /// Detach the transaction for its terminal action
    pub(crate) async fn take(&self) -> Option<Box<dyn Transaction>> {
        self.tx.lock().await.take()
    }

    pub fn same_transaction(&self, other: &TxHandle) -> bool {
        Arc::ptr_eq(&self.tx, &other.tx)
    }
}

impl fmt::Debug for TxHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TxHandle")
            .field("id", &self.id)
            .field("role", &self.role)
            .field("read_only", &self.read_only)
            .finish()
    }
}

/// Per-call carrier threaded through repository code.
///
/// Holds the active transaction, if any, and an optional deadline. Scopes are
/// values: deriving one never changes the scope it came from.
#[derive(Debug, Clone, Default)]
pub struct CallScope {
    tx: Option<TxHandle>,
    deadline: Option<Instant>,
}

impl CallScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Derive a scope whose deadline is `timeout` from now
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Derive a scope with a deadline; an earlier existing deadline wins
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let deadline = match self.deadline {
            Some(current) if current < deadline => current,
            _ => deadline,
        };
        Self {
            tx: self.tx.clone(),
            deadline: Some(deadline),
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// The active transaction for this call, if any
    pub fn transaction(&self) -> Option<&TxHandle> {
        self.tx.as_ref()
    }

    pub fn in_transaction(&self) -> bool {
        self.tx.is_some()
    }

    pub(crate) fn with_transaction(&self, tx: TxHandle) -> Self {
        Self {
            tx: Some(tx),
            deadline: self.deadline,
        }
    }

    /// Run `fut`, failing with [`DbError::DeadlineExceeded`] if the scope's
    /// deadline passes first
    pub async fn bounded<F, T>(&self, fut: F) -> Result<T, DbError>
    where
        F: Future<Output = Result<T, DbError>>,
    {
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(DbError::DeadlineExceeded),
            Some(deadline) => tokio::time::timeout_at(deadline, fut)
                .await
                .map_err(|_| DbError::DeadlineExceeded)?,
            None => fut.await,
        }
    }
}
