use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};

use futures::FutureExt;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::EndpointRole;
use crate::driver::{Connection, Transaction, TxOptions};
use crate::error::DbError;
use crate::metrics::{metrics, TransactionKind};

use super::scope::{CallScope, TxHandle};

/// Failure of a scoped transaction; `E` is the body's own error type
#[derive(Debug, Error)]
pub enum TransactionError<E> {
    /// The call scope already carries a transaction
    #[error("nested transaction detected")]
    Nested,

    #[error("manager is closed")]
    Closed,

    #[error("failed to begin transaction: {0}")]
    Begin(#[source] DbError),

    /// The body failed and the transaction was rolled back
    #[error(transparent)]
    Body(E),

    /// The body failed and so did the rollback
    #[error("{body}, rollback error: {rollback}")]
    Rollback {
        body: E,
        #[source]
        rollback: DbError,
    },

    /// The body succeeded but the commit did not
    #[error("commit failed: {0}")]
    Commit(#[source] DbError),
}

impl<E> TransactionError<E> {
    pub fn is_nested(&self) -> bool {
        matches!(self, TransactionError::Nested)
    }

    /// The body's error, if the body is what failed
    pub fn body(&self) -> Option<&E> {
        match self {
            TransactionError::Body(e) | TransactionError::Rollback { body: e, .. } => Some(e),
            _ => None,
        }
    }

    pub fn into_body(self) -> Option<E> {
        match self {
            TransactionError::Body(e) | TransactionError::Rollback { body: e, .. } => Some(e),
            _ => None,
        }
    }
}

/// Panic payload used when a transaction body panicked and the rollback
/// that followed also failed
pub struct RollbackAfterPanic {
    /// The body's original panic payload
    pub payload: Box<dyn Any + Send>,
    pub rollback: DbError,
}

impl RollbackAfterPanic {
    /// The original panic message, when it was a string
    pub fn message(&self) -> Option<&str> {
        panic_message(self.payload.as_ref())
    }
}

impl fmt::Debug for RollbackAfterPanic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RollbackAfterPanic")
            .field("message", &self.message())
            .field("rollback", &self.rollback)
            .finish()
    }
}

impl fmt::Display for RollbackAfterPanic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "transaction panicked ({}) and rollback failed: {}",
            self.message().unwrap_or("non-string payload"),
            self.rollback
        )
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> Option<&str> {
    payload
        .downcast_ref::<&'static str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
}

/// Reject a transaction request whose scope already carries one
pub(crate) fn ensure_not_nested<E>(
    scope: &CallScope,
    kind: TransactionKind,
) -> Result<(), TransactionError<E>> {
    if let Some(active) = scope.transaction() {
        metrics().record_transaction(kind, "nested");
        debug!(active_tx = active.id(), "Rejected nested transaction");
        return Err(TransactionError::Nested);
    }
    Ok(())
}

/// Begin a transaction on `conn`, run `body` with a scope carrying it, then
/// commit or roll back exactly once.
///
/// A panicking body is rolled back and the panic resumed. If that rollback
/// fails too, the resumed payload is a [`RollbackAfterPanic`].
pub(crate) async fn run<F, Fut, T, E>(
    conn: &dyn Connection,
    role: EndpointRole,
    options: TxOptions,
    kind: TransactionKind,
    scope: &CallScope,
    body: F,
) -> Result<T, TransactionError<E>>
where
    F: FnOnce(CallScope) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let tx = scope
        .bounded(conn.begin(&options))
        .await
        .map_err(TransactionError::Begin)?;

    let handle = TxHandle::new(tx, role, options.read_only);
    let tx_scope = scope.with_transaction(handle.clone());
    debug!(tx = handle.id(), endpoint = %role, read_only = options.read_only, "Transaction begun");

    let outcome = AssertUnwindSafe(async move { body(tx_scope).await })
        .catch_unwind()
        .await;

    let tx = handle.take().await;
    match outcome {
        Err(payload) => {
            let rollback = rollback(tx).await;
            metrics().record_transaction(kind, "panic");
            debug!(tx = handle.id(), rollback_ok = rollback.is_ok(), "Transaction body panicked");
            match rollback {
                Ok(()) => panic::resume_unwind(payload),
                Err(rollback) => {
                    panic::resume_unwind(Box::new(RollbackAfterPanic { payload, rollback }))
                }
            }
        }
        Ok(Err(body)) => match rollback(tx).await {
            Ok(()) => {
                metrics().record_transaction(kind, "rollback");
                debug!(tx = handle.id(), "Transaction rolled back");
                Err(TransactionError::Body(body))
            }
            Err(rollback) => {
                metrics().record_transaction(kind, "rollback_failed");
                Err(TransactionError::Rollback { body, rollback })
            }
        },
        Ok(Ok(value)) => {
            let committed = match tx {
                Some(tx) => commit(scope, tx).await,
                None => Err(DbError::TransactionDone),
            };
            match committed {
                Ok(()) => {
                    metrics().record_transaction(kind, "commit");
                    debug!(tx = handle.id(), "Transaction committed");
                    Ok(value)
                }
                Err(e) => {
                    metrics().record_transaction(kind, "commit_failed");
                    Err(TransactionError::Commit(e))
                }
            }
        }
    }
}

/// Commit under the scope's deadline. A deadline that passed while the body
/// ran rolls the transaction back instead.
async fn commit(scope: &CallScope, tx: Box<dyn Transaction>) -> Result<(), DbError> {
    match scope.deadline() {
        Some(deadline) if Instant::now() >= deadline => {
            if let Err(e) = tx.rollback().await {
                warn!(error = %e, "Rollback after missed commit deadline failed");
            }
            Err(DbError::DeadlineExceeded)
        }
        Some(deadline) => tokio::time::timeout_at(deadline, tx.commit())
            .await
            .map_err(|_| DbError::DeadlineExceeded)?,
        None => tx.commit().await,
    }
}

/// Rollback runs to completion regardless of the scope's deadline
async fn rollback(tx: Option<Box<dyn Transaction>>) -> Result<(), DbError> {
    match tx {
        Some(tx) => tx.rollback().await,
        None => Err(DbError::TransactionDone),
    }
}
