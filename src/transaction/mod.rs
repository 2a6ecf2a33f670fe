//! Scoped transactions
//!
//! A transaction lives exactly as long as the body it was begun for. The
//! body receives a [`CallScope`] carrying the transaction; the caller's own
//! scope never sees it.

mod coordinator;
mod scope;

pub(crate) use coordinator::{ensure_not_nested, run};
pub use coordinator::{RollbackAfterPanic, TransactionError};
pub use scope::{CallScope, TxHandle};
