use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::config::EndpointRole;

/// Errors raised by the connection manager and its drivers
#[derive(Debug, Error)]
pub enum DbError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("unknown driver: {0}")]
    UnknownDriver(String),

    #[error("failed to connect to {role} after {attempts} attempts: {source}")]
    Connect {
        role: EndpointRole,
        attempts: u32,
        #[source]
        source: Box<DbError>,
    },

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("deadline exceeded")]
    DeadlineExceeded,

    #[error("driver error: {0}")]
    Driver(String),

    #[cfg(feature = "sqlite")]
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),

    #[error("no rows in result set")]
    NoRows,

    #[error("no database connection")]
    NoConnection,

    #[error("manager is closed")]
    Closed,

    #[error("transaction has already finished")]
    TransactionDone,

    #[error("errors during close: {}", join_failures(.0))]
    Close(Vec<CloseFailure>),
}

impl DbError {
    /// Whether this error means a query matched no rows
    pub fn is_no_rows(&self) -> bool {
        match self {
            DbError::NoRows => true,
            #[cfg(feature = "sqlite")]
            DbError::Sqlx(sqlx::Error::RowNotFound) => true,
            _ => false,
        }
    }

    /// Whether this error is a timeout or an expired call deadline
    pub fn is_timeout(&self) -> bool {
        match self {
            DbError::Timeout(_) | DbError::DeadlineExceeded => true,
            DbError::Connect { source, .. } => source.is_timeout(),
            _ => false,
        }
    }
}

/// One endpoint that failed to close
#[derive(Debug)]
pub struct CloseFailure {
    pub role: EndpointRole,
    pub error: DbError,
}

impl fmt::Display for CloseFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} close error: {}", self.role, self.error)
    }
}

fn join_failures(failures: &[CloseFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
