//! SQLite driver built on sqlx
//!
//! Opens from the `file:<db>?mode=rwc&cache=shared&_busy_timeout=<ms>`
//! connection string the manager renders for `sqlite3` endpoints.

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Sqlite;
use tracing::debug;

use crate::config::{PoolConfig, DRIVER_SQLITE};
use crate::error::DbError;

use super::{Connection, Driver, IsolationLevel, Transaction, TxOptions};

#[derive(Debug, Default)]
pub struct SqliteDriver;

impl SqliteDriver {
    pub fn new() -> Self {
        Self
    }
}

/// Translate the rendered DSN back into sqlx connect options
pub(crate) fn parse_dsn(dsn: &str) -> Result<SqliteConnectOptions, DbError> {
    let rest = dsn
        .strip_prefix("file:")
        .ok_or_else(|| DbError::InvalidConfig(format!("not a sqlite file DSN: {}", dsn)))?;
    let (path, query) = rest.split_once('?').unwrap_or((rest, ""));
    if path.is_empty() {
        return Err(DbError::InvalidConfig("sqlite DSN has no database path".into()));
    }

    let mut options = SqliteConnectOptions::new().filename(path);
    for pair in query.split('&').filter(|p| !p.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        options = match key {
            "mode" => match value {
                "ro" => options.read_only(true),
                "rw" => options.create_if_missing(false),
                "rwc" => options.create_if_missing(true),
                other => {
                    return Err(DbError::InvalidConfig(format!(
                        "unsupported sqlite mode: {}",
                        other
                    )))
                }
            },
            "cache" => options.shared_cache(value == "shared"),
            "_busy_timeout" => {
                let ms: u64 = value.parse().map_err(|_| {
                    DbError::InvalidConfig(format!("invalid _busy_timeout: {}", value))
                })?;
                options.busy_timeout(Duration::from_millis(ms))
            }
            other => {
                debug!(parameter = %other, "Ignoring unknown sqlite DSN parameter");
                options
            }
        };
    }
    Ok(options)
}

#[async_trait]
impl Driver for SqliteDriver {
    fn name(&self) -> &str {
        DRIVER_SQLITE
    }

    async fn open(&self, dsn: &str, pool: &PoolConfig) -> Result<Arc<dyn Connection>, DbError> {
        let options = parse_dsn(dsn)?;

        // sqlx has no idle-count cap; max_idle_conns is not applied
        let pool = SqlitePoolOptions::new()
            .max_connections(pool.max_open_conns.max(1))
            .max_lifetime(Some(pool.conn_max_lifetime()))
            .idle_timeout(Some(pool.conn_max_idle_time()))
            // query_only outlives the transaction that set it, including one
            // dropped without commit or rollback
            .after_release(|conn, _meta| {
                Box::pin(async move {
                    sqlx::query("PRAGMA query_only = OFF").execute(&mut *conn).await?;
                    Ok(true)
                })
            })
            .connect_lazy_with(options);

        Ok(Arc::new(SqliteConnection { pool }))
    }
}

/// Pooled SQLite handle
pub struct SqliteConnection {
    pool: SqlitePool,
}

impl SqliteConnection {
    /// The underlying sqlx pool, for running typed queries
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl Connection for SqliteConnection {
    async fn ping(&self) -> Result<(), DbError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn begin(&self, options: &TxOptions) -> Result<Box<dyn Transaction>, DbError> {
        if let Some(level) = options.isolation {
            if level != IsolationLevel::Serializable {
                debug!(isolation = level.as_sql(), "SQLite transactions are always serializable");
            }
        }

        let mut tx = self.pool.begin().await?;
        if options.read_only {
            sqlx::query("PRAGMA query_only = ON")
                .execute(&mut *tx)
                .await?;
        }

        Ok(Box::new(SqliteTransaction { tx }))
    }

    async fn execute(&self, sql: &str) -> Result<u64, DbError> {
        let result = sqlx::query(sql).execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn close(&self) -> Result<(), DbError> {
        self.pool.close().await;
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A read-only transaction's `query_only` flag is cleared by the pool's
/// release hook, whether the transaction finishes or is dropped
struct SqliteTransaction {
    tx: sqlx::Transaction<'static, Sqlite>,
}

#[async_trait]
impl Transaction for SqliteTransaction {
    async fn execute(&mut self, sql: &str) -> Result<u64, DbError> {
        let result = sqlx::query(sql).execute(&mut *self.tx).await?;
        Ok(result.rows_affected())
    }

    async fn commit(self: Box<Self>) -> Result<(), DbError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), DbError> {
        self.tx.rollback().await?;
        Ok(())
    }
}
