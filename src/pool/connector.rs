use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::config::{EndpointConfig, EndpointRole, PoolConfig};
use crate::driver::{Connection, Driver};
use crate::error::DbError;
use crate::metrics::metrics;

/// Base delay between connect attempts; attempt `n` waits `n × BACKOFF_STEP`
pub const BACKOFF_STEP: Duration = Duration::from_millis(100);

/// Delay before the attempt following `attempt` (1-based)
pub fn backoff(attempt: u32) -> Duration {
    BACKOFF_STEP * attempt
}

/// Open a pooled handle to one endpoint and prove it is alive.
///
/// Makes up to `max_retries` attempts. Each attempt opens a handle with the
/// pool policy applied, then pings it within the connect timeout. A handle
/// whose ping fails is closed before the next attempt.
pub async fn establish(
    driver: &dyn Driver,
    endpoint: &EndpointConfig,
    role: EndpointRole,
    pool: &PoolConfig,
) -> Result<Arc<dyn Connection>, DbError> {
    let max_retries = endpoint.effective_max_retries();
    let connect_timeout = endpoint.effective_connect_timeout();
    let pool = pool.resolved();
    let dsn = endpoint.dsn();

    let mut last_error = DbError::NoConnection;
    for attempt in 1..=max_retries {
        match try_connect(driver, &dsn, &pool, connect_timeout).await {
            Ok(conn) => {
                metrics().record_connect_attempt(role, true);
                debug!(role = %role, addr = %endpoint.addr(), attempt, "Connected");
                return Ok(conn);
            }
            Err(e) => {
                metrics().record_connect_attempt(role, false);
                debug!(
                    role = %role,
                    addr = %endpoint.addr(),
                    attempt,
                    max_retries,
                    error = %e,
                    "Connect attempt failed"
                );
                last_error = e;
            }
        }

        if attempt < max_retries {
            tokio::time::sleep(backoff(attempt)).await;
        }
    }

    Err(DbError::Connect {
        role,
        attempts: max_retries,
        source: Box::new(last_error),
    })
}

async fn try_connect(
    driver: &dyn Driver,
    dsn: &str,
    pool: &PoolConfig,
    connect_timeout: Duration,
) -> Result<Arc<dyn Connection>, DbError> {
    let conn = driver.open(dsn, pool).await?;

    let ping = match tokio::time::timeout(connect_timeout, conn.ping()).await {
        Ok(result) => result,
        Err(_) => Err(DbError::Timeout(connect_timeout)),
    };

    if let Err(e) = ping {
        if let Err(close_err) = conn.close().await {
            debug!(error = %close_err, "Failed to close rejected connection");
        }
        return Err(e);
    }
    Ok(conn)
}
