//! Per-driver connection string construction
//!
//! The formats match what existing deployments already hand to their
//! drivers, so they are reproduced byte for byte, including the way
//! timeouts are rendered and passwords are escaped.

use std::fmt::Write as _;
use std::time::Duration;

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

use super::schema::{EndpointConfig, DRIVER_MYSQL, DRIVER_POSTGRES, DRIVER_SQLITE};

/// Characters left untouched by query escaping: alphanumerics and `-_.~`
const QUERY_ESCAPE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

impl EndpointConfig {
    /// Build the driver-specific connection string for this endpoint
    pub fn dsn(&self) -> String {
        let password = query_escape(&self.password);
        let timeout = self.raw_connect_timeout();

        match self.driver.as_str() {
            DRIVER_POSTGRES => format!(
                "host={} port={} user={} password={} dbname={} sslmode={} connect_timeout={}",
                self.host,
                self.port,
                self.username,
                password,
                self.database,
                self.ssl_mode,
                whole_seconds_or_default(timeout),
            ),
            DRIVER_MYSQL => {
                let mut timeout_str = format_duration(timeout);
                if timeout_str == "0s" {
                    timeout_str = "5s".to_string();
                }
                format!(
                    "{}:{}@tcp({}:{})/{}?parseTime=true&timeout={}",
                    self.username, password, self.host, self.port, self.database, timeout_str
                )
            }
            DRIVER_SQLITE => {
                let mut timeout_ms = timeout.as_millis();
                if timeout_ms == 0 {
                    timeout_ms = 5000;
                }
                format!(
                    "file:{}?mode=rwc&cache=shared&_busy_timeout={}",
                    self.database, timeout_ms
                )
            }
            other => format!(
                "driver={};host={};port={};database={};user id={};password={};connect timeout={}",
                other,
                self.host,
                self.port,
                self.database,
                self.username,
                password,
                whole_seconds_or_default(timeout),
            ),
        }
    }
}

fn whole_seconds_or_default(timeout: Duration) -> u64 {
    match timeout.as_secs() {
        0 => 5,
        secs => secs,
    }
}

/// Escape a value for use inside a query string: spaces become `+`,
/// everything outside `[A-Za-z0-9-_.~]` is percent-encoded.
pub(crate) fn query_escape(value: &str) -> String {
    utf8_percent_encode(value, QUERY_ESCAPE)
        .to_string()
        .replace("%20", "+")
}

/// Render a duration the way MySQL-style DSNs expect it, e.g. `1.5s`,
/// `250ms`, `1m30s`, `1h0m0s`.
pub(crate) fn format_duration(d: Duration) -> String {
    let nanos = d.as_nanos();
    if nanos == 0 {
        return "0s".to_string();
    }

    if nanos < 1_000_000_000 {
        let (unit, scale) = if nanos < 1_000 {
            ("ns", 1)
        } else if nanos < 1_000_000 {
            ("µs", 1_000)
        } else {
            ("ms", 1_000_000)
        };
        return format!("{}{}", decimal(nanos, scale), unit);
    }

    let total_secs = d.as_secs();
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    let seconds_nanos = u128::from(seconds) * 1_000_000_000 + u128::from(d.subsec_nanos());

    let mut out = String::new();
    if hours > 0 {
        let _ = write!(out, "{}h", hours);
    }
    if hours > 0 || minutes > 0 {
        let _ = write!(out, "{}m", minutes);
    }
    let _ = write!(out, "{}s", decimal(seconds_nanos, 1_000_000_000));
    out
}

/// `value / scale` with the fractional part printed without trailing zeros
fn decimal(value: u128, scale: u128) -> String {
    let whole = value / scale;
    let frac = value % scale;
    if frac == 0 {
        return whole.to_string();
    }

    let width = scale.to_string().len() - 1;
    let digits = format!("{:0width$}", frac, width = width);
    format!("{}.{}", whole, digits.trim_end_matches('0'))
}
