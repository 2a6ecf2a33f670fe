use std::fmt;
use std::time::Duration;

use serde::Deserialize;

use crate::error::DbError;

pub const DRIVER_POSTGRES: &str = "postgres";
pub const DRIVER_MYSQL: &str = "mysql";
pub const DRIVER_SQLITE: &str = "sqlite3";

/// Top-level configuration: one leader, any number of followers, and the
/// pool and health policies shared by all of them.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Primary (write) endpoint
    pub leader: EndpointConfig,
    /// Read replicas; order defines the round-robin sequence
    #[serde(default)]
    pub followers: Vec<EndpointConfig>,
    /// Pool limits applied to every endpoint
    #[serde(default)]
    pub pool: PoolConfig,
    /// Background health checking
    #[serde(default)]
    pub health: HealthCheckConfig,
}

impl DatabaseConfig {
    pub fn new(leader: EndpointConfig) -> Self {
        Self {
            leader,
            followers: Vec::new(),
            pool: PoolConfig::default(),
            health: HealthCheckConfig::default(),
        }
    }

    pub fn with_follower(mut self, follower: EndpointConfig) -> Self {
        self.followers.push(follower);
        self
    }

    pub fn with_pool(mut self, pool: PoolConfig) -> Self {
        self.pool = pool;
        self
    }

    pub fn with_health(mut self, health: HealthCheckConfig) -> Self {
        self.health = health;
        self
    }

    /// Check the fields required before anything connects.
    ///
    /// Only the leader is validated; a malformed follower fails at connect
    /// time and is skipped like any other unreachable follower.
    pub fn validate(&self) -> Result<(), DbError> {
        if self.leader.driver.is_empty() {
            return Err(DbError::InvalidConfig("leader driver is required".into()));
        }
        if self.leader.host.is_empty() {
            return Err(DbError::InvalidConfig("leader host is required".into()));
        }
        if self.leader.database.is_empty() {
            return Err(DbError::InvalidConfig("leader database is required".into()));
        }
        Ok(())
    }
}

// ============================================================================
// Endpoint Configuration
// ============================================================================

/// Identity of an endpoint inside a manager
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndpointRole {
    Leader,
    /// Follower at its configured position
    Follower(usize),
}

impl EndpointRole {
    /// Low-cardinality label for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            EndpointRole::Leader => "leader",
            EndpointRole::Follower(_) => "follower",
        }
    }

    /// Unique label such as `leader` or `follower-2`
    pub fn label(&self) -> String {
        match self {
            EndpointRole::Leader => "leader".to_string(),
            EndpointRole::Follower(index) => format!("follower-{}", index),
        }
    }

    pub fn is_leader(&self) -> bool {
        matches!(self, EndpointRole::Leader)
    }
}

impl fmt::Display for EndpointRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndpointRole::Leader => write!(f, "leader"),
            EndpointRole::Follower(index) => write!(f, "follower {}", index),
        }
    }
}

/// A single database endpoint
#[derive(Clone, Deserialize)]
pub struct EndpointConfig {
    /// Driver name: "postgres", "mysql", "sqlite3", or any registered driver
    #[serde(default)]
    pub driver: String,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub database: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    /// Postgres sslmode: "disable", "require", "verify-ca", "verify-full"
    #[serde(default)]
    pub ssl_mode: String,
    /// Connect and liveness probe timeout (milliseconds, 0 = default)
    #[serde(default)]
    pub connect_timeout_ms: u64,
    /// Connection attempts before giving up (0 = default)
    #[serde(default)]
    pub max_retries: u32,
}

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_MAX_RETRIES: u32 = 3;

impl EndpointConfig {
    pub fn new(
        driver: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        database: impl Into<String>,
    ) -> Self {
        Self {
            driver: driver.into(),
            host: host.into(),
            port,
            database: database.into(),
            username: String::new(),
            password: String::new(),
            ssl_mode: String::new(),
            connect_timeout_ms: 0,
            max_retries: 0,
        }
    }

    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = username.into();
        self.password = password.into();
        self
    }

    pub fn ssl_mode(mut self, mode: impl Into<String>) -> Self {
        self.ssl_mode = mode.into();
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Get the address string (host:port)
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Configured connect timeout as a duration; zero means unset
    pub fn raw_connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Connect timeout with the default applied
    pub fn effective_connect_timeout(&self) -> Duration {
        if self.connect_timeout_ms == 0 {
            DEFAULT_CONNECT_TIMEOUT
        } else {
            self.raw_connect_timeout()
        }
    }

    /// Attempt budget with the default applied
    pub fn effective_max_retries(&self) -> u32 {
        if self.max_retries == 0 {
            DEFAULT_MAX_RETRIES
        } else {
            self.max_retries
        }
    }
}

impl fmt::Debug for EndpointConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndpointConfig")
            .field("driver", &self.driver)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("password", &"***")
            .field("ssl_mode", &self.ssl_mode)
            .field("connect_timeout_ms", &self.connect_timeout_ms)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

// ============================================================================
// Pool Configuration
// ============================================================================

/// Pool limits shared by the leader and every follower
///
/// A zero field means "use the default" for that field only.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PoolConfig {
    #[serde(default = "default_max_open_conns")]
    pub max_open_conns: u32,
    #[serde(default = "default_max_idle_conns")]
    pub max_idle_conns: u32,
    /// Maximum connection lifetime (milliseconds)
    #[serde(default = "default_conn_max_lifetime_ms")]
    pub conn_max_lifetime_ms: u64,
    /// Maximum idle time before a pooled connection is closed (milliseconds)
    #[serde(default = "default_conn_max_idle_time_ms")]
    pub conn_max_idle_time_ms: u64,
}

fn default_max_open_conns() -> u32 {
    25
}

fn default_max_idle_conns() -> u32 {
    5
}

fn default_conn_max_lifetime_ms() -> u64 {
    5 * 60 * 1000
}

fn default_conn_max_idle_time_ms() -> u64 {
    60 * 1000
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_open_conns: default_max_open_conns(),
            max_idle_conns: default_max_idle_conns(),
            conn_max_lifetime_ms: default_conn_max_lifetime_ms(),
            conn_max_idle_time_ms: default_conn_max_idle_time_ms(),
        }
    }
}

impl PoolConfig {
    /// Replace zero-valued fields with their defaults
    pub fn resolved(&self) -> Self {
        let defaults = Self::default();
        Self {
            max_open_conns: non_zero(self.max_open_conns, defaults.max_open_conns),
            max_idle_conns: non_zero(self.max_idle_conns, defaults.max_idle_conns),
            conn_max_lifetime_ms: non_zero(self.conn_max_lifetime_ms, defaults.conn_max_lifetime_ms),
            conn_max_idle_time_ms: non_zero(
                self.conn_max_idle_time_ms,
                defaults.conn_max_idle_time_ms,
            ),
        }
    }

    pub fn conn_max_lifetime(&self) -> Duration {
        Duration::from_millis(self.conn_max_lifetime_ms)
    }

    pub fn conn_max_idle_time(&self) -> Duration {
        Duration::from_millis(self.conn_max_idle_time_ms)
    }
}

fn non_zero<T: Default + PartialEq>(value: T, fallback: T) -> T {
    if value == T::default() {
        fallback
    } else {
        value
    }
}

// ============================================================================
// Health Check Configuration
// ============================================================================

/// Health check configuration for the leader and followers
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HealthCheckConfig {
    /// Whether the background monitor runs
    #[serde(default = "default_health_enabled")]
    pub enabled: bool,
    /// Interval between probe cycles (milliseconds)
    #[serde(default = "default_check_interval_ms")]
    pub check_interval_ms: u64,
    /// Timeout for each probe (milliseconds)
    #[serde(default = "default_check_timeout_ms")]
    pub check_timeout_ms: u64,
}

fn default_health_enabled() -> bool {
    true
}

fn default_check_interval_ms() -> u64 {
    30_000
}

fn default_check_timeout_ms() -> u64 {
    5_000
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: default_health_enabled(),
            check_interval_ms: default_check_interval_ms(),
            check_timeout_ms: default_check_timeout_ms(),
        }
    }
}

impl HealthCheckConfig {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Probe cycle interval, defaulting when zero
    pub fn interval(&self) -> Duration {
        Duration::from_millis(non_zero(self.check_interval_ms, default_check_interval_ms()))
    }

    /// Per-probe timeout, defaulting when zero
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(non_zero(self.check_timeout_ms, default_check_timeout_ms()))
    }
}
