//! Prometheus metrics for sqlkit
//!
//! Collected in a process-wide registry. Nothing here serves HTTP; callers
//! expose [`Metrics::gather`] however they like.

use prometheus::{
    HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGaugeVec, Opts, Registry,
};
use std::sync::OnceLock;

use crate::config::EndpointRole;

/// Global metrics registry
static METRICS: OnceLock<Metrics> = OnceLock::new();

/// Get the global metrics instance
pub fn metrics() -> &'static Metrics {
    METRICS.get_or_init(Metrics::new)
}

/// Transaction flavour label
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionKind {
    ReadWrite,
    ReadOnly,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::ReadWrite => "read_write",
            TransactionKind::ReadOnly => "read_only",
        }
    }
}

/// sqlkit metrics collection
pub struct Metrics {
    /// Registry for all metrics
    pub registry: Registry,

    // Connection metrics
    /// Connect attempts by endpoint kind and result
    pub connect_attempts_total: IntCounterVec,

    // Health check metrics
    /// Health probes by endpoint and result
    pub health_check_total: IntCounterVec,
    /// Probe round-trip time (in seconds)
    pub health_check_duration_seconds: HistogramVec,
    /// 1 if the endpoint's last probe passed
    pub endpoint_healthy: IntGaugeVec,

    // Routing metrics
    /// Follower reads served by the leader because no follower was healthy
    pub follower_fallback_total: IntCounter,

    // Transaction metrics
    /// Finished transactions by kind and outcome
    pub transactions_total: IntCounterVec,
}

impl Metrics {
    /// Create a new metrics collection
    pub fn new() -> Self {
        let registry = Registry::new();

        let connect_attempts_total = IntCounterVec::new(
            Opts::new(
                "sqlkit_connect_attempts_total",
                "Total number of connection attempts by result",
            ),
            &["role", "result"], // leader/follower, success/failure
        )
        .expect("valid metric definition");

        let health_check_total = IntCounterVec::new(
            Opts::new(
                "sqlkit_health_check_total",
                "Total number of health checks by result",
            ),
            &["endpoint", "result"], // success, failure, timeout
        )
        .expect("valid metric definition");

        let health_check_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "sqlkit_health_check_duration_seconds",
                "Health check round-trip time in seconds",
            )
            .buckets(vec![
                0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0,
            ]),
            &["endpoint"],
        )
        .expect("valid metric definition");

        let endpoint_healthy = IntGaugeVec::new(
            Opts::new(
                "sqlkit_endpoint_healthy",
                "Whether the endpoint passed its last health check",
            ),
            &["endpoint"],
        )
        .expect("valid metric definition");

        let follower_fallback_total = IntCounter::new(
            "sqlkit_follower_fallback_total",
            "Total number of follower reads routed to the leader",
        )
        .expect("valid metric definition");

        let transactions_total = IntCounterVec::new(
            Opts::new(
                "sqlkit_transactions_total",
                "Total number of finished transactions by outcome",
            ),
            &["kind", "outcome"],
        )
        .expect("valid metric definition");

        // Register all metrics
        for collector in [
            Box::new(connect_attempts_total.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(health_check_total.clone()),
            Box::new(health_check_duration_seconds.clone()),
            Box::new(endpoint_healthy.clone()),
            Box::new(follower_fallback_total.clone()),
            Box::new(transactions_total.clone()),
        ] {
            registry
                .register(collector)
                .expect("metric names are unique");
        }

        Self {
            registry,
            connect_attempts_total,
            health_check_total,
            health_check_duration_seconds,
            endpoint_healthy,
            follower_fallback_total,
            transactions_total,
        }
    }

    /// Record one connection attempt
    pub fn record_connect_attempt(&self, role: EndpointRole, success: bool) {
        let result = if success { "success" } else { "failure" };
        self.connect_attempts_total
            .with_label_values(&[role.kind(), result])
            .inc();
    }

    /// Record a health check result
    pub fn record_health_check(&self, role: EndpointRole, result: &str, duration_secs: f64) {
        let endpoint = role.label();
        self.health_check_total
            .with_label_values(&[&endpoint, result])
            .inc();
        self.health_check_duration_seconds
            .with_label_values(&[&endpoint])
            .observe(duration_secs);
    }

    /// Publish an endpoint's current health
    pub fn set_endpoint_healthy(&self, role: EndpointRole, healthy: bool) {
        self.endpoint_healthy
            .with_label_values(&[&role.label()])
            .set(i64::from(healthy));
    }

    /// Record a follower read that fell back to the leader
    pub fn record_follower_fallback(&self) {
        self.follower_fallback_total.inc();
    }

    /// Record how a transaction finished
    pub fn record_transaction(&self, kind: TransactionKind, outcome: &str) {
        self.transactions_total
            .with_label_values(&[kind.as_str(), outcome])
            .inc();
    }

    /// Get metrics as Prometheus text format
    pub fn gather(&self) -> String {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            tracing::warn!(error = %e, "Failed to encode metrics");
        }
        String::from_utf8_lossy(&buffer).into_owned()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
