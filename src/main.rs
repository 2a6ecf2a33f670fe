use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tracing::{info, warn, Level};
use tracing_subscriber::EnvFilter;

use sqlkit::config::{self, DatabaseConfig, EndpointConfig};
use sqlkit::{Health, Manager};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(Level::INFO.into())
                .from_env_lossy(),
        )
        .init();

    let config = load_or_default_config(std::env::args().nth(1));
    let report_interval = config.health.interval();

    let manager = Manager::connect(config).await?;
    report(&manager.health());

    let mut ticker = tokio::time::interval(report_interval.max(Duration::from_secs(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                break;
            }
            _ = ticker.tick() => {
                manager.check_health_now().await;
                report(&manager.health());
            }
        }
    }

    manager.close().await?;
    print!("{}", sqlkit::metrics().gather());
    Ok(())
}

fn report(health: &Health) {
    info!(
        healthy = health.leader.healthy,
        response_time_ms = health.leader.response_time.as_millis() as u64,
        error = %health.leader.error,
        "leader"
    );
    for (index, follower) in health.followers.iter().enumerate() {
        info!(
            index,
            healthy = follower.healthy,
            response_time_ms = follower.response_time.as_millis() as u64,
            error = %follower.error,
            "follower"
        );
    }
}

fn load_or_default_config(arg: Option<String>) -> DatabaseConfig {
    let config_paths = arg
        .into_iter()
        .chain(["config/sqlkit.toml", "sqlkit.toml"].map(String::from));

    for path in config_paths {
        match config::load_config(&path) {
            Ok(config) => {
                info!(path = %path, "Loaded configuration");
                return config;
            }
            Err(e) => {
                warn!(path = %path, error = %e, "Failed to load config");
            }
        }
    }

    info!("Using default configuration");
    DatabaseConfig::new(default_leader())
}

#[cfg(feature = "sqlite")]
fn default_leader() -> EndpointConfig {
    EndpointConfig::new(config::DRIVER_SQLITE, "localhost", 0, "sqlkit.db")
}

#[cfg(not(feature = "sqlite"))]
fn default_leader() -> EndpointConfig {
    EndpointConfig::new("memory", "localhost", 0, "sqlkit")
}
