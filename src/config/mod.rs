mod dsn;
mod schema;

pub use schema::*;

use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),
}

/// Load a database configuration from a TOML file.
///
/// The result is not validated; [`crate::Manager`] validates it before connecting.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<DatabaseConfig, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let config: DatabaseConfig = toml::from_str(&content)?;
    Ok(config)
}
