//! Server configuration from the environment

use rule_engine::engine::DEFAULT_MAX_CASCADE_DEPTH;
use std::net::SocketAddr;
use std::path::PathBuf;
use thiserror::Error;

/// Errors in startup configuration
#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    /// A variable is set but cannot be parsed
    #[error("Invalid value for {name}: {value:?}")]
    Invalid { name: &'static str, value: String },
}

/// Settings read once at startup
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub bind: SocketAddr,
    pub data_dir: PathBuf,
    pub max_cascade_depth: usize,
    /// Capacity of each leaf's outbound queue
    pub outbound_buffer: usize,
}

impl ServerConfig {
    #[allow(clippy::missing_errors_doc)]
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build a config from any variable lookup
    #[allow(clippy::missing_errors_doc)]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        Ok(Self {
            bind: parse(&lookup, "SENTINEL_BIND", SocketAddr::from(([0, 0, 0, 0], 3000)))?,
            data_dir: lookup("DATA_DIR").map_or_else(|| PathBuf::from("./data"), PathBuf::from),
            max_cascade_depth: parse(&lookup, "SENTINEL_MAX_CASCADE_DEPTH", DEFAULT_MAX_CASCADE_DEPTH)?,
            outbound_buffer: parse(&lookup, "SENTINEL_OUTBOUND_BUFFER", 64)?,
        })
    }
}

fn parse<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(name) {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value }),
    }
}
