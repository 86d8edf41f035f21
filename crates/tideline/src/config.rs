//! Daemon configuration from the environment.

use std::net::SocketAddr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing environment variable: {0}")]
    Missing(&'static str),
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, String),
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Node RPC endpoint.
    pub node_url: String,
    /// PostgreSQL connection string.
    pub db_url: String,
    /// Connection pool bound.
    pub db_max_conn: u32,
    /// Bind address for the /metrics endpoint.
    pub metrics_addr: SocketAddr,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let node_url =
            lookup("TIDELINE_NODE_URL").ok_or(ConfigError::Missing("TIDELINE_NODE_URL"))?;
        if !node_url.starts_with("http://") && !node_url.starts_with("https://") {
            return Err(ConfigError::Invalid(
                "TIDELINE_NODE_URL",
                "must start with http:// or https://".into(),
            ));
        }

        let db_url = lookup("TIDELINE_DB_URL").ok_or(ConfigError::Missing("TIDELINE_DB_URL"))?;

        let db_max_conn = match lookup("TIDELINE_DB_MAX_CONN") {
            None => 8,
            Some(raw) => raw
                .parse()
                .map_err(|_| ConfigError::Invalid("TIDELINE_DB_MAX_CONN", raw))?,
        };

        let metrics_addr = match lookup("TIDELINE_METRICS_ADDR") {
            None => SocketAddr::from(([127, 0, 0, 1], 8080)),
            Some(raw) => raw
                .parse()
                .map_err(|_| ConfigError::Invalid("TIDELINE_METRICS_ADDR", raw))?,
        };

        Ok(Self {
            node_url,
            db_url,
            db_max_conn,
            metrics_addr,
        })
    }
}
