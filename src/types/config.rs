//! Configuration structures.
//!
//! Configuration is loaded from a JSON file and then overridden by
//! environment variables.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use super::errors::{Error, Result};

/// Environment variable overriding `server.listen_addr`.
pub const ENV_LISTEN_ADDR: &str = "REMOTING_LISTEN_ADDR";
/// Environment variable selecting JSON log output (`json`).
pub const ENV_LOG_FORMAT: &str = "REMOTING_LOG_FORMAT";

/// Global broker configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,

    /// Observability configuration.
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Transport configuration.
    #[serde(default)]
    pub transport: TransportConfig,
}

impl Config {
    /// Load configuration from a JSON file. Missing sections fall back to defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides on top of the loaded values.
    pub fn apply_env(&mut self) {
        if let Ok(addr) = std::env::var(ENV_LISTEN_ADDR) {
            if !addr.is_empty() {
                self.server.listen_addr = addr;
            }
        }
        if let Ok(format) = std::env::var(ENV_LOG_FORMAT) {
            self.observability.json_logs = format.eq_ignore_ascii_case("json");
        }
    }

    /// Reject values the transport cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.server.listen_addr.is_empty() {
            return Err(Error::validation("server.listen_addr must not be empty"));
        }
        if self.transport.max_frame_bytes < 2 {
            return Err(Error::validation(
                "transport.max_frame_bytes must cover the packet type field",
            ));
        }
        if self.transport.max_connections == 0 {
            return Err(Error::validation("transport.max_connections must be > 0"));
        }
        if self.transport.read_chunk_bytes == 0 {
            return Err(Error::validation("transport.read_chunk_bytes must be > 0"));
        }
        Ok(())
    }
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// TCP bind address.
    pub listen_addr: String,

    /// URL scheme used when advertising the broker address.
    pub scheme: String,
}

impl ServerConfig {
    /// Address reported in registry events, e.g. `tcp://127.0.0.1:65213`.
    pub fn advertised_address(&self) -> String {
        format!("{}://{}", self.scheme, self.listen_addr)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:65213".to_string(),
            scheme: "tcp".to_string(),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Tracing log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable JSON log formatting.
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}

/// Transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Maximum frame size in bytes (type field + body).
    pub max_frame_bytes: u32,

    /// Maximum concurrent peer connections. Connections beyond this limit
    /// are dropped at accept time.
    pub max_connections: usize,

    /// Size of each socket read handed to the broker.
    pub read_chunk_bytes: usize,

    /// Per-frame write timeout. Peers that cannot take a frame within this
    /// window are disconnected.
    #[serde(with = "humantime_serde")]
    pub write_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_frame_bytes: 16 * 1024 * 1024,
            max_connections: 1024,
            read_chunk_bytes: 16 * 1024,
            write_timeout: Duration::from_secs(10),
        }
    }
}
