//! Server configuration.
//!
//! The relay has two operator-facing settings, host and port. They are
//! resolved in order: command-line flag, environment variable, default.

use std::env;
use std::time::Duration;

use thiserror::Error;

/// Default bind host
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default bind port
pub const DEFAULT_PORT: u16 = 5000;

/// Default bound on a single write to a client
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Environment variable overriding the bind host
pub const HOST_ENV: &str = "RELAY_HOST";

/// Environment variable overriding the bind port
pub const PORT_ENV: &str = "RELAY_PORT";

/// Runtime configuration for `RelayServer`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    /// Host name or IP address to bind
    pub host: String,

    /// TCP port to bind (0 picks an ephemeral port)
    pub port: u16,

    /// Bound on a single line write before the recipient is evicted
    pub write_timeout: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self::new(DEFAULT_HOST, DEFAULT_PORT)
    }
}

impl RelayConfig {
    /// Creates a configuration with the default write timeout.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
        }
    }

    /// Builds a configuration from `RELAY_HOST` / `RELAY_PORT`.
    ///
    /// # Errors
    ///
    /// - `ConfigError::InvalidPort` if `RELAY_PORT` is not a valid port
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds a configuration from an arbitrary variable lookup.
    fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(host) = lookup(HOST_ENV).filter(|h| !h.trim().is_empty()) {
            config.host = host.trim().to_string();
        }

        if let Some(value) = lookup(PORT_ENV) {
            config.port = value
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidPort { value })?;
        }

        Ok(config)
    }

    /// Applies command-line overrides on top of this configuration.
    pub fn with_overrides(mut self, host: Option<String>, port: Option<u16>) -> Self {
        if let Some(host) = host {
            self.host = host;
        }
        if let Some(port) = port {
            self.port = port;
        }
        self
    }

    /// Sets the write timeout.
    pub fn with_write_timeout(mut self, write_timeout: Duration) -> Self {
        self.write_timeout = write_timeout;
        self
    }

    /// Renders the bind address as `host:port`, bracketing IPv6 hosts.
    pub fn bind_addr(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

/// Errors from building a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("Invalid port in RELAY_PORT: {value:?}")]
    InvalidPort { value: String },
}
