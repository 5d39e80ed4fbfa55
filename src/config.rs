//! Runtime configuration
//!
//! Read from environment variables, with the bind address overridable by the
//! first command-line argument.

use std::env;
use std::time::Duration;

use crate::error::ConfigError;

/// Default host when neither `HUB_BIND_ADDR` nor `HOST` is set
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Default port when neither `HUB_BIND_ADDR` nor `PORT` is set
pub const DEFAULT_PORT: u16 = 8080;

/// Default per-connection outbound queue capacity
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Seconds without inbound frames before a connection is reaped
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 300;

/// Seconds between idle sweeps
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubConfig {
    /// Address the WebSocket listener binds to
    pub bind_addr: String,
    /// Envelopes each connection may have pending before drop-oldest kicks in
    pub queue_capacity: usize,
    /// `None` disables idle reaping (`HUB_IDLE_TIMEOUT_SECS=0`)
    pub idle_timeout: Option<Duration>,
    pub sweep_interval: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            bind_addr: format!("{}:{}", DEFAULT_HOST, DEFAULT_PORT),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            idle_timeout: Some(Duration::from_secs(DEFAULT_IDLE_TIMEOUT_SECS)),
            sweep_interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
        }
    }
}

impl HubConfig {
    /// Load from the process environment and arguments
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::from_lookup(|key| env::var(key).ok())?;
        if let Some(addr) = env::args().nth(1) {
            config.bind_addr = addr;
        }
        Ok(config)
    }

    /// Load using an arbitrary variable lookup
    ///
    /// `HUB_BIND_ADDR` wins over `HOST`/`PORT`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let bind_addr = match lookup("HUB_BIND_ADDR") {
            Some(addr) => addr,
            None => {
                let host = lookup("HOST").unwrap_or_else(|| DEFAULT_HOST.to_string());
                let port = match lookup("PORT") {
                    Some(value) => parse_var::<u16>("PORT", value)?,
                    None => DEFAULT_PORT,
                };
                format!("{}:{}", host, port)
            }
        };

        let queue_capacity = match lookup("HUB_QUEUE_CAPACITY") {
            Some(value) => parse_var::<usize>("HUB_QUEUE_CAPACITY", value)?,
            None => DEFAULT_QUEUE_CAPACITY,
        };
        if queue_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                key: "HUB_QUEUE_CAPACITY".to_string(),
                value: "0".to_string(),
            });
        }

        let idle_timeout = match lookup("HUB_IDLE_TIMEOUT_SECS") {
            Some(value) => parse_var::<u64>("HUB_IDLE_TIMEOUT_SECS", value)?,
            None => DEFAULT_IDLE_TIMEOUT_SECS,
        };

        let sweep_interval = match lookup("HUB_SWEEP_INTERVAL_SECS") {
            Some(value) => parse_var::<u64>("HUB_SWEEP_INTERVAL_SECS", value)?,
            None => DEFAULT_SWEEP_INTERVAL_SECS,
        };
        if sweep_interval == 0 {
            return Err(ConfigError::InvalidValue {
                key: "HUB_SWEEP_INTERVAL_SECS".to_string(),
                value: "0".to_string(),
            });
        }

        Ok(Self {
            bind_addr,
            queue_capacity,
            idle_timeout: (idle_timeout > 0).then(|| Duration::from_secs(idle_timeout)),
            sweep_interval: Duration::from_secs(sweep_interval),
        })
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, value: String) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value,
    })
}
