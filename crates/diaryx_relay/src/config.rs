use std::env;
use std::time::Duration;

use thiserror::Error;

/// How long an empty session is kept before the idle reaper removes it.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5 * 60);

/// Interval between server-initiated WebSocket pings.
pub const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// Frames buffered per connection before it is considered too slow.
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 256;

/// Relay configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Server host (default: 0.0.0.0)
    pub host: String,
    /// Server port (default: 1234)
    pub port: u16,
    /// Idle time before an empty session is discarded
    pub grace_period: Duration,
    /// Ping interval; a connection that misses one full interval is closed
    pub keepalive_interval: Duration,
    /// Per-connection outbound queue bound
    pub outbound_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 1234,
            grace_period: DEFAULT_GRACE_PERIOD,
            keepalive_interval: DEFAULT_KEEPALIVE_INTERVAL,
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let host = env::var("HOST").ok();
        let port = env::var("PORT").ok();
        Self::from_vars(host.as_deref(), port.as_deref())
    }

    fn from_vars(host: Option<&str>, port: Option<&str>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let host = host
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .map(String::from)
            .unwrap_or(defaults.host);

        let port = match port {
            Some(raw) => raw
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidPort(raw.to_string()))?,
            None => defaults.port,
        };

        Ok(Config {
            host,
            port,
            ..defaults
        })
    }

    /// Get the server address
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid PORT environment variable: '{0}'")]
    InvalidPort(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_when_unset() {
        let config = Config::from_vars(None, None).unwrap();
        assert_eq!(config.server_addr(), "0.0.0.0:1234");
        assert_eq!(config.grace_period, DEFAULT_GRACE_PERIOD);
        assert_eq!(config.outbound_capacity, DEFAULT_OUTBOUND_CAPACITY);
    }

    #[test]
    fn test_port_override() {
        let config = Config::from_vars(Some("127.0.0.1"), Some(" 8080 ")).unwrap();
        assert_eq!(config.server_addr(), "127.0.0.1:8080");
    }

    #[test]
    fn test_invalid_port() {
        let err = Config::from_vars(None, Some("http")).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidPort(ref p) if p == "http"));
    }

    #[test]
    fn test_blank_host_falls_back() {
        let config = Config::from_vars(Some("  "), None).unwrap();
        assert_eq!(config.host, "0.0.0.0");
    }
}
