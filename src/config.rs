//! Server Configuration
//!
//! Defaults suit a single-node deployment; every field can be overridden
//! through `TANDEM_*` environment variables.

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

/// Environment variable for the listen address.
pub const ENV_BIND_ADDR: &str = "TANDEM_BIND_ADDR";
/// Environment variable for the connection limit.
pub const ENV_MAX_CONNECTIONS: &str = "TANDEM_MAX_CONNECTIONS";
/// Environment variable for the per-client outbound queue size.
pub const ENV_CHANNEL_CAPACITY: &str = "TANDEM_CHANNEL_CAPACITY";
/// Environment variable for the WebSocket message size cap.
pub const ENV_MAX_MESSAGE_SIZE: &str = "TANDEM_MAX_MESSAGE_SIZE";
/// Environment variable for the statistics log interval.
pub const ENV_STATS_INTERVAL_SECS: &str = "TANDEM_STATS_INTERVAL_SECS";
/// Environment variable for the comma-separated chat blocklist.
pub const ENV_BLOCKED_WORDS: &str = "TANDEM_BLOCKED_WORDS";
/// Environment variable for the moderation strike limit.
pub const ENV_MODERATION_STRIKES: &str = "TANDEM_MODERATION_STRIKES";

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// An environment variable could not be parsed.
    #[error("{var}: cannot parse {value:?}")]
    Unparseable {
        /// Variable name.
        var: &'static str,
        /// Raw value.
        value: String,
    },

    /// A value is outside its accepted range.
    #[error("{field} {reason}")]
    OutOfRange {
        /// Field name.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Outbound messages buffered per client before deliveries are dropped.
    pub channel_capacity: usize,
    /// Largest accepted WebSocket message in bytes.
    pub max_message_size: usize,
    /// How often to log relay statistics. Zero disables the log.
    pub stats_interval: Duration,
    /// Words that cause a chat message to be blocked.
    pub blocked_words: Vec<String>,
    /// Blocked messages before the sender is disconnected. Zero never disconnects.
    pub moderation_strikes: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            max_connections: 10_000,
            channel_capacity: 256,
            max_message_size: 64 * 1024,
            stats_interval: Duration::from_secs(60),
            blocked_words: Vec::new(),
            moderation_strikes: 3,
        }
    }
}

impl ServerConfig {
    /// Defaults overridden by environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each variable.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(addr) = parse_var(&lookup, ENV_BIND_ADDR)? {
            config.bind_addr = addr;
        }
        if let Some(max) = parse_var(&lookup, ENV_MAX_CONNECTIONS)? {
            config.max_connections = max;
        }
        if let Some(capacity) = parse_var(&lookup, ENV_CHANNEL_CAPACITY)? {
            config.channel_capacity = capacity;
        }
        if let Some(size) = parse_var(&lookup, ENV_MAX_MESSAGE_SIZE)? {
            config.max_message_size = size;
        }
        if let Some(secs) = parse_var::<u64, _>(&lookup, ENV_STATS_INTERVAL_SECS)? {
            config.stats_interval = Duration::from_secs(secs);
        }
        if let Some(words) = lookup(ENV_BLOCKED_WORDS) {
            config.blocked_words = words
                .split(',')
                .map(str::trim)
                .filter(|w| !w.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(strikes) = parse_var(&lookup, ENV_MODERATION_STRIKES)? {
            config.moderation_strikes = strikes;
        }

        Ok(config)
    }

    /// Check every field is within its accepted range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_connections == 0 {
            return Err(out_of_range("max_connections", "must be greater than 0"));
        }
        if self.max_connections > 1_000_000 {
            return Err(out_of_range("max_connections", "exceeds 1,000,000"));
        }

        if self.channel_capacity == 0 {
            return Err(out_of_range("channel_capacity", "must be greater than 0"));
        }
        if self.channel_capacity > 65_536 {
            return Err(out_of_range("channel_capacity", "exceeds 65,536"));
        }

        // SDP offers routinely run to several kilobytes.
        if self.max_message_size < 1024 {
            return Err(out_of_range("max_message_size", "must be at least 1024 bytes"));
        }
        if self.max_message_size > 16 * 1024 * 1024 {
            return Err(out_of_range("max_message_size", "exceeds 16 MiB"));
        }

        if self.stats_interval > Duration::from_secs(86_400) {
            return Err(out_of_range("stats_interval", "exceeds one day"));
        }

        if self.moderation_strikes > 1000 {
            return Err(out_of_range("moderation_strikes", "exceeds 1000"));
        }

        Ok(())
    }
}

fn parse_var<T, F>(lookup: &F, var: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    let Some(value) = lookup(var) else {
        return Ok(None);
    };
    let parsed = value.trim().parse::<T>();
    match parsed {
        Ok(v) => Ok(Some(v)),
        Err(_) => Err(ConfigError::Unparseable { var, value }),
    }
}

fn out_of_range(field: &'static str, reason: &str) -> ConfigError {
    ConfigError::OutOfRange {
        field,
        reason: reason.to_string(),
    }
}
