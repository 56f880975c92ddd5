// src/config.rs

//! Manages engine configuration: loading from TOML, defaults, and validation.

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;
use tracing::warn;

/// Tunables for the connection engine itself.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// How long `connect` waits for the TCP handshake before giving up.
    #[serde(with = "humantime_serde", default = "default_connect_timeout")]
    pub connect_timeout: Duration,
    /// Upper bound for a single write (including flush) on a live connection.
    #[serde(with = "humantime_serde", default = "default_send_timeout")]
    pub send_timeout: Duration,
    /// The fixed delay between two writes of a keep-send task.
    #[serde(with = "humantime_serde", default = "default_keep_send_interval")]
    pub keep_send_interval: Duration,
    /// How long a disconnect waits for the receive loop and send task to stop
    /// before aborting them.
    #[serde(with = "humantime_serde", default = "default_close_grace")]
    pub close_grace: Duration,
    /// Size of the buffer used by each receive loop for a single read.
    #[serde(default = "default_read_buffer_size")]
    pub read_buffer_size: usize,
    #[serde(default = "default_true")]
    pub tcp_nodelay: bool,
    /// Enables `SO_KEEPALIVE` on every established socket.
    #[serde(default = "default_true")]
    pub tcp_keepalive: bool,
    /// The port used when a caller supplies a bare host.
    #[serde(default = "default_port")]
    pub default_port: u16,
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(1)
}
fn default_send_timeout() -> Duration {
    Duration::from_secs(5)
}
fn default_keep_send_interval() -> Duration {
    Duration::from_secs(1)
}
fn default_close_grace() -> Duration {
    Duration::from_millis(500)
}
fn default_read_buffer_size() -> usize {
    8192 // 8 KB
}
fn default_true() -> bool {
    true
}
fn default_port() -> u16 {
    2001
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            connect_timeout: default_connect_timeout(),
            send_timeout: default_send_timeout(),
            keep_send_interval: default_keep_send_interval(),
            close_grace: default_close_grace(),
            read_buffer_size: default_read_buffer_size(),
            tcp_nodelay: default_true(),
            tcp_keepalive: default_true(),
            default_port: default_port(),
        }
    }
}

/// A raw representation of the config file before validation.
#[derive(Deserialize)]
struct RawConfig {
    #[serde(default = "default_log_level")]
    log_level: String,
    #[serde(default)]
    engine: EngineConfig,
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Represents the final, validated configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub log_level: String,
    #[serde(default)]
    pub engine: EngineConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            engine: EngineConfig::default(),
        }
    }
}

impl Config {
    /// Creates a new `Config` instance by reading and parsing a TOML file.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file at '{path}'"))?;
        Self::from_toml_str(&contents)
            .with_context(|| format!("Invalid configuration in '{path}'"))
    }

    /// Parses and validates a configuration from TOML text.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let raw_config: RawConfig =
            toml::from_str(contents).context("Failed to parse TOML configuration")?;

        let config = Config {
            log_level: raw_config.log_level,
            engine: raw_config.engine,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration to ensure logical consistency.
    pub fn validate(&self) -> Result<()> {
        if self.log_level.trim().is_empty() {
            return Err(anyhow!("log_level cannot be empty"));
        }
        self.engine.validate()
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.connect_timeout.is_zero() {
            return Err(anyhow!("engine.connect_timeout cannot be 0"));
        }
        if self.send_timeout.is_zero() {
            return Err(anyhow!("engine.send_timeout cannot be 0"));
        }
        if self.keep_send_interval.is_zero() {
            return Err(anyhow!("engine.keep_send_interval cannot be 0"));
        }
        if self.read_buffer_size == 0 {
            return Err(anyhow!("engine.read_buffer_size cannot be 0"));
        }
        if self.default_port == 0 {
            return Err(anyhow!("engine.default_port cannot be 0"));
        }
        if self.close_grace.is_zero() {
            warn!(
                "engine.close_grace is 0: disconnect will abort in-flight sends immediately."
            );
        }
        Ok(())
    }
}

impl EngineConfig {
    /// Splits `host[:port]` into its parts, falling back to `default_port`.
    /// IPv6 literals with a port must be bracketed (`[::1]:2001`).
    pub fn parse_address(&self, address: &str) -> Result<(String, u16)> {
        let address = address.trim();
        if address.is_empty() {
            return Err(anyhow!("address cannot be empty"));
        }

        let (host, port) = if let Some(rest) = address.strip_prefix('[') {
            let (host, tail) = rest
                .split_once(']')
                .ok_or_else(|| anyhow!("unterminated '[' in address '{address}'"))?;
            match tail {
                "" => (host, None),
                _ => match tail.strip_prefix(':') {
                    Some(port) => (host, Some(port)),
                    None => return Err(anyhow!("unexpected text after ']' in '{address}'")),
                },
            }
        } else {
            match address.split_once(':') {
                // More than one colon: a bare IPv6 literal.
                Some((_, rest)) if rest.contains(':') => (address, None),
                Some((host, port)) => (host, Some(port)),
                None => (address, None),
            }
        };

        if host.is_empty() {
            return Err(anyhow!("host cannot be empty in '{address}'"));
        }
        let port = match port {
            Some(p) => p
                .parse::<u16>()
                .ok()
                .filter(|p| *p != 0)
                .ok_or_else(|| anyhow!("invalid port '{p}' in '{address}'"))?,
            None => self.default_port,
        };
        Ok((host.to_string(), port))
    }
}
