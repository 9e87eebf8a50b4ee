//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.

use serde::de::Error;
use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::error::{BridgeError, Result};

/// Main configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub serial: SerialConfig,

    #[serde(default)]
    pub udp: UdpConfig,

    #[serde(default)]
    pub framer: FramerConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Serial port configuration
#[derive(Debug, Deserialize, Clone)]
pub struct SerialConfig {
    #[serde(default = "default_serial_port")]
    pub port: String,

    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    /// Size of a single read from the port
    #[serde(default = "default_read_buffer_size")]
    pub read_buffer_size: usize,

    /// Datagrams from the UDP peer waiting to be written; more are dropped
    #[serde(default = "default_write_queue_size")]
    pub write_queue_size: usize,
}

/// UDP endpoint configuration
#[derive(Debug, Deserialize, Clone)]
pub struct UdpConfig {
    #[serde(default = "default_udp_host")]
    pub host: String,

    #[serde(default = "default_udp_port")]
    pub port: u16,

    /// Local address to bind, e.g. "0.0.0.0:0". Unset binds the unspecified
    /// address of the peer's family on an ephemeral port.
    #[serde(default)]
    pub bind_address: Option<String>,

    /// A connection that lived longer than this restarts backoff at 2 s
    #[serde(default = "default_stable_after_secs")]
    pub stable_after_secs: u64,

    /// Upper bound of a single receive wait in the receive loop
    #[serde(default = "default_recv_poll_interval_ms")]
    pub recv_poll_interval_ms: u64,
}

/// Framer configuration
#[derive(Debug, Deserialize, Clone)]
pub struct FramerConfig {
    #[serde(default = "default_frame_timeout_ms")]
    pub frame_timeout_ms: u64,
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Optional log file; logs go to stdout when unset
    #[serde(default)]
    pub file: Option<String>,
}

// Default value functions
fn default_serial_port() -> String { "/dev/ttyUSB0".to_string() }
fn default_baud_rate() -> u32 { 115200 }
fn default_read_buffer_size() -> usize { 256 }
fn default_write_queue_size() -> usize { 64 }

fn default_udp_host() -> String { "localhost".to_string() }
fn default_udp_port() -> u16 { 33005 }
fn default_stable_after_secs() -> u64 { 30 }
fn default_recv_poll_interval_ms() -> u64 { 10 }

fn default_frame_timeout_ms() -> u64 { 1000 }

fn default_log_level() -> String { "info".to_string() }

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: default_serial_port(),
            baud_rate: default_baud_rate(),
            read_buffer_size: default_read_buffer_size(),
            write_queue_size: default_write_queue_size(),
        }
    }
}

impl Default for UdpConfig {
    fn default() -> Self {
        Self {
            host: default_udp_host(),
            port: default_udp_port(),
            bind_address: None,
            stable_after_secs: default_stable_after_secs(),
            recv_poll_interval_ms: default_recv_poll_interval_ms(),
        }
    }
}

impl Default for FramerConfig {
    fn default() -> Self {
        Self {
            frame_timeout_ms: default_frame_timeout_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

fn invalid(message: impl std::fmt::Display) -> BridgeError {
    BridgeError::Config(toml::de::Error::custom(message))
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use sn_bridge::config::Config;
    ///
    /// let config = Config::load("config/default.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Parse and validate configuration from a TOML string
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns error if any configuration value is out of valid range
    pub fn validate(&self) -> Result<()> {
        if self.serial.port.is_empty() {
            return Err(invalid("serial port cannot be empty"));
        }

        if self.serial.baud_rate == 0 {
            return Err(invalid("baud_rate must be greater than 0"));
        }

        if self.serial.read_buffer_size == 0 || self.serial.read_buffer_size > 4096 {
            return Err(invalid("read_buffer_size must be between 1 and 4096"));
        }

        if self.serial.write_queue_size == 0 || self.serial.write_queue_size > 4096 {
            return Err(invalid("write_queue_size must be between 1 and 4096"));
        }

        if self.udp.host.is_empty() {
            return Err(invalid("udp host cannot be empty"));
        }

        if self.udp.port == 0 {
            return Err(invalid("udp port must be between 1 and 65535"));
        }

        if let Some(bind) = &self.udp.bind_address {
            if bind.parse::<std::net::SocketAddr>().is_err() {
                return Err(invalid(format!("bind_address '{}' is not a socket address", bind)));
            }
        }

        if self.udp.stable_after_secs == 0 || self.udp.stable_after_secs > 86400 {
            return Err(invalid("stable_after_secs must be between 1 and 86400"));
        }

        if self.udp.recv_poll_interval_ms == 0 || self.udp.recv_poll_interval_ms > 1000 {
            return Err(invalid("recv_poll_interval_ms must be between 1 and 1000"));
        }

        if self.framer.frame_timeout_ms == 0 || self.framer.frame_timeout_ms > 60000 {
            return Err(invalid("frame_timeout_ms must be between 1 and 60000"));
        }

        if !["trace", "debug", "info", "warn", "error"].contains(&self.logging.level.as_str()) {
            return Err(invalid("log level must be one of: trace, debug, info, warn, error"));
        }

        Ok(())
    }
}
