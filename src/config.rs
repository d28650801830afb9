//! Session configuration
//!
//! Connection parameters and session tuning, loadable from JSON:
//!
//! ```json
//! {
//!   "connection": { "type": "tcp", "host": "192.168.1.50", "port": 2323 },
//!   "read_timeout_ms": 500,
//!   "cache_duration_secs": 60,
//!   "packet_logging": false
//! }
//! ```
//!
//! Every field except `connection` has a default.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{ThzError, ThzResult};
use crate::transport::{KeepaliveSettings, SerialTransport, TcpTransport, ThzTransport};
use crate::utils::validation;
use crate::{DEFAULT_BAUD_RATE, DEFAULT_CACHE_DURATION, DEFAULT_READ_TIMEOUT_MS, DEFAULT_TCP_PORT};

fn default_baud_rate() -> u32 {
    DEFAULT_BAUD_RATE
}

fn default_port() -> u16 {
    DEFAULT_TCP_PORT
}

fn default_read_timeout_ms() -> u64 {
    DEFAULT_READ_TIMEOUT_MS
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}

fn default_poll_interval_ms() -> u64 {
    20
}

fn default_cache_duration_secs() -> u64 {
    DEFAULT_CACHE_DURATION.as_secs()
}

/// How to reach the heat pump
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConnectionConfig {
    /// Directly attached serial device
    Serial {
        device: String,
        #[serde(default = "default_baud_rate")]
        baud_rate: u32,
    },
    /// Serial-to-network bridge
    Tcp {
        host: String,
        #[serde(default = "default_port")]
        port: u16,
    },
}

/// TCP keepalive parameters, in seconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeepaliveConfig {
    pub idle_secs: u64,
    pub interval_secs: u64,
    pub retries: u32,
}

impl Default for KeepaliveConfig {
    fn default() -> Self {
        Self {
            idle_secs: 60,
            interval_secs: 10,
            retries: 6,
        }
    }
}

impl From<KeepaliveConfig> for KeepaliveSettings {
    fn from(config: KeepaliveConfig) -> Self {
        Self {
            idle: Duration::from_secs(config.idle_secs),
            interval: Duration::from_secs(config.interval_secs),
            retries: config.retries,
        }
    }
}

/// Complete configuration of a device session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    pub connection: ConnectionConfig,
    /// Time allowed for a complete response telegram
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Longest single wait for incoming bytes
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// How long a read block is served from cache
    #[serde(default = "default_cache_duration_secs")]
    pub cache_duration_secs: u64,
    #[serde(default)]
    pub keepalive: KeepaliveConfig,
    /// Log every telegram as hex through `tracing`
    #[serde(default)]
    pub packet_logging: bool,
    /// Use this register map instead of the one matching the reported firmware
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub firmware_override: Option<String>,
}

impl SessionConfig {
    fn with_connection(connection: ConnectionConfig) -> Self {
        Self {
            connection,
            read_timeout_ms: default_read_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            cache_duration_secs: default_cache_duration_secs(),
            keepalive: KeepaliveConfig::default(),
            packet_logging: false,
            firmware_override: None,
        }
    }

    /// Serial configuration with defaults
    pub fn serial<S: Into<String>>(device: S, baud_rate: u32) -> Self {
        Self::with_connection(ConnectionConfig::Serial {
            device: device.into(),
            baud_rate,
        })
    }

    /// TCP configuration with defaults
    pub fn tcp<S: Into<String>>(host: S, port: u16) -> Self {
        Self::with_connection(ConnectionConfig::Tcp {
            host: host.into(),
            port,
        })
    }

    /// Parse and validate a JSON configuration
    pub fn from_json_str(json: &str) -> ThzResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON configuration file
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> ThzResult<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            ThzError::configuration(format!("Cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&json)
    }

    /// Check the configuration for values the session cannot work with
    pub fn validate(&self) -> ThzResult<()> {
        match &self.connection {
            ConnectionConfig::Serial { device, baud_rate } => {
                if device.trim().is_empty() {
                    return Err(ThzError::configuration("Serial device must not be empty"));
                }
                validation::validate_baud_rate(*baud_rate)?;
            }
            ConnectionConfig::Tcp { host, port } => {
                if host.trim().is_empty() {
                    return Err(ThzError::configuration("TCP host must not be empty"));
                }
                if *port == 0 {
                    return Err(ThzError::configuration("TCP port must not be 0"));
                }
            }
        }

        validation::validate_duration_ms("read_timeout_ms", self.read_timeout_ms)?;
        validation::validate_duration_ms("connect_timeout_ms", self.connect_timeout_ms)?;
        validation::validate_duration_ms("poll_interval_ms", self.poll_interval_ms)?;
        if self.poll_interval_ms > self.read_timeout_ms {
            return Err(ThzError::configuration(format!(
                "poll_interval_ms ({}) must not exceed read_timeout_ms ({})",
                self.poll_interval_ms, self.read_timeout_ms
            )));
        }
        Ok(())
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn cache_duration(&self) -> Duration {
        Duration::from_secs(self.cache_duration_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Build the configured transport, not yet opened
    pub fn build_transport(&self) -> Box<dyn ThzTransport> {
        match &self.connection {
            ConnectionConfig::Serial { device, baud_rate } => Box::new(
                SerialTransport::new(device.as_str(), *baud_rate)
                    .with_poll_interval(self.poll_interval())
                    .with_packet_logging(self.packet_logging),
            ),
            ConnectionConfig::Tcp { host, port } => Box::new(
                TcpTransport::new(host.as_str(), *port)
                    .with_connect_timeout(Duration::from_millis(self.connect_timeout_ms))
                    .with_poll_interval(self.poll_interval())
                    .with_keepalive(self.keepalive.into())
                    .with_packet_logging(self.packet_logging),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tcp_defaults() {
        let config = SessionConfig::from_json_str(
            r#"{"connection": {"type": "tcp", "host": "192.168.1.50"}}"#,
        )
        .unwrap();
        assert_eq!(
            config.connection,
            ConnectionConfig::Tcp {
                host: "192.168.1.50".to_string(),
                port: 2323
            }
        );
        assert_eq!(config.read_timeout(), Duration::from_millis(500));
        assert_eq!(config.cache_duration(), Duration::from_secs(60));
        assert_eq!(config.keepalive, KeepaliveConfig::default());
        assert!(config.firmware_override.is_none());
    }

    #[test]
    fn test_serial_config() {
        let config = SessionConfig::from_json_str(
            r#"{
                "connection": {"type": "serial", "device": "/dev/ttyUSB0"},
                "cache_duration_secs": 30,
                "firmware_override": "539technician"
            }"#,
        )
        .unwrap();
        assert_eq!(
            config.connection,
            ConnectionConfig::Serial {
                device: "/dev/ttyUSB0".to_string(),
                baud_rate: 115_200
            }
        );
        assert_eq!(config.cache_duration(), Duration::from_secs(30));
        assert_eq!(config.firmware_override.as_deref(), Some("539technician"));
    }

    #[test]
    fn test_invalid_configs() {
        assert!(SessionConfig::from_json_str(r#"{"connection": {"type": "carrier-pigeon"}}"#).is_err());
        assert!(SessionConfig::tcp("", 2323).validate().is_err());
        assert!(SessionConfig::tcp("localhost", 0).validate().is_err());
        assert!(SessionConfig::serial("/dev/ttyUSB0", 1234).validate().is_err());

        let mut config = SessionConfig::tcp("localhost", 2323);
        config.poll_interval_ms = 1_000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_build_transport() {
        let transport = SessionConfig::tcp("thz.local", 4000).build_transport();
        assert_eq!(transport.endpoint(), "thz.local:4000");

        let transport = SessionConfig::serial("/dev/ttyACM0", 57_600).build_transport();
        assert_eq!(transport.endpoint(), "/dev/ttyACM0");
    }
}
