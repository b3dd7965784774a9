// src/config.rs

//! Connection configuration: the descriptor a host passes to `create_client`,
//! and the TOML file the command-line tool reads.

use crate::core::BridgeError;
use crate::core::logging::Level;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::time::Duration;
use tracing::warn;

/// One server endpoint.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct NodeAddress {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Whether and how the connection is encrypted.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum TlsMode {
    #[default]
    NoTls,
    /// TLS with certificates verified against the bundled web PKI roots.
    SecureTls,
    /// TLS without certificate verification. For testing only.
    InsecureTls,
}

/// The protocol version requested during the handshake.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolVersion {
    #[default]
    Resp2,
    Resp3,
}

/// Credentials sent with `AUTH` or `HELLO`.
#[derive(Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct AuthenticationInfo {
    #[serde(default)]
    pub username: Option<String>,
    pub password: String,
}

impl fmt::Debug for AuthenticationInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthenticationInfo")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Everything needed to open one client.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ConnectionSpec {
    /// Tried in order; the first reachable address is used.
    pub addresses: Vec<NodeAddress>,
    #[serde(default)]
    pub tls_mode: TlsMode,
    #[serde(with = "humantime_serde", default = "default_connection_timeout")]
    pub connection_timeout: Duration,
    /// Per-request deadline. `0s` disables it.
    #[serde(with = "humantime_serde", default = "default_request_timeout")]
    pub request_timeout: Duration,
    /// Worker threads of the client's I/O runtime.
    #[serde(default = "default_io_threads")]
    pub io_threads: usize,
    /// Threads that run completion callbacks.
    #[serde(default = "default_delivery_workers")]
    pub delivery_workers: usize,
    #[serde(default)]
    pub database_id: u32,
    #[serde(default)]
    pub client_name: Option<String>,
    #[serde(default)]
    pub authentication: Option<AuthenticationInfo>,
    #[serde(default)]
    pub protocol: ProtocolVersion,
}

fn default_port() -> u16 {
    6379
}
fn default_connection_timeout() -> Duration {
    Duration::from_secs(2)
}
fn default_request_timeout() -> Duration {
    Duration::from_millis(250)
}
fn default_io_threads() -> usize {
    2
}
fn default_delivery_workers() -> usize {
    2
}
fn default_log_level() -> Level {
    Level::Info
}

impl Default for ConnectionSpec {
    fn default() -> Self {
        Self {
            addresses: vec![NodeAddress {
                host: "127.0.0.1".to_string(),
                port: default_port(),
            }],
            tls_mode: TlsMode::default(),
            connection_timeout: default_connection_timeout(),
            request_timeout: default_request_timeout(),
            io_threads: default_io_threads(),
            delivery_workers: default_delivery_workers(),
            database_id: 0,
            client_name: None,
            authentication: None,
            protocol: ProtocolVersion::default(),
        }
    }
}

impl ConnectionSpec {
    /// Parses the JSON descriptor passed across the C ABI.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, BridgeError> {
        let spec: ConnectionSpec = serde_json::from_slice(bytes)?;
        spec.validate()?;
        Ok(spec)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, BridgeError> {
        let spec: ConnectionSpec = toml::from_str(contents)?;
        spec.validate()?;
        Ok(spec)
    }

    /// The deadline applied to each request, if any.
    pub fn request_deadline(&self) -> Option<Duration> {
        (!self.request_timeout.is_zero()).then_some(self.request_timeout)
    }

    pub fn validate(&self) -> Result<(), BridgeError> {
        if self.addresses.is_empty() {
            return Err(BridgeError::InvalidConfig(
                "at least one address is required".to_string(),
            ));
        }
        for address in &self.addresses {
            if address.host.trim().is_empty() {
                return Err(BridgeError::InvalidConfig("host cannot be empty".to_string()));
            }
            if address.port == 0 {
                return Err(BridgeError::InvalidConfig(format!(
                    "port cannot be 0 (host '{}')",
                    address.host
                )));
            }
        }
        if self.connection_timeout.is_zero() {
            return Err(BridgeError::InvalidConfig(
                "connection_timeout cannot be 0".to_string(),
            ));
        }
        if self.io_threads == 0 {
            return Err(BridgeError::InvalidConfig("io_threads cannot be 0".to_string()));
        }
        if self.delivery_workers == 0 {
            return Err(BridgeError::InvalidConfig(
                "delivery_workers cannot be 0".to_string(),
            ));
        }
        if self.tls_mode == TlsMode::InsecureTls {
            warn!("tls_mode is insecure-tls: server certificates will not be verified.");
        }
        Ok(())
    }
}

/// The command-line tool's configuration file.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Config {
    /// Overridden by `RUST_LOG` when set.
    #[serde(default = "default_log_level")]
    pub log_level: Level,
    /// Writes logs to this file instead of stderr.
    #[serde(default)]
    pub log_file: Option<String>,
    pub connection: ConnectionSpec,
}

impl Config {
    /// Loads and validates a TOML configuration file.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file at '{path}'"))?;
        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse TOML from '{path}'"))?;
        config
            .connection
            .validate()
            .with_context(|| format!("Invalid [connection] table in '{path}'"))?;
        Ok(config)
    }
}
