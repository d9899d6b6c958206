//! Configuration loading
//!
//! Runtime configuration comes from a `key = value` file (conventionally
//! `/etc/nrfmesh/nrfmesh.conf`). Lines starting with `#` are comments, keys
//! without a value in the file fall back to defaults, and missing required
//! keys or malformed values are fatal at startup.
//!
//! ```text
//! # nrfmesh.conf
//! interface_name = nrf0
//! mode = mesh
//! channel = 76
//! tunnel_ip_address = 10.42.0.1
//! tunnel_netmask = 255.255.255.0
//! ce_pin = 22
//! radio_backend = udp
//! udp_bind = 0.0.0.0:9301
//! udp_peers = 192.168.1.20:9301
//! ```

use crate::ack::AckConfig;
use crate::mesh::MeshRadioConfig;
use crate::packet::{BASE_ADDRESS, DISCOVERY_ADDRESS_OFFSET};
use crate::radio::{DataRate, PowerLevel};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::Path;
use tracing::info;

/// Operating mode of the radio link.
///
/// Only `mesh` is implemented; the point-to-point modes are accepted by the
/// parser for compatibility with old configuration files and rejected at
/// startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RadioMode {
    Primary,
    Secondary,
    Automatic,
    Mesh,
}

/// Which radio implementation carries the frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RadioBackend {
    /// In-process simulated medium
    Sim,
    /// UDP-emulated air between processes
    Udp,
    /// Register-level SPI driver (not built into this tree)
    Hardware,
}

/// Errors from loading or validating configuration.
#[derive(Debug)]
pub enum ConfigError {
    Io {
        path: String,
        err: std::io::Error,
    },
    MissingKey(&'static str),
    InvalidValue {
        key: String,
        value: String,
        expected: &'static str,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io { path, err } => write!(f, "cannot read config {}: {}", path, err),
            ConfigError::MissingKey(key) => write!(f, "missing required config key '{}'", key),
            ConfigError::InvalidValue {
                key,
                value,
                expected,
            } => write!(
                f,
                "invalid value '{}' for config key '{}' (expected {})",
                value, key, expected
            ),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Complete runtime configuration.
#[derive(Debug, Clone, Serialize)]
pub struct Config {
    /// Name of the TUN interface to create
    pub interface_name: String,
    pub mode: RadioMode,
    /// RF channel (0..=127)
    pub channel: u8,
    pub tunnel_ip_address: Ipv4Addr,
    pub tunnel_netmask: Ipv4Addr,
    /// Sleep between supervisory loop iterations; 0 spins
    pub poll_interval_us: u64,
    /// Log every frame crossing the TUN boundary
    pub enable_tunnel_logs: bool,
    /// Chip-enable GPIO pin of the radio
    pub ce_pin: u16,
    /// Address of the shared discovery pipe
    pub discovery_address: u32,
    /// Base of the pipe address space
    pub base_address: u32,
    pub power_level: PowerLevel,
    pub low_noise_amplifier: bool,
    pub data_rate: DataRate,
    /// Radio address width in bytes (3..=5)
    pub address_width: u8,
    /// Reliable-delivery window; values above 1 void in-order reassembly
    pub max_in_flight: usize,
    pub ack_enabled: bool,
    /// Start slot synchronization once a neighbor is known
    pub slotted: bool,
    pub radio_backend: RadioBackend,
    /// Local socket for the UDP backend
    pub udp_bind: Option<SocketAddr>,
    /// Peer sockets for the UDP backend
    pub udp_peers: Vec<SocketAddr>,
    /// Seconds between statistics reports; 0 disables them
    pub stats_interval_s: u64,
}

impl Config {
    /// Load and validate a configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|err| ConfigError::Io {
            path: path.display().to_string(),
            err,
        })?;
        Self::from_str_contents(&contents)
    }

    /// Parse configuration from file contents.
    pub fn from_str_contents(contents: &str) -> Result<Self, ConfigError> {
        let mut values = HashMap::new();
        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                values.insert(key.trim().to_string(), value.trim().to_string());
            }
        }
        Self::from_values(&values)
    }

    fn from_values(values: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let config = Self {
            interface_name: required(values, "interface_name")?.to_string(),
            mode: parse_mode(required(values, "mode")?)?,
            channel: parse_number(values, "channel")?.ok_or(ConfigError::MissingKey("channel"))?,
            tunnel_ip_address: parse_ip(values, "tunnel_ip_address")?
                .ok_or(ConfigError::MissingKey("tunnel_ip_address"))?,
            tunnel_netmask: parse_ip(values, "tunnel_netmask")?
                .ok_or(ConfigError::MissingKey("tunnel_netmask"))?,
            poll_interval_us: parse_number(values, "poll_interval_us")?.unwrap_or(0),
            enable_tunnel_logs: parse_bool(values, "enable_tunnel_logs")?.unwrap_or(false),
            ce_pin: parse_number(values, "ce_pin")?.ok_or(ConfigError::MissingKey("ce_pin"))?,
            discovery_address: parse_address(values, "discovery_address")?
                .unwrap_or(BASE_ADDRESS | DISCOVERY_ADDRESS_OFFSET),
            base_address: parse_address(values, "base_address")?.unwrap_or(BASE_ADDRESS),
            power_level: parse_power(values)?,
            low_noise_amplifier: parse_bool(values, "low_noise_amplifier")?.unwrap_or(true),
            data_rate: parse_rate(values)?,
            address_width: parse_number(values, "address_width")?.unwrap_or(3),
            max_in_flight: parse_number(values, "max_in_flight")?.unwrap_or(1),
            ack_enabled: parse_bool(values, "ack_enabled")?.unwrap_or(true),
            slotted: parse_bool(values, "slotted")?.unwrap_or(false),
            radio_backend: parse_backend(values)?,
            udp_bind: parse_socket(values, "udp_bind")?,
            udp_peers: parse_socket_list(values, "udp_peers")?,
            stats_interval_s: parse_number(values, "stats_interval_s")?.unwrap_or(10),
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.channel > 127 {
            return Err(ConfigError::InvalidValue {
                key: "channel".into(),
                value: self.channel.to_string(),
                expected: "0..=127",
            });
        }
        if !(3..=5).contains(&self.address_width) {
            return Err(ConfigError::InvalidValue {
                key: "address_width".into(),
                value: self.address_width.to_string(),
                expected: "3..=5",
            });
        }
        if self.max_in_flight == 0 {
            return Err(ConfigError::InvalidValue {
                key: "max_in_flight".into(),
                value: "0".into(),
                expected: "at least 1",
            });
        }
        Ok(())
    }

    /// Radio layer configuration derived from this file.
    pub fn mesh_config(&self) -> MeshRadioConfig {
        MeshRadioConfig {
            channel: self.channel,
            power_level: self.power_level,
            low_noise_amplifier: self.low_noise_amplifier,
            data_rate: self.data_rate,
            address_width: self.address_width,
            base_address: self.base_address,
            discovery_address: self.discovery_address,
            slotted: self.slotted,
            ..MeshRadioConfig::default()
        }
    }

    /// Acknowledgment layer configuration derived from this file.
    pub fn ack_config(&self) -> AckConfig {
        AckConfig {
            max_in_flight: self.max_in_flight,
            enabled: self.ack_enabled,
            ..AckConfig::default()
        }
    }

    /// Log the loaded values, the startup equivalent of a config dump.
    pub fn log_summary(&self) {
        info!(
            interface = %self.interface_name,
            mode = ?self.mode,
            channel = self.channel,
            ip = %self.tunnel_ip_address,
            netmask = %self.tunnel_netmask,
            backend = ?self.radio_backend,
            "configuration loaded"
        );
    }
}

fn required<'a>(
    values: &'a HashMap<String, String>,
    key: &'static str,
) -> Result<&'a str, ConfigError> {
    values
        .get(key)
        .map(String::as_str)
        .ok_or(ConfigError::MissingKey(key))
}

fn parse_number<N: std::str::FromStr>(
    values: &HashMap<String, String>,
    key: &'static str,
) -> Result<Option<N>, ConfigError> {
    match values.get(key) {
        None => Ok(None),
        Some(value) => value
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                key: key.into(),
                value: value.clone(),
                expected: "a number",
            }),
    }
}

fn parse_bool(
    values: &HashMap<String, String>,
    key: &'static str,
) -> Result<Option<bool>, ConfigError> {
    match values.get(key).map(String::as_str) {
        None => Ok(None),
        Some("true") | Some("1") | Some("yes") => Ok(Some(true)),
        Some("false") | Some("0") | Some("no") => Ok(Some(false)),
        Some(other) => Err(ConfigError::InvalidValue {
            key: key.into(),
            value: other.into(),
            expected: "true or false",
        }),
    }
}

fn parse_ip(
    values: &HashMap<String, String>,
    key: &'static str,
) -> Result<Option<Ipv4Addr>, ConfigError> {
    match values.get(key) {
        None => Ok(None),
        Some(value) => value
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                key: key.into(),
                value: value.clone(),
                expected: "an IPv4 address",
            }),
    }
}

/// Addresses may be decimal or `0x`-prefixed hex.
fn parse_address(
    values: &HashMap<String, String>,
    key: &'static str,
) -> Result<Option<u32>, ConfigError> {
    match values.get(key) {
        None => Ok(None),
        Some(value) => {
            let parsed = if let Some(hex) = value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
                u32::from_str_radix(hex, 16)
            } else {
                value.parse()
            };
            parsed.map(Some).map_err(|_| ConfigError::InvalidValue {
                key: key.into(),
                value: value.clone(),
                expected: "a decimal or 0x-prefixed address",
            })
        }
    }
}

fn parse_mode(value: &str) -> Result<RadioMode, ConfigError> {
    match value {
        "primary" => Ok(RadioMode::Primary),
        "secondary" => Ok(RadioMode::Secondary),
        "automatic" => Ok(RadioMode::Automatic),
        "mesh" => Ok(RadioMode::Mesh),
        other => Err(ConfigError::InvalidValue {
            key: "mode".into(),
            value: other.into(),
            expected: "primary, secondary, automatic, or mesh",
        }),
    }
}

fn parse_power(values: &HashMap<String, String>) -> Result<PowerLevel, ConfigError> {
    match values.get("power_level").map(String::as_str) {
        None => Ok(PowerLevel::Max),
        Some("min") => Ok(PowerLevel::Min),
        Some("low") => Ok(PowerLevel::Low),
        Some("high") => Ok(PowerLevel::High),
        Some("max") => Ok(PowerLevel::Max),
        Some(other) => Err(ConfigError::InvalidValue {
            key: "power_level".into(),
            value: other.into(),
            expected: "min, low, high, or max",
        }),
    }
}

fn parse_rate(values: &HashMap<String, String>) -> Result<DataRate, ConfigError> {
    match values.get("data_rate").map(String::as_str) {
        None => Ok(DataRate::Mbps2),
        Some("250kbps") => Ok(DataRate::Kbps250),
        Some("1mbps") => Ok(DataRate::Mbps1),
        Some("2mbps") => Ok(DataRate::Mbps2),
        Some(other) => Err(ConfigError::InvalidValue {
            key: "data_rate".into(),
            value: other.into(),
            expected: "250kbps, 1mbps, or 2mbps",
        }),
    }
}

fn parse_backend(values: &HashMap<String, String>) -> Result<RadioBackend, ConfigError> {
    match values.get("radio_backend").map(String::as_str) {
        None | Some("sim") => Ok(RadioBackend::Sim),
        Some("udp") => Ok(RadioBackend::Udp),
        Some("hardware") => Ok(RadioBackend::Hardware),
        Some(other) => Err(ConfigError::InvalidValue {
            key: "radio_backend".into(),
            value: other.into(),
            expected: "sim, udp, or hardware",
        }),
    }
}

fn parse_socket(
    values: &HashMap<String, String>,
    key: &'static str,
) -> Result<Option<SocketAddr>, ConfigError> {
    match values.get(key) {
        None => Ok(None),
        Some(value) => value
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                key: key.into(),
                value: value.clone(),
                expected: "host:port",
            }),
    }
}

fn parse_socket_list(
    values: &HashMap<String, String>,
    key: &'static str,
) -> Result<Vec<SocketAddr>, ConfigError> {
    match values.get(key) {
        None => Ok(Vec::new()),
        Some(value) => value
            .split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(|part| {
                part.parse().map_err(|_| ConfigError::InvalidValue {
                    key: key.into(),
                    value: part.into(),
                    expected: "host:port",
                })
            })
            .collect(),
    }
}
