//! Configuration for the Ryder bridge.
//!
//! Layers, lowest to highest: built-in defaults, the TOML config file,
//! `RYDER_*` environment variables (`RYDER_PORT` is the device path, and
//! `RYDERSERIAL_DEBUG` toggles frame tracing), then command-line overrides.
//! [`Config::to_bridge_config`] validates the result into a
//! `ryder_core::BridgeConfig`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
    value::{Uncased, UncasedStr},
};
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

use ryder_core::BridgeConfig;
use ryder_core::config::default_workers;
use ryder_proto::FirmwareVersion;

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing RYDER_PORT environment variable. See setup instructions.")]
    MissingDevicePort,

    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

fn invalid(field: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        field: field.into(),
        reason: reason.into(),
    }
}

// ── Config ──────────────────────────────────────────────────────────

/// Bridge settings as they appear in the config file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Serial device path, e.g. `/dev/ttyUSB0`. Usually set through
    /// `RYDER_PORT`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_port: Option<String>,

    pub baud_rate: u32,

    /// Host name used in URLs pointing back at the bridge.
    pub host: String,

    /// Loopback port the websocket listens on.
    pub host_port: u16,

    pub hub_url: String,

    pub blockstack_api_url: String,

    pub supported_firmware_version: String,

    /// Worker count. Defaults to the number of CPUs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workers: Option<usize>,

    pub reconnect_delay_ms: u64,

    pub name_cache_ttl_secs: u64,

    pub lookup_timeout_secs: u64,

    /// Upper bound on one device call made by a worker. Unset or `0`
    /// waits indefinitely.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub call_timeout_secs: Option<u64>,

    pub tolerate_redirect_mismatch: bool,

    #[serde(deserialize_with = "deserialize_flag")]
    pub debug_serial: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            device_port: None,
            baud_rate: ryder_core::config::DEFAULT_BAUD_RATE,
            host: "localhost".into(),
            host_port: ryder_core::config::DEFAULT_PORT,
            hub_url: ryder_core::config::DEFAULT_HUB_URL.into(),
            blockstack_api_url: ryder_core::config::DEFAULT_API_URL.into(),
            supported_firmware_version: ryder_core::config::SUPPORTED_FIRMWARE.to_string(),
            workers: None,
            reconnect_delay_ms: 2_000,
            name_cache_ttl_secs: 600,
            lookup_timeout_secs: 10,
            call_timeout_secs: None,
            tolerate_redirect_mismatch: true,
            debug_serial: false,
        }
    }
}

/// Accepts `true`/`false`, integers and numeric strings (`"1"` is on).
fn deserialize_flag<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Int(i64),
        Text(String),
    }

    Ok(match Flag::deserialize(deserializer)? {
        Flag::Bool(b) => b,
        Flag::Int(n) => n != 0,
        Flag::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "on" => true,
            other => other.parse::<i64>().is_ok_and(|n| n != 0),
        },
    })
}

/// Values given on the command line. Unset fields leave lower layers
/// alone.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Overrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_port: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workers: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug_serial: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tolerate_redirect_mismatch: Option<bool>,
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("id", "ryder", "ryder-bridge").map_or_else(
        || PathBuf::from(".ryder-bridge.toml"),
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

// ── Config loading ──────────────────────────────────────────────────

/// Map `RYDER_*` variable names (prefix already stripped) to fields.
fn env_key(key: &UncasedStr) -> Uncased<'_> {
    if key == "port" {
        "device_port".into()
    } else {
        key.into()
    }
}

/// The layered figment for `file` plus `overrides`.
pub fn figment(file: &Path, overrides: &Overrides) -> Figment {
    Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(file))
        .merge(Env::prefixed("RYDER_").map(env_key))
        .merge(
            Env::raw()
                .only(&["RYDERSERIAL_DEBUG"])
                .map(|_| "debug_serial".into()),
        )
        .merge(Serialized::defaults(overrides))
}

/// Load the config from `file` (or the platform default path), the
/// environment and `overrides`. A missing file is not an error.
pub fn load(file: Option<&Path>, overrides: &Overrides) -> Result<Config, ConfigError> {
    let path = file.map_or_else(config_path, Path::to_path_buf);
    let config: Config = figment(&path, overrides).extract()?;
    Ok(config)
}

impl Config {
    /// Render as TOML, e.g. for `--print-config`.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Validate and convert into the runtime configuration.
    pub fn to_bridge_config(&self) -> Result<BridgeConfig, ConfigError> {
        let device_port = self
            .device_port
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .ok_or(ConfigError::MissingDevicePort)?;

        let hub_url = url::Url::parse(&self.hub_url)
            .map_err(|e| invalid("hub_url", format!("{e}: {}", self.hub_url)))?;
        let api_url = url::Url::parse(&self.blockstack_api_url)
            .map_err(|e| invalid("blockstack_api_url", format!("{e}: {}", self.blockstack_api_url)))?;
        let supported_firmware: FirmwareVersion = self
            .supported_firmware_version
            .parse()
            .map_err(|e| invalid("supported_firmware_version", format!("{e}")))?;

        let workers = match self.workers {
            None => default_workers(),
            Some(0) => return Err(invalid("workers", "must be at least 1")),
            Some(n) => n,
        };
        if self.baud_rate == 0 {
            return Err(invalid("baud_rate", "must be positive"));
        }

        let mut config = BridgeConfig::new(device_port, hub_url, api_url);
        config.baud_rate = self.baud_rate;
        config.supported_firmware = supported_firmware;
        config.host.clone_from(&self.host);
        config.port = self.host_port;
        config.workers = workers;
        config.reconnect_delay = Duration::from_millis(self.reconnect_delay_ms);
        config.name_cache_ttl = Duration::from_secs(self.name_cache_ttl_secs);
        config.lookup_timeout = Duration::from_secs(self.lookup_timeout_secs);
        config.call_timeout = self
            .call_timeout_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs);
        config.tolerate_redirect_mismatch = self.tolerate_redirect_mismatch;
        config.debug_serial = self.debug_serial;
        Ok(config)
    }
}
