//! Binary error types with miette diagnostics.
//!
//! Missing configuration and unusable devices are operator conditions:
//! they print a message and exit 0.

use miette::Diagnostic;
use thiserror::Error;

use ryder_config::ConfigError;
use ryder_core::{CoreError, FatalError};

pub mod exit_code {
    pub const SUCCESS: i32 = 0;
    pub const GENERAL: i32 = 1;
    pub const CONFIG: i32 = 2;
}

#[derive(Debug, Error, Diagnostic)]
pub enum BridgeError {
    // ── Configuration ────────────────────────────────────────────────

    #[error("Missing RYDER_PORT environment variable. See setup instructions.")]
    #[diagnostic(
        code(ryder::missing_port),
        help("Set RYDER_PORT to the device's serial port, e.g. RYDER_PORT=/dev/ttyUSB0, or pass --device.")
    )]
    MissingDevicePort,

    #[error(transparent)]
    #[diagnostic(code(ryder::config))]
    Config(ConfigError),

    // ── Device ───────────────────────────────────────────────────────

    #[error("{0}")]
    #[diagnostic(
        code(ryder::unsupported_device),
        help("Check that RYDER_PORT points at a Ryder device running supported firmware.")
    )]
    Device(FatalError),

    #[error("All workers exited, stopping.")]
    #[diagnostic(code(ryder::all_workers_fatal))]
    AllWorkersFatal,

    // ── Runtime ──────────────────────────────────────────────────────

    #[error("Could not listen on {addr}")]
    #[diagnostic(
        code(ryder::bind_failed),
        help("Another bridge may already be running. Pick a different port with --port.")
    )]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Could not open log file {path}")]
    #[diagnostic(code(ryder::log_file))]
    LogFile {
        path: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error(transparent)]
    #[diagnostic(code(ryder::core))]
    Core(CoreError),
}

impl BridgeError {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::MissingDevicePort | Self::Device(_) | Self::AllWorkersFatal => exit_code::SUCCESS,
            Self::Config(_) => exit_code::CONFIG,
            Self::Bind { .. } | Self::LogFile { .. } | Self::Core(_) => exit_code::GENERAL,
        }
    }
}

impl From<ConfigError> for BridgeError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::MissingDevicePort => Self::MissingDevicePort,
            other => Self::Config(other),
        }
    }
}

impl From<CoreError> for BridgeError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Fatal(fatal) => Self::Device(fatal),
            other => Self::Core(other),
        }
    }
}
