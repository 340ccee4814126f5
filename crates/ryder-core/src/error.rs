// ── Core error types ──
//
// Session, call-layer and bridge errors. Transport-level failures from
// `ryder-proto` are translated by the `From` impl below; fatal device
// problems get their own cloneable type so they can be published to
// every observer of the session.

use thiserror::Error;

use ryder_proto::FirmwareVersion;

/// Unrecoverable device conditions. The process should stop rather than
/// retry when one of these is reported.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FatalError {
    #[error("Device at {port} does not appear to be a Ryder device ({reason})")]
    NotRyderDevice { port: String, reason: String },

    #[error("Firmware version {found} is not supported (this build supports {supported})")]
    UnsupportedFirmware {
        found: FirmwareVersion,
        supported: FirmwareVersion,
    },
}

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Device errors ────────────────────────────────────────────────
    #[error(transparent)]
    Fatal(#[from] FatalError),

    #[error("Device transport error: {reason}")]
    Transport { reason: String },

    #[error("Device is not connected")]
    NotConnected,

    #[error("Unexpected device response: {message}")]
    Protocol { message: String },

    // ── Call layer ───────────────────────────────────────────────────
    #[error("Device service is unavailable")]
    DeviceUnavailable,

    #[error("Device call timed out after {timeout_ms}ms")]
    CallTimeout { timeout_ms: u64 },

    // ── Bridge errors ────────────────────────────────────────────────
    #[error("Name lookup failed: {message}")]
    NameLookup { message: String },

    #[error("Token error: {message}")]
    Token { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// `true` for conditions that must terminate the process.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_))
    }

    /// `true` for channel problems the session recovers from by
    /// reconnecting.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport { .. } | Self::NotConnected)
    }

    pub(crate) fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    pub(crate) fn token(message: impl Into<String>) -> Self {
        Self::Token {
            message: message.into(),
        }
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<ryder_proto::Error> for CoreError {
    fn from(err: ryder_proto::Error) -> Self {
        match err {
            ryder_proto::Error::Open { .. }
            | ryder_proto::Error::Io(_)
            | ryder_proto::Error::Disconnected => CoreError::Transport {
                reason: err.to_string(),
            },
            ryder_proto::Error::BadMagic { .. }
            | ryder_proto::Error::MalformedInfo { .. }
            | ryder_proto::Error::InvalidVersion(_) => CoreError::Protocol {
                message: err.to_string(),
            },
        }
    }
}
