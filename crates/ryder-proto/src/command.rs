// ── Device commands and responses ──
//
// A command is an opcode byte plus optional argument bytes. The device
// answers every command with exactly one response: a single status byte,
// or an output block delimited by OUTPUT / OUTPUT_END.

use std::fmt;

use strum::{Display, FromRepr};

/// Command opcodes understood by the device firmware.
pub mod opcode {
    pub const WAKE: u8 = 1;
    pub const INFO: u8 = 2;
    pub const SETUP: u8 = 10;
    pub const RESTORE_FROM_SEED: u8 = 11;
    pub const RESTORE_FROM_MNEMONIC: u8 = 12;
    pub const ERASE: u8 = 13;
    pub const EXPORT_OWNER_KEY: u8 = 18;
    pub const EXPORT_OWNER_KEY_PRIVATE_KEY: u8 = 19;
    pub const EXPORT_APP_KEY: u8 = 20;
    pub const EXPORT_APP_KEY_PRIVATE_KEY: u8 = 21;
    pub const EXPORT_OWNER_APP_KEY_PRIVATE_KEY: u8 = 23;
    pub const EXPORT_PUBLIC_IDENTITIES: u8 = 30;
    pub const EXPORT_PUBLIC_IDENTITY: u8 = 31;
    pub const START_ENCRYPT: u8 = 40;
    pub const START_DECRYPT: u8 = 41;
    pub const CANCEL: u8 = 100;
}

/// Raw response bytes sent by the device.
pub mod response {
    pub const OK: u8 = 1;
    pub const SEND_INPUT: u8 = 2;
    pub const REJECTED: u8 = 3;
    pub const OUTPUT: u8 = 4;
    pub const OUTPUT_END: u8 = 5;
    pub const ESC_SEQUENCE: u8 = 6;
    pub const WAIT_USER_CONFIRM: u8 = 10;
    pub const LOCKED: u8 = 11;
}

// ── Command ──────────────────────────────────────────────────────────

/// One outbound exchange: the bytes written to the port before waiting
/// for the matching response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    bytes: Vec<u8>,
}

impl Command {
    /// A bare opcode with no arguments.
    pub fn new(opcode: u8) -> Self {
        Self {
            bytes: vec![opcode],
        }
    }

    /// An opcode followed by a single argument byte (identity number etc.).
    pub fn with_arg(opcode: u8, arg: u8) -> Self {
        Self {
            bytes: vec![opcode, arg],
        }
    }

    /// Free-form input answering a `SEND_INPUT` prompt. The device reads
    /// up to the terminating NUL.
    pub fn input(text: &str) -> Self {
        let mut bytes = Vec::with_capacity(text.len() + 1);
        bytes.extend_from_slice(text.as_bytes());
        bytes.push(0);
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// The leading byte, which is the opcode for everything except input.
    pub fn opcode(&self) -> Option<u8> {
        self.bytes.first().copied()
    }
}

// ── Response ─────────────────────────────────────────────────────────

/// Error codes the firmware reports in place of a regular response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, FromRepr)]
#[repr(u8)]
#[strum(serialize_all = "snake_case")]
pub enum DeviceErrorCode {
    UnknownCommand = 255,
    NotInitialized = 254,
    MemoryError = 253,
    AppDomainTooLong = 252,
    AppDomainInvalid = 251,
    MnemonicTooLong = 250,
    MnemonicInvalid = 249,
    GenerateMnemonic = 248,
    InputTimeout = 247,
    NotImplemented = 246,
}

/// A fully decoded device response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Ok,
    SendInput,
    Rejected,
    Locked,
    /// Intermediate notice: the device is showing a confirmation prompt.
    /// Transports keep waiting for the real response after this.
    WaitUserConfirm,
    Output(Vec<u8>),
    Error(DeviceErrorCode),
    Unknown(u8),
}

impl Response {
    /// Classify a single status byte (anything but the OUTPUT marker).
    pub fn from_status(byte: u8) -> Self {
        match byte {
            response::OK => Self::Ok,
            response::SEND_INPUT => Self::SendInput,
            response::REJECTED => Self::Rejected,
            response::LOCKED => Self::Locked,
            response::WAIT_USER_CONFIRM => Self::WaitUserConfirm,
            other => DeviceErrorCode::from_repr(other).map_or(Self::Unknown(other), Self::Error),
        }
    }

    /// Output payload as text, if this is an output response.
    pub fn output_text(&self) -> Option<String> {
        match self {
            Self::Output(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
            _ => None,
        }
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => f.write_str("ok"),
            Self::SendInput => f.write_str("send_input"),
            Self::Rejected => f.write_str("rejected"),
            Self::Locked => f.write_str("locked"),
            Self::WaitUserConfirm => f.write_str("wait_user_confirm"),
            Self::Output(bytes) => write!(f, "output ({} bytes)", bytes.len()),
            Self::Error(code) => write!(f, "error {code}"),
            Self::Unknown(byte) => write!(f, "unknown status 0x{byte:02x}"),
        }
    }
}
