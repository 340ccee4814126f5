use thiserror::Error;

/// Top-level error type for the `ryder-proto` crate.
///
/// Covers opening the serial port, byte-level I/O and the few structural
/// checks this crate performs on device output. `ryder-core` maps these
/// into session-level failures.
#[derive(Debug, Error)]
pub enum Error {
    // ── Transport ───────────────────────────────────────────────────
    /// The serial port could not be opened.
    #[error("Could not open serial port {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: tokio_serial::Error,
    },

    /// Read or write on an open port failed.
    #[error("Serial I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The port reached end-of-stream while a response was pending.
    #[error("Device disconnected")]
    Disconnected,

    // ── Data ────────────────────────────────────────────────────────
    /// INFO output does not start with the device magic.
    #[error("Not a Ryder device (INFO starts with {found:?})")]
    BadMagic { found: String },

    /// INFO output is shorter than the fixed layout.
    #[error("Malformed INFO response ({len} bytes)")]
    MalformedInfo { len: usize },

    /// A firmware version string is not `major.minor.patch`.
    #[error("Invalid firmware version: {0}")]
    InvalidVersion(String),
}

impl Error {
    /// Returns `true` if this error comes from the byte channel itself
    /// and reopening the port might resolve it.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Open { .. } | Self::Io(_) | Self::Disconnected)
    }
}
