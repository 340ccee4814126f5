//! Clap derive definitions for the `ryder-bridge` binary.

use std::path::PathBuf;

use clap::Parser;

use ryder_config::Overrides;

/// ryder-bridge -- connect a Ryder identity device to Blockstack apps
#[derive(Debug, Parser)]
#[command(
    name = "ryder-bridge",
    version,
    about = "Bridge a Ryder hardware identity device to Blockstack apps in the browser",
    long_about = "Bridge a Ryder hardware identity device to Blockstack apps in the browser.\n\n\
        Opens the device on its serial port, checks the firmware, then serves the\n\
        auth bridge protocol over a websocket on the loopback interface.\n\n\
        The device path comes from --device, RYDER_PORT or the config file."
)]
pub struct Cli {
    /// Config file (defaults to the platform config directory)
    #[arg(long, short = 'c')]
    pub config: Option<PathBuf>,

    /// Serial device path, e.g. /dev/ttyUSB0 (overrides RYDER_PORT)
    #[arg(long, short = 'd')]
    pub device: Option<String>,

    /// Loopback port for the websocket listener
    #[arg(long, short = 'p')]
    pub port: Option<u16>,

    /// Number of websocket workers (defaults to the CPU count)
    #[arg(long, short = 'w')]
    pub workers: Option<usize>,

    /// Log raw serial frames
    #[arg(long)]
    pub debug_serial: bool,

    /// Reject auth requests whose redirect URI is outside their domain
    #[arg(long)]
    pub strict_redirects: bool,

    /// Increase verbosity (-v, -vv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Also write logs to this file
    #[arg(long, value_name = "PATH")]
    pub log_file: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long)]
    pub log_json: bool,

    /// Print the effective configuration and exit
    #[arg(long)]
    pub print_config: bool,
}

impl Cli {
    /// Config overrides carried by the flags. Boolean switches only
    /// override when given.
    pub fn overrides(&self) -> Overrides {
        Overrides {
            device_port: self.device.clone(),
            host_port: self.port,
            workers: self.workers,
            debug_serial: self.debug_serial.then_some(true),
            tolerate_redirect_mismatch: self.strict_redirects.then_some(false),
        }
    }
}
