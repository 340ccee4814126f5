// ── Bridge configuration ──
//
// Fully resolved runtime settings. `ryder-config` builds this from the
// TOML file and environment; tests construct it directly.

use std::net::{Ipv4Addr, SocketAddr};
use std::num::NonZeroUsize;
use std::time::Duration;

use url::Url;

use ryder_proto::FirmwareVersion;

/// The only firmware this build talks to.
pub const SUPPORTED_FIRMWARE: FirmwareVersion = FirmwareVersion::new(0, 0, 1);

pub const DEFAULT_BAUD_RATE: u32 = 115_200;
pub const DEFAULT_PORT: u16 = 8888;
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(2);
pub const DEFAULT_NAME_CACHE_TTL: Duration = Duration::from_secs(10 * 60);
pub const DEFAULT_LOOKUP_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_HUB_URL: &str = "https://hub.blockstack.org";
pub const DEFAULT_API_URL: &str = "https://core.blockstack.org";

/// Runtime configuration for the bridge.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Serial device path (e.g. `/dev/ttyUSB0`).
    pub device_port: String,
    pub baud_rate: u32,
    pub supported_firmware: FirmwareVersion,
    /// Host name used when building URLs that point back at the bridge.
    pub host: String,
    /// Listening port on the loopback interface. `0` picks a free port.
    pub port: u16,
    /// Gaia hub advertised in auth responses.
    pub hub_url: Url,
    /// Blockstack core API used for name lookups and advertised in auth responses.
    pub api_url: Url,
    pub workers: usize,
    pub reconnect_delay: Duration,
    pub name_cache_ttl: Duration,
    pub lookup_timeout: Duration,
    /// Upper bound on a single cross-worker device call. `None` waits for
    /// the device indefinitely.
    pub call_timeout: Option<Duration>,
    /// Emit a `redirect` instead of rejecting when an auth request's
    /// redirect URI is outside its declared domain.
    pub tolerate_redirect_mismatch: bool,
    /// Log raw serial frames.
    pub debug_serial: bool,
}

impl BridgeConfig {
    /// Defaults for everything but the device path and the Blockstack
    /// endpoints.
    pub fn new(device_port: impl Into<String>, hub_url: Url, api_url: Url) -> Self {
        Self {
            device_port: device_port.into(),
            baud_rate: DEFAULT_BAUD_RATE,
            supported_firmware: SUPPORTED_FIRMWARE,
            host: "localhost".into(),
            port: DEFAULT_PORT,
            hub_url,
            api_url,
            workers: default_workers(),
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            name_cache_ttl: DEFAULT_NAME_CACHE_TTL,
            lookup_timeout: DEFAULT_LOOKUP_TIMEOUT,
            call_timeout: None,
            tolerate_redirect_mismatch: true,
            debug_serial: false,
        }
    }

    /// Base URL of the bridge's own HTTP surface, with trailing slash.
    /// The port is omitted when it is `0`.
    pub fn bridge_url(&self) -> String {
        if self.port == 0 {
            format!("http://{}/", self.host)
        } else {
            format!("http://{}:{}/", self.host, self.port)
        }
    }

    /// The bridge only ever listens on loopback.
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::from((Ipv4Addr::LOCALHOST, self.port))
    }
}

/// One worker per available CPU.
pub fn default_workers() -> usize {
    std::thread::available_parallelism().map_or(1, NonZeroUsize::get)
}
