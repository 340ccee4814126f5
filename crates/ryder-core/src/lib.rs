//! Device arbitration and auth bridging for the Ryder bridge.
//!
//! - **[`DeviceSession`]** owns the serial channel. It identifies the device
//!   on open, admits command sequences one at a time in arrival order, and
//!   reconnects after transport failures.
//!
//! - **[`DeviceService`] / [`DeviceClient`]** are the call layer. Workers
//!   never touch the session; they send typed [`DeviceCall`]s and await the
//!   reply.
//!
//! - **[`WorkerPool`]** supervises websocket workers ([`BridgeWorkers`]),
//!   respawning restartable exits and stopping once every worker is fatal.
//!
//! - **[`BridgeHandler`]** speaks the browser protocol: auth request
//!   validation, identity listing and app key release, backed by a
//!   per-worker [`NameCache`] and the [`auth`] token protocol.

pub mod auth;
pub mod bridge;
pub mod config;
pub mod error;
pub mod export;
pub mod ipc;
pub mod names;
pub mod pool;
pub mod session;
pub mod worker;

// ── Primary re-exports ──────────────────────────────────────────────
pub use auth::{AuthProtocol, BlockstackAuth};
pub use bridge::{BridgeHandler, HandlerSettings, Inbound, Outbound};
pub use config::BridgeConfig;
pub use error::{CoreError, FatalError};
pub use export::{AppKeyExport, PrivateKeyBundle, PublicIdentity};
pub use ipc::{DeviceCall, DeviceClient, DeviceService};
pub use names::NameCache;
pub use pool::{PoolOutcome, WorkerExit, WorkerFactory, WorkerPool};
pub use session::{ConnectionState, DeviceSession, Readiness, Sequence};
pub use worker::{BridgeWorkers, WorkerContext};
