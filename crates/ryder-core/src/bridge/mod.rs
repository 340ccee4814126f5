//! Auth bridge protocol: socket message types and the handler that
//! serves them.

pub mod handler;
pub mod message;

pub use handler::{BridgeHandler, EventSink, HandlerSettings};
pub use message::{AppKeyRequest, Identity, Inbound, InvalidReason, Outbound};
