// ryder-proto: wire protocol and serial transport for the Ryder device

pub mod command;
pub mod error;
pub mod framing;
pub mod info;
pub mod transport;

pub use command::{Command, DeviceErrorCode, Response, opcode, response};
pub use error::Error;
pub use framing::ResponseDecoder;
pub use info::{DeviceInfo, FirmwareVersion, INFO_MAGIC};
pub use transport::{Connector, FramedTransport, SerialConnector, Transport};
