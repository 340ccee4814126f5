// Transport contract for the device command channel.
//
// A `Transport` performs one request/response exchange at a time; callers
// are responsible for exclusivity. `Connector` opens fresh transports so
// the session can reconnect after the port drops.

use std::future::Future;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::{debug, trace};

use crate::command::{Command, Response};
use crate::error::Error;
use crate::framing::ResponseDecoder;

const READ_CHUNK: usize = 256;

/// One open command channel to the device.
pub trait Transport: Send + 'static {
    /// Write `command` and wait for exactly one response.
    fn exchange(&mut self, command: &Command)
    -> impl Future<Output = Result<Response, Error>> + Send;

    /// Release the underlying port. Must tolerate an already-dead channel.
    fn close(&mut self) -> impl Future<Output = ()> + Send;
}

/// Opens transports on demand.
pub trait Connector: Send + Sync + 'static {
    type Transport: Transport;

    fn connect(&self) -> impl Future<Output = Result<Self::Transport, Error>> + Send;

    /// Human-readable location (port path) for logs and diagnostics.
    fn describe(&self) -> String;
}

// ── FramedTransport ──────────────────────────────────────────────────

/// [`Transport`] over any async byte stream speaking the Ryder framing.
pub struct FramedTransport<S> {
    stream: S,
    decoder: ResponseDecoder,
    trace_frames: bool,
}

impl<S> FramedTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            decoder: ResponseDecoder::new(),
            trace_frames: false,
        }
    }

    /// Log every raw frame at debug level.
    pub fn with_frame_tracing(mut self, enabled: bool) -> Self {
        self.trace_frames = enabled;
        self
    }

    async fn read_response(&mut self) -> Result<Response, Error> {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            let read = self.stream.read(&mut chunk).await?;
            if read == 0 {
                return Err(Error::Disconnected);
            }
            if self.trace_frames {
                debug!(bytes = ?&chunk[..read], "<- device");
            }

            for (idx, &byte) in chunk[..read].iter().enumerate() {
                match self.decoder.push(byte) {
                    None => {}
                    Some(Response::WaitUserConfirm) => {
                        debug!("waiting for user confirmation on device");
                    }
                    Some(response) => {
                        let trailing = read - idx - 1;
                        if trailing > 0 {
                            debug!(trailing, "discarding bytes after response");
                        }
                        return Ok(response);
                    }
                }
            }
        }
    }
}

impl<S> Transport for FramedTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn exchange(&mut self, command: &Command) -> Result<Response, Error> {
        self.decoder.reset();
        if self.trace_frames {
            debug!(bytes = ?command.as_bytes(), "-> device");
        }
        self.stream.write_all(command.as_bytes()).await?;
        self.stream.flush().await?;

        let response = self.read_response().await?;
        trace!(%response, "device response");
        Ok(response)
    }

    async fn close(&mut self) {
        if let Err(e) = self.stream.shutdown().await {
            trace!(error = %e, "shutdown on closed port");
        }
    }
}

// ── SerialConnector ──────────────────────────────────────────────────

/// Opens the device's serial port.
#[derive(Debug, Clone)]
pub struct SerialConnector {
    path: String,
    baud_rate: u32,
    trace_frames: bool,
}

impl SerialConnector {
    pub fn new(path: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            path: path.into(),
            baud_rate,
            trace_frames: false,
        }
    }

    pub fn with_frame_tracing(mut self, enabled: bool) -> Self {
        self.trace_frames = enabled;
        self
    }
}

impl Connector for SerialConnector {
    type Transport = FramedTransport<SerialStream>;

    async fn connect(&self) -> Result<Self::Transport, Error> {
        debug!(path = %self.path, baud_rate = self.baud_rate, "opening serial port");
        let stream = tokio_serial::new(&self.path, self.baud_rate)
            .open_native_async()
            .map_err(|source| Error::Open {
                path: self.path.clone(),
                source,
            })?;
        Ok(FramedTransport::new(stream).with_frame_tracing(self.trace_frames))
    }

    fn describe(&self) -> String {
        self.path.clone()
    }
}
