// ── Device session ──
//
// Exclusive owner of the serial channel to the Ryder device. Handles the
// INFO handshake, serialises multi-step command sequences through a FIFO
// mutex, and reconnects after transport failures.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use strum::Display;
use tokio::sync::{Mutex, OwnedMutexGuard, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use ryder_proto::{Command, Connector, DeviceInfo, FirmwareVersion, Response, Transport, opcode};

use crate::error::{CoreError, FatalError};

// ── ConnectionState ──────────────────────────────────────────────

/// Channel state observable by consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum ConnectionState {
    Closed,
    Connecting,
    Open,
    Reconnecting,
}

/// Whether the device has been identified yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    Pending,
    Ready(DeviceInfo),
    Fatal(FatalError),
}

// ── DeviceSession ────────────────────────────────────────────────

/// Handle to the single device channel.
///
/// Cheaply cloneable via `Arc<SessionInner>`. Every exchange goes through
/// [`admit()`](Self::admit), which queues callers in arrival order and hands
/// out exclusive use of the channel until the returned [`Sequence`] drops.
pub struct DeviceSession<C: Connector> {
    inner: Arc<SessionInner<C>>,
}

impl<C: Connector> Clone for DeviceSession<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct SessionInner<C: Connector> {
    connector: C,
    supported_firmware: FirmwareVersion,
    reconnect_delay: Duration,
    /// `None` while closed. The mutex doubles as the sequence queue.
    channel: Arc<Mutex<Option<C::Transport>>>,
    state: watch::Sender<ConnectionState>,
    readiness: watch::Sender<Readiness>,
    reconnect_pending: AtomicBool,
    cancel: CancellationToken,
}

impl<C: Connector> DeviceSession<C> {
    pub fn new(connector: C, supported_firmware: FirmwareVersion, reconnect_delay: Duration) -> Self {
        let (state, _) = watch::channel(ConnectionState::Closed);
        let (readiness, _) = watch::channel(Readiness::Pending);
        Self {
            inner: Arc::new(SessionInner {
                connector,
                supported_firmware,
                reconnect_delay,
                channel: Arc::new(Mutex::new(None)),
                state,
                readiness,
                reconnect_pending: AtomicBool::new(false),
                cancel: CancellationToken::new(),
            }),
        }
    }

    // ── Lifecycle ────────────────────────────────────────────────

    /// Open the channel and identify the device.
    ///
    /// A no-op when the channel is already open. Wrong device family and
    /// unsupported firmware are reported as [`CoreError::Fatal`] and also
    /// published through [`readiness()`](Self::readiness).
    pub async fn open(&self) -> Result<DeviceInfo, CoreError> {
        let mut channel = self.inner.channel.lock().await;
        if channel.is_some() {
            if let Readiness::Ready(info) = &*self.inner.readiness.borrow() {
                return Ok(*info);
            }
        }

        self.inner.state.send_replace(ConnectionState::Connecting);
        debug!(device = %self.inner.connector.describe(), "opening device channel");

        match self.handshake().await {
            Ok((transport, info)) => {
                *channel = Some(transport);
                self.inner.state.send_replace(ConnectionState::Open);
                self.inner.readiness.send_replace(Readiness::Ready(info));
                info!(
                    firmware = %info.firmware,
                    initialised = if info.initialized { "yes" } else { "no" },
                    "Found Ryder device"
                );
                Ok(info)
            }
            Err(e) => {
                self.inner.state.send_replace(ConnectionState::Closed);
                if let CoreError::Fatal(fatal) = &e {
                    self.inner.readiness.send_replace(Readiness::Fatal(fatal.clone()));
                }
                Err(e)
            }
        }
    }

    async fn handshake(&self) -> Result<(C::Transport, DeviceInfo), CoreError> {
        let mut transport = self.inner.connector.connect().await?;
        match self.identify(&mut transport).await {
            Ok(info) => Ok((transport, info)),
            Err(e) => {
                transport.close().await;
                Err(e)
            }
        }
    }

    async fn identify(&self, transport: &mut C::Transport) -> Result<DeviceInfo, CoreError> {
        let port = self.inner.connector.describe();
        let info = match transport.exchange(&Command::new(opcode::INFO)).await? {
            Response::Output(bytes) => {
                DeviceInfo::parse(&bytes).map_err(|e| FatalError::NotRyderDevice {
                    port,
                    reason: e.to_string(),
                })?
            }
            other => {
                return Err(FatalError::NotRyderDevice {
                    port,
                    reason: format!("unexpected reply to info: {other}"),
                }
                .into());
            }
        };

        if info.firmware != self.inner.supported_firmware {
            return Err(FatalError::UnsupportedFirmware {
                found: info.firmware,
                supported: self.inner.supported_firmware,
            }
            .into());
        }
        Ok(info)
    }

    /// Close the channel. Safe to call repeatedly.
    pub async fn close(&self) {
        let mut channel = self.inner.channel.lock().await;
        if let Some(mut transport) = channel.take() {
            transport.close().await;
            debug!("device channel closed");
        }
        self.inner.state.send_replace(ConnectionState::Closed);
    }

    /// Stop any pending reconnect and close the channel for good.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();
        self.close().await;
    }

    // ── Exchanges ────────────────────────────────────────────────

    /// Wait for exclusive use of the channel.
    ///
    /// Callers are admitted in the order they arrive; the channel stays
    /// reserved until the returned [`Sequence`] is dropped.
    pub async fn admit(&self) -> Sequence<C> {
        Sequence {
            channel: Arc::clone(&self.inner.channel).lock_owned().await,
            session: self.clone(),
        }
    }

    /// Run `f` with exclusive use of the channel.
    pub async fn sequence<F, Fut, T>(&self, f: F) -> Result<T, CoreError>
    where
        F: FnOnce(Sequence<C>) -> Fut,
        Fut: Future<Output = Result<T, CoreError>>,
    {
        let seq = self.admit().await;
        f(seq).await
    }

    /// One exchange, admitted on its own.
    pub async fn send(&self, command: &Command) -> Result<Response, CoreError> {
        let mut seq = self.admit().await;
        seq.send(command).await
    }

    // ── Observation ──────────────────────────────────────────────

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    pub fn readiness(&self) -> watch::Receiver<Readiness> {
        self.inner.readiness.subscribe()
    }

    /// Resolve once the device has been identified, or with the fatal
    /// error that prevents it.
    pub async fn wait_ready(&self) -> Result<DeviceInfo, CoreError> {
        let mut rx = self.inner.readiness.subscribe();
        let current = rx
            .wait_for(|r| !matches!(r, Readiness::Pending))
            .await
            .map_err(|_| CoreError::DeviceUnavailable)?
            .clone();
        match current {
            Readiness::Ready(info) => Ok(info),
            Readiness::Fatal(fatal) => Err(fatal.into()),
            Readiness::Pending => Err(CoreError::Internal("readiness still pending".into())),
        }
    }

    // ── Reconnect ────────────────────────────────────────────────

    /// Schedule a reconnect after the configured delay. Calls made while one
    /// is already pending are absorbed.
    pub fn schedule_reconnect(&self) {
        if self.inner.cancel.is_cancelled() {
            return;
        }
        if self.inner.reconnect_pending.swap(true, Ordering::AcqRel) {
            debug!("reconnect already scheduled");
            return;
        }
        self.inner.state.send_replace(ConnectionState::Reconnecting);
        let session = self.clone();
        tokio::spawn(async move {
            session.reconnect_loop().await;
            session.inner.reconnect_pending.store(false, Ordering::Release);
        });
    }

    async fn reconnect_loop(&self) {
        let delay = self.inner.reconnect_delay;
        loop {
            info!(
                delay = %humantime::format_duration(delay),
                "reconnecting to device"
            );
            tokio::select! {
                biased;
                () = self.inner.cancel.cancelled() => return,
                () = tokio::time::sleep(delay) => {}
            }

            match self.open().await {
                Ok(_) => return,
                Err(e) if e.is_fatal() => {
                    warn!(error = %e, "device reconnect failed permanently");
                    return;
                }
                Err(e) => {
                    warn!(error = %e, "device reconnect failed");
                    self.inner.state.send_replace(ConnectionState::Reconnecting);
                }
            }
        }
    }
}

// ── Sequence ─────────────────────────────────────────────────────

/// Exclusive, admitted use of the device channel.
pub struct Sequence<C: Connector> {
    channel: OwnedMutexGuard<Option<C::Transport>>,
    session: DeviceSession<C>,
}

impl<C: Connector> Sequence<C> {
    /// Send one command and wait for its reply.
    ///
    /// A transport failure closes the channel, schedules a reconnect and
    /// fails this exchange.
    pub async fn send(&mut self, command: &Command) -> Result<Response, CoreError> {
        let Some(transport) = self.channel.as_mut() else {
            return Err(CoreError::NotConnected);
        };
        match transport.exchange(command).await {
            Ok(response) => Ok(response),
            Err(e) => {
                warn!(error = %e, opcode = ?command.opcode(), "device exchange failed");
                if let Some(mut transport) = self.channel.take() {
                    transport.close().await;
                }
                self.session.schedule_reconnect();
                Err(e.into())
            }
        }
    }
}
