// ── Cross-worker device calls ──
//
// Workers never touch the device session directly. They hold a
// `DeviceClient` and send typed calls to the `DeviceService`, which owns
// the session and answers each call through its own oneshot channel.

use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use ryder_proto::Connector;

use crate::error::CoreError;
use crate::export::{AppKeyExport, PublicIdentity};
use crate::session::DeviceSession;

const CALL_CHANNEL_SIZE: usize = 64;

// ── Calls ────────────────────────────────────────────────────────

/// Operations exposed by the device owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceCall {
    ExportPublicIdentity { number: u8 },
    RequestAppPrivateKey { number: u8, app_domain: String },
}

impl DeviceCall {
    pub fn name(&self) -> &'static str {
        match self {
            Self::ExportPublicIdentity { .. } => "export_public_identity",
            Self::RequestAppPrivateKey { .. } => "request_app_private_key",
        }
    }
}

#[derive(Debug, Clone)]
pub enum CallReply {
    Identity(PublicIdentity),
    AppKey(AppKeyExport),
}

/// A call paired with the channel its reply goes back on.
pub struct CallEnvelope {
    pub call: DeviceCall,
    pub reply_tx: oneshot::Sender<Result<CallReply, CoreError>>,
}

// ── Owning side ──────────────────────────────────────────────────

/// Serves [`DeviceCall`]s against the session.
pub struct DeviceService;

impl DeviceService {
    /// Start serving calls until `cancel` fires or every client is dropped.
    pub fn spawn<C: Connector>(
        session: DeviceSession<C>,
        cancel: CancellationToken,
        call_timeout: Option<Duration>,
    ) -> (DeviceClient, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(CALL_CHANNEL_SIZE);
        let handle = tokio::spawn(call_processor_task(session, rx, cancel));
        (DeviceClient { tx, call_timeout }, handle)
    }
}

async fn call_processor_task<C: Connector>(
    session: DeviceSession<C>,
    mut rx: mpsc::Receiver<CallEnvelope>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            envelope = rx.recv() => {
                let Some(envelope) = envelope else { break };
                // Each call runs to completion on its own task; the session
                // orders the exchanges.
                let session = session.clone();
                tokio::spawn(async move {
                    let name = envelope.call.name();
                    let result = route_call(&session, envelope.call).await;
                    if envelope.reply_tx.send(result).is_err() {
                        debug!(call = name, "caller went away before the reply");
                    }
                });
            }
        }
    }
    debug!("device service stopped");
}

async fn route_call<C: Connector>(
    session: &DeviceSession<C>,
    call: DeviceCall,
) -> Result<CallReply, CoreError> {
    match call {
        DeviceCall::ExportPublicIdentity { number } => session
            .export_public_identity(number)
            .await
            .map(CallReply::Identity),
        DeviceCall::RequestAppPrivateKey { number, app_domain } => session
            .request_app_private_key(number, app_domain)
            .await
            .map(CallReply::AppKey),
    }
}

// ── Calling side ─────────────────────────────────────────────────

/// Cheaply cloneable handle for issuing device calls.
#[derive(Clone)]
pub struct DeviceClient {
    tx: mpsc::Sender<CallEnvelope>,
    call_timeout: Option<Duration>,
}

impl DeviceClient {
    /// Issue a call and wait for its reply.
    ///
    /// Fails with [`CoreError::DeviceUnavailable`] when the owning side is
    /// gone, and with [`CoreError::CallTimeout`] when a timeout is set and
    /// elapses.
    pub async fn call(&self, call: DeviceCall) -> Result<CallReply, CoreError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(CallEnvelope { call, reply_tx })
            .await
            .map_err(|_| CoreError::DeviceUnavailable)?;

        let reply = match self.call_timeout {
            Some(timeout) => tokio::time::timeout(timeout, reply_rx)
                .await
                .map_err(|_| CoreError::CallTimeout {
                    timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                })?,
            None => reply_rx.await,
        };
        reply.map_err(|_| CoreError::DeviceUnavailable)?
    }

    pub async fn export_public_identity(&self, number: u8) -> Result<PublicIdentity, CoreError> {
        match self.call(DeviceCall::ExportPublicIdentity { number }).await? {
            CallReply::Identity(identity) => Ok(identity),
            CallReply::AppKey(_) => Err(CoreError::Internal(
                "export_public_identity answered with an app key".into(),
            )),
        }
    }

    pub async fn request_app_private_key(
        &self,
        number: u8,
        app_domain: impl Into<String>,
    ) -> Result<AppKeyExport, CoreError> {
        let call = DeviceCall::RequestAppPrivateKey {
            number,
            app_domain: app_domain.into(),
        };
        match self.call(call).await? {
            CallReply::AppKey(export) => Ok(export),
            CallReply::Identity(_) => Err(CoreError::Internal(
                "request_app_private_key answered with an identity".into(),
            )),
        }
    }

    /// `true` once the owning side has stopped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
