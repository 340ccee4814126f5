// ── Websocket worker ──
//
// One worker accepts browser connections from the shared loopback
// listener and serves the auth bridge protocol on each. Device access
// goes through the `DeviceClient`; every worker owns its own name cache.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::auth::AuthProtocol;
use crate::bridge::{BridgeHandler, HandlerSettings, Inbound, Outbound};
use crate::error::CoreError;
use crate::ipc::DeviceClient;
use crate::names::NameCache;
use crate::pool::{WorkerExit, WorkerFactory};

/// Everything a worker needs, shared by all workers of a pool.
#[derive(Clone)]
pub struct WorkerContext {
    pub device: DeviceClient,
    pub auth: Arc<dyn AuthProtocol>,
    pub listener: Arc<TcpListener>,
    pub settings: HandlerSettings,
    pub http: reqwest::Client,
    pub name_cache_ttl: Duration,
}

/// [`WorkerFactory`] producing websocket workers.
#[derive(Clone)]
pub struct BridgeWorkers {
    ctx: WorkerContext,
}

impl BridgeWorkers {
    pub fn new(ctx: WorkerContext) -> Self {
        Self { ctx }
    }
}

impl WorkerFactory for BridgeWorkers {
    fn spawn(
        &self,
        id: usize,
        shutdown: CancellationToken,
    ) -> impl Future<Output = WorkerExit> + Send + 'static {
        run_worker(id, self.ctx.clone(), shutdown)
    }
}

/// Accept and serve connections until shutdown or until the device
/// service is lost.
pub async fn run_worker(id: usize, ctx: WorkerContext, shutdown: CancellationToken) -> WorkerExit {
    let names = Arc::new(NameCache::new(
        ctx.http.clone(),
        ctx.settings.api_url.clone(),
        ctx.name_cache_ttl,
    ));
    let handler = BridgeHandler::new(ctx.device.clone(), names, Arc::clone(&ctx.auth), ctx.settings.clone());
    let device_lost = CancellationToken::new();
    let mut connections = JoinSet::new();
    debug!(worker = id, "worker started");

    let exit = loop {
        tokio::select! {
            biased;
            () = shutdown.cancelled() => break WorkerExit::Graceful,
            () = device_lost.cancelled() => {
                break WorkerExit::Fatal("device service unavailable".into());
            }
            accepted = ctx.listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    if !is_local(&peer) {
                        info!(worker = id, %peer, "Rejected non-local connection");
                        continue;
                    }
                    connections.spawn(serve_connection(
                        stream,
                        peer,
                        handler.clone(),
                        shutdown.clone(),
                        device_lost.clone(),
                    ));
                }
                Err(e) => break WorkerExit::Restartable(format!("accept failed: {e}")),
            },
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    };

    if matches!(exit, WorkerExit::Graceful) {
        while connections.join_next().await.is_some() {}
    } else {
        connections.shutdown().await;
    }
    debug!(worker = id, ?exit, "worker stopped");
    exit
}

/// Loopback peers only, including IPv4-mapped IPv6 loopback.
pub fn is_local(peer: &SocketAddr) -> bool {
    peer.ip().to_canonical().is_loopback()
}

async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    handler: BridgeHandler,
    shutdown: CancellationToken,
    device_lost: CancellationToken,
) {
    let ws = match tokio_tungstenite::accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            debug!(%peer, error = %e, "websocket handshake failed");
            return;
        }
    };
    debug!(%peer, "Incoming connection");

    let (mut write, mut read) = ws.split();
    let (sink, mut events) = mpsc::unbounded_channel::<Outbound>();
    let writer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let text = match event.to_json() {
                Ok(text) => text,
                Err(e) => {
                    warn!(error = %e, "failed to serialize event");
                    continue;
                }
            };
            if write.send(Message::text(text)).await.is_err() {
                break;
            }
        }
        if let Err(e) = write.close().await {
            debug!(error = %e, "websocket close failed");
        }
    });

    let mut requests = JoinSet::new();
    let shutting_down = loop {
        tokio::select! {
            biased;
            () = shutdown.cancelled() => break true,
            () = device_lost.cancelled() => break true,
            frame = read.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    let message = match Inbound::parse(text.as_str()) {
                        Ok(Some(message)) => message,
                        Ok(None) => {
                            debug!(%peer, "dropping unusable message");
                            continue;
                        }
                        Err(e) => {
                            error!(%peer, error = %e, "invalid JSON from client");
                            continue;
                        }
                    };
                    let handler = handler.clone();
                    let sink = sink.clone();
                    let device_lost = device_lost.clone();
                    requests.spawn(async move {
                        if let Err(CoreError::DeviceUnavailable) = handler.handle(message, &sink).await {
                            error!("lost the device service");
                            device_lost.cancel();
                        }
                    });
                }
                Some(Ok(Message::Close(_))) | None => break false,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(%peer, error = %e, "websocket read failed");
                    break false;
                }
            },
            Some(_) = requests.join_next(), if !requests.is_empty() => {}
        }
    };

    if shutting_down {
        requests.shutdown().await;
    } else {
        // Let in-flight requests finish; their device calls complete anyway.
        requests.detach_all();
    }
    drop(sink);
    if let Err(e) = writer.await {
        debug!(%peer, error = %e, "connection writer task failed");
    }
    debug!(%peer, "connection closed");
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn only_loopback_peers_are_local() {
        for local in ["127.0.0.1:5000", "[::1]:5000", "[::ffff:127.0.0.1]:5000"] {
            assert!(is_local(&local.parse().unwrap()), "{local}");
        }
        for remote in ["192.168.1.20:5000", "[fe80::1]:5000", "[::ffff:10.0.0.1]:5000"] {
            assert!(!is_local(&remote.parse().unwrap()), "{remote}");
        }
    }
}
