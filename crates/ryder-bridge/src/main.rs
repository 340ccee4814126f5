mod cli;
mod error;

use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use ryder_core::names::build_http_client;
use ryder_core::{
    BlockstackAuth, BridgeConfig, BridgeWorkers, DeviceService, DeviceSession, FatalError,
    HandlerSettings, PoolOutcome, Readiness, WorkerContext, WorkerPool,
};
use ryder_proto::{Connector, SerialConnector};

use crate::cli::Cli;
use crate::error::BridgeError;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Held for the life of the process so buffered file logs get flushed.
    let _log_guard = match init_tracing(&cli) {
        Ok(guard) => guard,
        Err(err) => exit_with(err),
    };

    if let Err(err) = run(cli).await {
        exit_with(err);
    }
}

fn exit_with(err: BridgeError) -> ! {
    let code = err.exit_code();
    eprintln!("{:?}", miette::Report::new(err));
    std::process::exit(code);
}

fn init_tracing(cli: &Cli) -> Result<Option<WorkerGuard>, BridgeError> {
    let level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let (writer, guard) = match &cli.log_file {
        Some(path) => {
            let (writer, guard) = tracing_appender::non_blocking(file_appender(path)?);
            (BoxMakeWriter::new(writer), Some(guard))
        }
        None => (BoxMakeWriter::new(std::io::stderr), None),
    };

    let layer = if cli.log_json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(writer)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_ansi(guard.is_none())
            .with_writer(writer)
            .boxed()
    };

    tracing_subscriber::registry().with(filter).with(layer).init();
    Ok(guard)
}

fn file_appender(path: &Path) -> Result<RollingFileAppender, BridgeError> {
    let log_file_error = |source: Box<dyn std::error::Error + Send + Sync>| BridgeError::LogFile {
        path: path.display().to_string(),
        source,
    };
    let name = path
        .file_name()
        .ok_or_else(|| log_file_error("not a file path".into()))?;
    let dir = path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

    RollingFileAppender::builder()
        .rotation(Rotation::NEVER)
        .filename_prefix(name.to_string_lossy())
        .build(dir)
        .map_err(|e| log_file_error(Box::new(e)))
}

async fn run(cli: Cli) -> Result<(), BridgeError> {
    let config = ryder_config::load(cli.config.as_deref(), &cli.overrides())?;
    if cli.print_config {
        print!("{}", config.to_toml()?);
        return Ok(());
    }
    let config = config.to_bridge_config()?;
    info!(version = env!("CARGO_PKG_VERSION"), "Ryder bridge version");

    let shutdown = CancellationToken::new();
    tokio::spawn(watch_signals(shutdown.clone()));

    let connector = SerialConnector::new(&config.device_port, config.baud_rate)
        .with_frame_tracing(config.debug_serial);
    let session = DeviceSession::new(connector, config.supported_firmware, config.reconnect_delay);

    let result = serve(&config, &session, &shutdown).await;
    session.shutdown().await;
    result
}

/// Bring the device up, then run the worker pool until shutdown.
async fn serve<C: Connector>(
    config: &BridgeConfig,
    session: &DeviceSession<C>,
    shutdown: &CancellationToken,
) -> Result<(), BridgeError> {
    match session.open().await {
        Ok(_) => {}
        Err(e) if e.is_fatal() => return Err(e.into()),
        Err(e) => {
            warn!(error = %e, port = %config.device_port, "Ryder device not available, waiting");
            session.schedule_reconnect();
            tokio::select! {
                () = shutdown.cancelled() => return Ok(()),
                ready = session.wait_ready() => { ready?; }
            }
        }
    }

    let listener = TcpListener::bind(config.listen_addr())
        .await
        .map_err(|source| BridgeError::Bind {
            addr: config.listen_addr().to_string(),
            source,
        })?;
    info!(url = %config.bridge_url(), workers = config.workers, "listening for browser connections");

    let service_cancel = CancellationToken::new();
    let (device, service) =
        DeviceService::spawn(session.clone(), service_cancel.clone(), config.call_timeout);

    let ctx = WorkerContext {
        device,
        auth: Arc::new(BlockstackAuth::new()),
        listener: Arc::new(listener),
        settings: HandlerSettings::from_config(config),
        http: build_http_client(config.lookup_timeout)?,
        name_cache_ttl: config.name_cache_ttl,
    };
    let pool = WorkerPool::new(config.workers, BridgeWorkers::new(ctx), shutdown.clone());

    let run = pool.run();
    tokio::pin!(run);
    let mut device_fatal = None;
    let outcome = loop {
        tokio::select! {
            outcome = &mut run => break outcome,
            fatal = device_failure(session), if device_fatal.is_none() => {
                error!(error = %fatal, "device can no longer be used, shutting down");
                device_fatal = Some(fatal);
                shutdown.cancel();
            }
        }
    };

    service_cancel.cancel();
    if let Err(e) = service.await {
        debug!(error = %e, "device service task failed");
    }

    if let Some(fatal) = device_fatal {
        return Err(BridgeError::Device(fatal));
    }
    match outcome {
        PoolOutcome::Shutdown => {
            info!("all workers stopped");
            Ok(())
        }
        PoolOutcome::AllFatal => Err(BridgeError::AllWorkersFatal),
    }
}

/// Resolve when a reconnect finds the device unusable.
async fn device_failure<C: Connector>(session: &DeviceSession<C>) -> FatalError {
    let mut readiness = session.readiness();
    loop {
        if let Readiness::Fatal(fatal) = &*readiness.borrow_and_update() {
            return fatal.clone();
        }
        if readiness.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

async fn watch_signals(shutdown: CancellationToken) {
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "cannot listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
    info!("shutting down, waiting for connections to close");
    shutdown.cancel();
}
