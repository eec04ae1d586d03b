//! Command handling for fetch-relay.
//!
//! Wires the relay, dispatcher, control socket, and HTTP front together for
//! `serve`, and runs the client-side checks for `probe`.

use anyhow::{Context, Result, bail};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::cli::Commands;
use crate::config::Config;
use crate::control::{
    ClientToRelay, ControlSocketClient, ControlSocketServer, Dispatcher, INTEGRITY_CHECKSUM,
    RelayToClient, create_inbox,
};
use crate::proxy::ProxyServer;
use crate::relay::{ClientRegistry, HyperUpstream, Relay};
use crate::telemetry::AuditLogger;

/// How long `probe` waits for each answer.
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Run a parsed subcommand to completion.
pub fn handle_command(command: &Commands, config: Config) -> Result<()> {
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to create tokio runtime")?;

    match command {
        Commands::Serve(_) => rt.block_on(run_serve(config)),
        Commands::Probe { .. } => rt.block_on(run_probe(config)),
    }
}

/// Probe the configured relay and print what it answered.
async fn run_probe(config: Config) -> Result<()> {
    let report = probe(&config.socket_path()).await?;
    let verdict = if report.checksum_matches() {
        "match"
    } else {
        "MISMATCH"
    };

    println!("client id:  {}", report.client_id);
    println!("keepalive:  ok");
    println!("checksum:   {} ({})", report.checksum, verdict);

    if !report.checksum_matches() {
        bail!(
            "Relay checksum {} does not match {}",
            report.checksum,
            INTEGRITY_CHECKSUM
        );
    }
    Ok(())
}

/// Open the audit logger, falling back to a null logger when syslog is
/// disabled or unreachable.
fn open_audit_logger(use_syslog: bool) -> AuditLogger {
    if !use_syslog {
        return AuditLogger::new_null();
    }
    match AuditLogger::new() {
        Ok(logger) => logger,
        Err(e) => {
            warn!("Audit logging disabled: {}", e);
            AuditLogger::new_null()
        }
    }
}

/// Run the relay until Ctrl-C.
pub async fn run_serve(config: Config) -> Result<()> {
    let audit = Arc::new(open_audit_logger(config.audit_syslog()));
    let registry = Arc::new(ClientRegistry::new());
    let relay = Arc::new(Relay::new(
        config.relay_config(),
        registry.clone(),
        Arc::new(HyperUpstream::new()),
        audit,
    ));
    relay.install();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (inbox_tx, inbox_rx) = create_inbox();

    let socket_path = config.socket_path();
    let socket = ControlSocketServer::new(&socket_path)
        .with_context(|| format!("Failed to bind control socket {:?}", socket_path))?;

    let listen_addr = config.listen_addr().context("Invalid listen address")?;
    let proxy = ProxyServer::bind(listen_addr, relay.clone(), shutdown_rx.clone())
        .await
        .with_context(|| format!("Failed to bind HTTP front on {}", listen_addr))?;

    info!(
        "fetch-relay serving on {} (control socket {:?})",
        proxy.local_addr(),
        socket_path
    );

    let dispatcher = tokio::spawn(Dispatcher::new(relay.clone(), inbox_rx, shutdown_rx.clone()).run());
    let socket_task = tokio::spawn(socket.run(registry, inbox_tx, shutdown_rx));
    let proxy_task = tokio::spawn(proxy.run());

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutting down");
    let _ = shutdown_tx.send(true);

    dispatcher.await.context("Dispatcher task panicked")?;
    socket_task
        .await
        .context("Control socket task panicked")?
        .context("Control socket failed")?;
    proxy_task
        .await
        .context("HTTP front task panicked")?
        .context("HTTP front failed")?;

    Ok(())
}

/// What a running relay answered to `probe`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeReport {
    /// Id the relay assigned to the probe connection.
    pub client_id: String,
    /// Checksum the relay reported.
    pub checksum: String,
}

impl ProbeReport {
    /// Whether the relay speaks this build's protocol revision.
    pub fn checksum_matches(&self) -> bool {
        self.checksum == INTEGRITY_CHECKSUM
    }
}

/// Connect as a client, check keepalive and integrity, then disconnect.
pub async fn probe(socket_path: &Path) -> Result<ProbeReport> {
    let mut client = ControlSocketClient::connect(socket_path)
        .await
        .with_context(|| format!("Failed to connect to control socket {:?}", socket_path))?;

    client
        .send(ClientToRelay::KeepaliveRequest)
        .await
        .map_err(|_| anyhow::anyhow!("Relay closed the connection"))?;
    match tokio::time::timeout(PROBE_TIMEOUT, client.recv()).await {
        Ok(Some(RelayToClient::KeepaliveResponse)) => {}
        Ok(other) => bail!("Unexpected keepalive answer: {:?}", other),
        Err(_) => bail!("No keepalive answer within {:?}", PROBE_TIMEOUT),
    }

    client
        .send(ClientToRelay::IntegrityCheckRequest)
        .await
        .map_err(|_| anyhow::anyhow!("Relay closed the connection"))?;
    let checksum = match tokio::time::timeout(PROBE_TIMEOUT, client.recv()).await {
        Ok(Some(RelayToClient::IntegrityCheckResponse(checksum))) => checksum,
        Ok(other) => bail!("Unexpected integrity answer: {:?}", other),
        Err(_) => bail!("No integrity answer within {:?}", PROBE_TIMEOUT),
    };

    let _ = client.send(ClientToRelay::ClientClosed).await;

    Ok(ProbeReport {
        client_id: client.id().to_string(),
        checksum,
    })
}
