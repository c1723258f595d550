//! Daemon process: control port, session dispatch and shutdown.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use otpdec_config::AppConfig;

use crate::handshake::{self, HandshakeError};
use crate::ipc::IpcState;
use crate::registry::SessionRegistry;
use crate::session::{Session, SessionError};

/// Shutdown signal sent via broadcast channel.
#[derive(Debug, Clone)]
pub struct ShutdownSignal;

/// Counters published by the accept loop after every iteration.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaemonStats {
    pub control_port: u16,
    pub sessions_started: u64,
    pub sessions_completed: u64,
    pub sessions_failed: u64,
    pub sessions_outstanding: usize,
    pub handshakes_rejected: u64,
}

/// The otpdec daemon, bound to its control port.
pub struct Daemon {
    config: AppConfig,
    listener: TcpListener,
    shutdown_tx: broadcast::Sender<ShutdownSignal>,
    shutdown_rx: broadcast::Receiver<ShutdownSignal>,
    stats_tx: watch::Sender<DaemonStats>,
    started_at: Instant,
}

#[derive(Debug, thiserror::Error)]
enum ControlError {
    #[error(transparent)]
    Handshake(#[from] HandshakeError),

    #[error(transparent)]
    Session(#[from] SessionError),
}

impl Daemon {
    /// Bind the control port. Failure here is fatal for the daemon.
    pub async fn bind(mut config: AppConfig) -> Result<Self, DaemonError> {
        let addr = config.daemon.listen_addr.clone();
        let port = config.daemon.listen_port;
        let listener = TcpListener::bind((addr.as_str(), port))
            .await
            .map_err(|source| DaemonError::Bind {
                addr: format!("{addr}:{port}"),
                source,
            })?;

        let control_port = listener.local_addr()?.port();
        // Port 0 asks the OS to choose; keep the config truthful.
        config.daemon.listen_port = control_port;
        let (shutdown_tx, shutdown_rx) = broadcast::channel(4);
        let (stats_tx, _) = watch::channel(DaemonStats {
            control_port,
            ..DaemonStats::default()
        });

        Ok(Self {
            config,
            listener,
            shutdown_tx,
            shutdown_rx,
            stats_tx,
            started_at: Instant::now(),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Request a graceful shutdown of the accept loop.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(ShutdownSignal);
    }

    /// A sender that stops the daemon from outside [`Daemon::run`].
    pub fn shutdown_sender(&self) -> broadcast::Sender<ShutdownSignal> {
        self.shutdown_tx.clone()
    }

    /// Live counters, updated after every loop iteration.
    pub fn stats(&self) -> watch::Receiver<DaemonStats> {
        self.stats_tx.subscribe()
    }

    /// State for the admin IPC server.
    pub fn ipc_state(&self) -> Arc<IpcState> {
        Arc::new(IpcState {
            config: self.config.clone(),
            shutdown_tx: self.shutdown_tx.clone(),
            stats: self.stats(),
            started_at: self.started_at,
        })
    }

    /// Serve control connections until a shutdown signal or Ctrl-C.
    ///
    /// Shutdown closes the control port at once. Sessions already handed a
    /// port are then awaited, for at most the session timeouts, so no reply
    /// is cut off when the process exits.
    pub async fn run(self) -> Result<(), DaemonError> {
        let Daemon {
            config,
            listener,
            shutdown_tx,
            mut shutdown_rx,
            stats_tx,
            ..
        } = self;

        info!(
            addr = %config.daemon.listen_addr,
            port = listener.local_addr()?.port(),
            sessions = ?config.session.port_range(),
            framing = config.session.framing.as_str(),
            "otpdec daemon listening"
        );

        let mut registry = SessionRegistry::new();
        let mut rejected = 0u64;
        let mut next_id = 0u64;

        let mut reap_tick = tokio::time::interval(config.daemon.reap_interval());
        reap_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            registry.reap().await;
            publish(&stats_tx, &registry, rejected);

            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received, stopping daemon");
                    break;
                }
                _ = tokio::signal::ctrl_c() => {
                    warn!("Ctrl-C received, initiating graceful shutdown");
                    let _ = shutdown_tx.send(ShutdownSignal);
                    break;
                }
                _ = reap_tick.tick() => {}
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(conn) => conn,
                        Err(e) => {
                            warn!(error = %e, "Failed to accept control connection");
                            continue;
                        }
                    };
                    next_id += 1;
                    match dispatch(&config, stream, peer, next_id).await {
                        Ok(session) => registry.spawn(session, config.session.clone()),
                        Err(ControlError::Handshake(HandshakeError::SignatureMismatch)) => {
                            rejected += 1;
                            warn!(%peer, "Rejected client with wrong signature");
                        }
                        Err(ControlError::Handshake(e)) => {
                            rejected += 1;
                            debug!(%peer, error = %e, "Control connection dropped");
                        }
                        Err(ControlError::Session(e)) => {
                            warn!(%peer, error = %e, "Could not open a session port");
                        }
                    }
                }
            }
        }

        drop(listener);
        registry.reap().await;
        if registry.outstanding() > 0 {
            let grace = config.session.max_lifetime();
            info!(
                outstanding = registry.outstanding(),
                grace = ?grace,
                "Waiting for in-flight sessions to finish"
            );
            let reaped = registry.drain(grace).await;
            info!(
                completed = reaped.completed,
                failed = reaped.failed,
                "In-flight sessions finished"
            );
        }
        publish(&stats_tx, &registry, rejected);
        info!("Daemon stopped");
        Ok(())
    }
}

/// Handshake on one control connection, then reserve its session port.
async fn dispatch(
    config: &AppConfig,
    mut stream: TcpStream,
    peer: SocketAddr,
    id: u64,
) -> Result<Session, ControlError> {
    debug!(%peer, "Control connection accepted");
    handshake::verify_client(&mut stream, config.daemon.handshake_timeout()).await?;

    let session = Session::allocate(
        id,
        &config.daemon.listen_addr,
        config.session.port_range(),
    )
    .await?;

    handshake::announce_session(&mut stream, session.port()).await?;
    let _ = stream.shutdown().await;

    info!(session = id, port = session.port(), %peer, "Session port assigned");
    Ok(session)
}

fn publish(stats_tx: &watch::Sender<DaemonStats>, registry: &SessionRegistry, rejected: u64) {
    stats_tx.send_modify(|stats| {
        stats.sessions_started = registry.started();
        stats.sessions_completed = registry.completed();
        stats.sessions_failed = registry.failed();
        stats.sessions_outstanding = registry.outstanding();
        stats.handshakes_rejected = rejected;
    });
}

/// Errors from the daemon runtime.
#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    #[error("failed to bind control port {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
