//! A daemon running in the background of a test.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use tempfile::TempDir;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use otpdec_config::AppConfig;
use otpdec_core::daemon::{DaemonError, DaemonStats, ShutdownSignal};
use otpdec_core::ipc::{self, IpcClient};
use otpdec_core::{Daemon, DecodeClient};

/// A daemon bound to an OS-assigned control port and run as a task.
///
/// The admin socket lives in a private temp directory. Dropping the value
/// signals shutdown.
pub struct TestDaemon {
    pub addr: SocketAddr,
    pub config: AppConfig,
    pub socket_path: PathBuf,
    stats: watch::Receiver<DaemonStats>,
    shutdown_tx: broadcast::Sender<ShutdownSignal>,
    handle: Option<JoinHandle<Result<(), DaemonError>>>,
    _temp_dir: TempDir,
}

impl TestDaemon {
    pub async fn start(mut config: AppConfig) -> Self {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let socket_path = temp_dir.path().join("otpdec.sock");
        config.daemon.socket_path = Some(socket_path.display().to_string());

        let daemon = Daemon::bind(config.clone())
            .await
            .expect("failed to bind test daemon");
        let addr = daemon.local_addr().expect("no local address");
        config.daemon.listen_port = addr.port();

        let stats = daemon.stats();
        let shutdown_tx = daemon.shutdown_sender();

        let ipc_state = daemon.ipc_state();
        let ipc_shutdown = shutdown_tx.subscribe();
        let ipc_path = socket_path.clone();
        tokio::spawn(async move {
            let _ = ipc::server::serve(&ipc_path, ipc_state, ipc_shutdown).await;
        });

        let handle = tokio::spawn(daemon.run());

        Self {
            addr,
            config,
            socket_path,
            stats,
            shutdown_tx,
            handle: Some(handle),
            _temp_dir: temp_dir,
        }
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// A decode client configured to match this daemon.
    pub fn client(&self) -> DecodeClient {
        DecodeClient::from_config(&self.config)
    }

    /// An admin client for this daemon's socket, once it is listening.
    pub async fn ipc_client(&self) -> IpcClient {
        for _ in 0..100 {
            if self.socket_path.exists() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        IpcClient::new(&self.socket_path)
    }

    pub fn stats(&self) -> DaemonStats {
        self.stats.borrow().clone()
    }

    /// Wait until the published stats satisfy `pred`.
    pub async fn wait_for_stats(&mut self, pred: impl Fn(&DaemonStats) -> bool) -> DaemonStats {
        let result = tokio::time::timeout(Duration::from_secs(5), self.stats.wait_for(|s| pred(s)))
            .await
            .expect("timed out waiting for daemon stats")
            .expect("daemon stopped publishing stats");
        (*result).clone()
    }

    /// Signal shutdown and wait for the accept loop to return.
    pub async fn stop(mut self) -> Result<(), DaemonError> {
        let _ = self.shutdown_tx.send(ShutdownSignal);
        match self.handle.take() {
            Some(handle) => handle.await.expect("daemon task panicked"),
            None => Ok(()),
        }
    }

    /// Whether the accept loop has exited.
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(|h| h.is_finished())
    }
}

impl Drop for TestDaemon {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(ShutdownSignal);
    }
}
