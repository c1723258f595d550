//! IPC client: typed HTTP/1.1 calls to the daemon over its Unix socket.

use std::path::PathBuf;

use hyper::body::Bytes;
use hyper_util::rt::TokioIo;
use serde::de::DeserializeOwned;
use tokio::net::UnixStream;
use tracing::debug;

use super::types::*;

/// Errors from the IPC client.
#[derive(Debug, thiserror::Error)]
pub enum IpcClientError {
    #[error("failed to connect to daemon socket at {path}: {source}")]
    Connect {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("daemon is not running (socket not found at {0})")]
    NotRunning(PathBuf),

    #[error("request failed: {0}")]
    Request(String),

    #[error("failed to parse {endpoint} response: {source}")]
    Parse {
        endpoint: &'static str,
        source: serde_json::Error,
    },

    #[error("daemon returned error: {0}")]
    DaemonError(String),
}

/// Client for the daemon's admin socket.
pub struct IpcClient {
    socket_path: PathBuf,
}

impl IpcClient {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
        }
    }

    /// Whether the socket file exists. A stale file still reports `true`.
    pub fn daemon_available(&self) -> bool {
        self.socket_path.exists()
    }

    async fn request(&self, method: hyper::Method, path: &str) -> Result<Bytes, IpcClientError> {
        if !self.daemon_available() {
            return Err(IpcClientError::NotRunning(self.socket_path.clone()));
        }

        let stream =
            UnixStream::connect(&self.socket_path)
                .await
                .map_err(|source| IpcClientError::Connect {
                    path: self.socket_path.clone(),
                    source,
                })?;

        let (mut sender, conn) = hyper::client::conn::http1::handshake::<
            _,
            http_body_util::Empty<Bytes>,
        >(TokioIo::new(stream))
        .await
        .map_err(|e| IpcClientError::Request(format!("HTTP handshake failed: {e}")))?;

        tokio::spawn(async move {
            if let Err(e) = conn.await {
                tracing::warn!(error = %e, "IPC connection error");
            }
        });

        debug!(%method, path, "IPC request");

        let req = hyper::Request::builder()
            .method(method)
            .uri(path)
            .header("host", "localhost")
            .body(http_body_util::Empty::new())
            .map_err(|e| IpcClientError::Request(format!("failed to build request: {e}")))?;

        let resp = sender
            .send_request(req)
            .await
            .map_err(|e| IpcClientError::Request(e.to_string()))?;
        let status = resp.status();

        let body = http_body_util::BodyExt::collect(resp.into_body())
            .await
            .map_err(|e| IpcClientError::Request(format!("failed to read response body: {e}")))?
            .to_bytes();

        if !status.is_success() {
            if let Ok(err) = serde_json::from_slice::<ErrorResponse>(&body) {
                return Err(IpcClientError::DaemonError(err.error));
            }
            return Err(IpcClientError::Request(format!(
                "unexpected status: {status}"
            )));
        }

        Ok(body)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        method: hyper::Method,
        endpoint: &'static str,
    ) -> Result<T, IpcClientError> {
        let body = self.request(method, endpoint).await?;
        serde_json::from_slice(&body).map_err(|source| IpcClientError::Parse { endpoint, source })
    }

    pub async fn health(&self) -> Result<HealthResponse, IpcClientError> {
        self.get_json(hyper::Method::GET, "/health").await
    }

    /// Runtime status including live session counters.
    pub async fn status(&self) -> Result<StatusResponse, IpcClientError> {
        self.get_json(hyper::Method::GET, "/status").await
    }

    /// Ask the daemon to stop accepting control connections.
    pub async fn stop(&self) -> Result<StopResponse, IpcClientError> {
        self.get_json(hyper::Method::POST, "/stop").await
    }

    pub async fn config(&self) -> Result<ConfigResponse, IpcClientError> {
        self.get_json(hyper::Method::GET, "/config").await
    }
}
