//! Decode client: validate inputs locally, then run the two-phase exchange.
//!
//! 1. Load ciphertext and key, reject bad symbols or a short key.
//! 2. Control channel: present the signature, receive a session port.
//! 3. Data channel: send the frame, read the plaintext until EOF.

use std::path::Path;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use otpdec_config::{AppConfig, ClientConfig};

use crate::framing::{self, Frame, FrameMode, FramingError};
use crate::handshake::{self, HandshakeError};
use crate::key::KeyMaterial;
use crate::validate::{self, ValidationError};
use crate::within;

/// Errors from a decode run. Each maps to a process exit code.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("{path}: {source}")]
    Input {
        path: std::path::PathBuf,
        #[source]
        source: ValidationError,
    },

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("could not connect to {addr}: {source}")]
    Connect {
        addr: String,
        source: std::io::Error,
    },

    #[error("timed out connecting to {addr} after {after:?}")]
    ConnectTimeout { addr: String, after: Duration },

    #[error("handshake failed: {0}")]
    Handshake(#[from] HandshakeError),

    #[error("framing error: {0}")]
    Framing(#[from] FramingError),

    #[error("no reply within {0:?}")]
    ReplyTimeout(Duration),

    #[error("daemon closed the data channel without a reply")]
    EmptyReply,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ClientError {
    /// 1 for bad input, 2 for connection or handshake failures, 3 for a
    /// failed data exchange, 4 for local resource errors.
    pub fn exit_code(&self) -> u8 {
        match self {
            ClientError::Input { .. } | ClientError::Validation(_) => 1,
            ClientError::Connect { .. }
            | ClientError::ConnectTimeout { .. }
            | ClientError::Handshake(_) => 2,
            ClientError::Framing(_) | ClientError::ReplyTimeout(_) | ClientError::EmptyReply => 3,
            ClientError::Io(_) => 4,
        }
    }
}

/// Drives one decode against a running daemon.
#[derive(Debug, Clone)]
pub struct DecodeClient {
    config: ClientConfig,
    framing: FrameMode,
}

impl DecodeClient {
    pub fn new(config: ClientConfig, framing: FrameMode) -> Self {
        Self { config, framing }
    }

    /// Client settings plus the session framing the daemon expects.
    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(config.client.clone(), config.session.framing)
    }

    /// Validate both files and decode against the daemon on `port`.
    pub async fn run(
        &self,
        cipher_path: &Path,
        key_path: &Path,
        port: u16,
    ) -> Result<Vec<u8>, ClientError> {
        let frame = self.prepare(cipher_path, key_path).await?;
        self.exchange(&frame, port).await
    }

    /// Load and check the inputs. Nothing touches the network here.
    pub async fn prepare(&self, cipher_path: &Path, key_path: &Path) -> Result<Frame, ClientError> {
        let limit = self.config.max_file_bytes;
        let cipher = load_checked(cipher_path, limit).await?;
        let key = KeyMaterial::new(load_checked(key_path, limit).await?);

        let message = validate::strip_line(&cipher);
        let key_bytes = validate::strip_line(key.expose());
        validate::check_length(message, key_bytes)?;

        let used_key = &key_bytes[..message.len()];
        validate::check_single_line(message).map_err(|source| ClientError::Input {
            path: cipher_path.to_path_buf(),
            source,
        })?;
        validate::check_single_line(used_key).map_err(|source| ClientError::Input {
            path: key_path.to_path_buf(),
            source,
        })?;

        Ok(Frame::new(message, KeyMaterial::new(used_key))?)
    }

    /// Run the control handshake and the data exchange for `frame`.
    pub async fn exchange(&self, frame: &Frame, port: u16) -> Result<Vec<u8>, ClientError> {
        let io_timeout = self.config.io_timeout();

        let mut control = self.connect(port).await?;
        let session_port = handshake::negotiate(&mut control, io_timeout).await?;
        drop(control);
        debug!(session_port, "Handshake complete, opening data channel");

        let mut data = self.connect(session_port).await?;
        match framing::write_frame(&mut data, frame, self.framing).await {
            Err(FramingError::Io(e)) if closed_by_peer(&e) => return Err(ClientError::EmptyReply),
            result => result?,
        }
        match data.shutdown().await {
            Err(e) if closed_by_peer(&e) => return Err(ClientError::EmptyReply),
            result => result?,
        }

        let mut reply = Vec::new();
        let read = within(io_timeout, data.read_to_end(&mut reply))
            .await
            .map_err(|_| ClientError::ReplyTimeout(io_timeout.unwrap_or_default()))?;
        match read {
            // A daemon that gave up on the frame may reset instead of closing.
            Err(e) if closed_by_peer(&e) && reply.is_empty() => return Err(ClientError::EmptyReply),
            result => result?,
        };

        if reply.is_empty() {
            return Err(ClientError::EmptyReply);
        }
        debug!(len = reply.len(), "Reply received");
        Ok(reply)
    }

    async fn connect(&self, port: u16) -> Result<TcpStream, ClientError> {
        let addr = format!("{}:{port}", self.config.host);
        let timeout = self.config.connect_timeout();
        match within(timeout, TcpStream::connect((self.config.host.as_str(), port))).await {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(source)) => Err(ClientError::Connect { addr, source }),
            Err(_) => Err(ClientError::ConnectTimeout {
                addr,
                after: timeout.unwrap_or_default(),
            }),
        }
    }
}

/// The daemon hung up on the data channel.
fn closed_by_peer(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::NotConnected
    )
}

async fn load_checked(path: &Path, limit: usize) -> Result<Vec<u8>, ClientError> {
    let bytes = validate::load_input(path, limit).await?;
    validate::validate(&bytes).map_err(|source| ClientError::Input {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(bytes)
}
