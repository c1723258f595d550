//! Ephemeral data-channel sessions.
//!
//! A [`Session`] is one listener on a freshly drawn port, created for
//! exactly one client. Its worker accepts a single connection, reads one
//! frame, writes the decoded bytes back and finishes. The listener is closed
//! as soon as the client has connected.

use std::net::SocketAddr;
use std::ops::RangeInclusive;
use std::time::Duration;

use rand::Rng;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::debug;

use otpdec_config::SessionConfig;

use crate::cipher::CipherError;
use crate::framing::{self, FramingError};
use crate::within;

/// Errors that end one session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("failed to bind session port {port}: {source}")]
    Bind {
        port: u16,
        source: std::io::Error,
    },

    #[error("no client connected within {0:?}")]
    AcceptTimeout(Duration),

    #[error("frame not received within {0:?}")]
    ReadTimeout(Duration),

    #[error("client did not take the reply within {0:?}")]
    WriteTimeout(Duration),

    #[error("framing error: {0}")]
    Framing(#[from] FramingError),

    #[error("cipher error: {0}")]
    Cipher(#[from] CipherError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Summary of a session that delivered its reply.
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub id: u64,
    pub port: u16,
    pub peer: SocketAddr,
    pub message_len: usize,
}

/// A listener reserved for one client.
#[derive(Debug)]
pub struct Session {
    id: u64,
    port: u16,
    listener: TcpListener,
}

impl Session {
    /// Bind a session listener on a port drawn uniformly from `range`.
    ///
    /// Ports already in use are skipped by drawing again, without bound.
    pub async fn allocate(
        id: u64,
        addr: &str,
        range: RangeInclusive<u16>,
    ) -> Result<Self, SessionError> {
        Self::bind_first_free(id, addr, || rand::rng().random_range(range.clone())).await
    }

    /// Bind the first port from `next_port` that is not in use.
    pub async fn bind_first_free(
        id: u64,
        addr: &str,
        mut next_port: impl FnMut() -> u16,
    ) -> Result<Self, SessionError> {
        loop {
            let port = next_port();
            match TcpListener::bind((addr, port)).await {
                Ok(listener) => {
                    // Port 0 asks the OS to choose; report what it picked.
                    let port = listener.local_addr()?.port();
                    return Ok(Self { id, port, listener });
                }
                Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => {
                    debug!(session = id, port, "Session port in use, drawing again");
                    tokio::task::yield_now().await;
                }
                Err(source) => return Err(SessionError::Bind { port, source }),
            }
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Accept one client, decode its frame and reply.
    ///
    /// A frame that fails to parse or decode gets no reply. The connection is
    /// still closed cleanly, so the client sees an empty stream rather than a
    /// reset.
    pub async fn serve(self, config: SessionConfig) -> Result<SessionReport, SessionError> {
        let Session { id, port, listener } = self;

        let accept_timeout = config.accept_timeout();
        let (mut stream, peer) = within(accept_timeout, listener.accept())
            .await
            .map_err(|_| SessionError::AcceptTimeout(accept_timeout.unwrap_or_default()))??;
        drop(listener);
        debug!(session = id, port, %peer, "Data channel connected");

        let outcome = respond(&mut stream, &config).await;
        // After a timeout the client has stopped talking; there is nothing
        // left to drain.
        if matches!(
            outcome,
            Ok(_) | Err(SessionError::Framing(_) | SessionError::Cipher(_))
        ) {
            close_gracefully(&mut stream, &config).await;
        }
        let message_len = outcome?;

        debug!(session = id, port, len = message_len, "Reply sent");
        Ok(SessionReport {
            id,
            port,
            peer,
            message_len,
        })
    }
}

/// Read one frame, decode it and write the plaintext back.
async fn respond<S>(stream: &mut S, config: &SessionConfig) -> Result<usize, SessionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let io_timeout = config.io_timeout();
    let frame = within(
        io_timeout,
        framing::read_frame(&mut *stream, config.framing, config.max_payload_bytes),
    )
    .await
    .map_err(|_| SessionError::ReadTimeout(io_timeout.unwrap_or_default()))??;

    let message_len = frame.message.len();
    let plaintext = frame.decode()?;
    drop(frame);

    within(io_timeout, stream.write_all(&plaintext))
        .await
        .map_err(|_| SessionError::WriteTimeout(io_timeout.unwrap_or_default()))??;
    Ok(message_len)
}

/// Send FIN, then drain unread input so the close is not a reset that could
/// discard the reply before the client reads it.
async fn close_gracefully<S>(stream: &mut S, config: &SessionConfig)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    if stream.shutdown().await.is_err() {
        return;
    }
    let mut rest = (&mut *stream).take(config.max_payload_bytes as u64);
    let _ = within(
        config.io_timeout(),
        tokio::io::copy(&mut rest, &mut tokio::io::sink()),
    )
    .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpStream;

    fn test_config() -> SessionConfig {
        SessionConfig {
            accept_timeout_secs: 5,
            io_timeout_secs: 5,
            ..SessionConfig::default()
        }
    }

    #[tokio::test]
    async fn test_allocate_within_range() {
        let session = Session::allocate(1, "127.0.0.1", 50000..=59999).await.unwrap();
        assert!((50000..=59999).contains(&session.port()));
        assert_eq!(session.id(), 1);
    }

    #[tokio::test]
    async fn test_busy_port_is_skipped() {
        let held = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let busy = held.local_addr().unwrap().port();

        let mut draws = vec![0, busy, busy];
        let mut attempts = 0;
        let session = Session::bind_first_free(7, "127.0.0.1", || {
            attempts += 1;
            draws.pop().unwrap()
        })
        .await
        .unwrap();

        assert_eq!(attempts, 3);
        assert_ne!(session.port(), busy);
    }

    #[tokio::test]
    async fn test_bind_error_is_not_retried() {
        let result = Session::bind_first_free(1, "203.0.113.1", || 50001).await;
        assert!(matches!(result, Err(SessionError::Bind { port: 50001, .. })));
    }

    #[tokio::test]
    async fn test_serve_decodes_one_client() {
        let session = Session::allocate(3, "127.0.0.1", 50000..=59999).await.unwrap();
        let port = session.port();
        let worker = tokio::spawn(session.serve(test_config()));

        let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        stream.write_all(b"FG\nZZ\n").await.unwrap();
        stream.shutdown().await.unwrap();
        let mut reply = Vec::new();
        stream.read_to_end(&mut reply).await.unwrap();
        assert_eq!(reply, b"HI");

        let report = worker.await.unwrap().unwrap();
        assert_eq!(report.id, 3);
        assert_eq!(report.message_len, 2);
    }

    #[tokio::test]
    async fn test_listener_closed_after_accept() {
        let session = Session::allocate(4, "127.0.0.1", 50000..=59999).await.unwrap();
        let port = session.port();
        let worker = tokio::spawn(session.serve(test_config()));

        let mut first = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        first.write_all(b"A\nA\n").await.unwrap();
        first.shutdown().await.unwrap();
        let mut reply = Vec::new();
        first.read_to_end(&mut reply).await.unwrap();
        assert_eq!(reply, b"A");
        worker.await.unwrap().unwrap();

        assert!(TcpStream::connect(("127.0.0.1", port)).await.is_err());
    }

    #[tokio::test]
    async fn test_truncated_frame_gets_no_reply() {
        let session = Session::allocate(5, "127.0.0.1", 50000..=59999).await.unwrap();
        let port = session.port();
        let worker = tokio::spawn(session.serve(test_config()));

        let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        stream.write_all(b"ABCD\nXYZ").await.unwrap();
        stream.shutdown().await.unwrap();
        let mut reply = Vec::new();
        let _ = stream.read_to_end(&mut reply).await;
        assert!(reply.is_empty());

        let err = worker.await.unwrap().unwrap_err();
        assert!(matches!(
            err,
            SessionError::Framing(FramingError::Truncated { .. })
        ));
    }

    #[tokio::test]
    async fn test_invalid_symbol_gets_no_reply() {
        let session = Session::allocate(6, "127.0.0.1", 50000..=59999).await.unwrap();
        let port = session.port();
        let worker = tokio::spawn(session.serve(test_config()));

        let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        stream.write_all(b"ab\nZZ\n").await.unwrap();
        stream.shutdown().await.unwrap();
        let mut reply = Vec::new();
        let _ = stream.read_to_end(&mut reply).await;
        assert!(reply.is_empty());

        assert!(matches!(
            worker.await.unwrap(),
            Err(SessionError::Cipher(_))
        ));
    }

    #[tokio::test]
    async fn test_oversized_frame_is_closed_cleanly() {
        let session = Session::allocate(9, "127.0.0.1", 50000..=59999).await.unwrap();
        let port = session.port();
        let config = SessionConfig {
            max_payload_bytes: 16,
            ..test_config()
        };
        let worker = tokio::spawn(session.serve(config));

        let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        stream.write_all(b"ABCDEFGHIJ
KKKKKKKKKK
").await.unwrap();
        stream.shutdown().await.unwrap();
        let mut reply = Vec::new();
        stream.read_to_end(&mut reply).await.unwrap();
        assert!(reply.is_empty());

        assert!(matches!(
            worker.await.unwrap(),
            Err(SessionError::Framing(FramingError::CapacityExceeded { limit: 16 }))
        ));
    }

    #[tokio::test]
    async fn test_reply_write_times_out() {
        let (mut server, mut client) = tokio::io::duplex(16);
        let config = SessionConfig {
            io_timeout_secs: 1,
            ..test_config()
        };
        let message = "A".repeat(64);
        let frame = format!("{message}\n{message}\n");

        // The client sends its frame and then never reads.
        let sender = tokio::spawn(async move {
            client.write_all(frame.as_bytes()).await.unwrap();
            client
        });

        let result = respond(&mut server, &config).await;
        assert!(matches!(result, Err(SessionError::WriteTimeout(_))), "{result:?}");
        drop(sender.await.unwrap());
    }

    #[tokio::test]
    async fn test_accept_timeout() {
        let session = Session::allocate(8, "127.0.0.1", 50000..=59999).await.unwrap();
        let config = SessionConfig {
            accept_timeout_secs: 1,
            ..test_config()
        };
        let result = session.serve(config).await;
        assert!(matches!(result, Err(SessionError::AcceptTimeout(_))));
    }
}
