//! Control-channel handshake: signature exchange and session port hand-off.
//!
//! ```text
//! Client                                  Daemon
//!   |  -- CLIENT_SIGNATURE ------------->   |
//!   |                                       |  (mismatch: close, write nothing)
//!   |  <-- SERVER_SIGNATURE -------------   |
//!   |  <-- 5-digit session port ---------   |
//!   |          both sides close             |
//! ```
//!
//! Neither message carries a delimiter; both sides read fixed lengths.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::within;

/// Signature a decode client presents to the daemon.
pub const CLIENT_SIGNATURE: &[u8] = b"I am otpdec";

/// Signature the daemon answers with.
pub const SERVER_SIGNATURE: &[u8] = b"I am otpdec_d";

/// Width of the ASCII decimal port field.
pub const PORT_FIELD_WIDTH: usize = 5;

/// Errors from either side of the handshake.
#[derive(Debug, thiserror::Error)]
pub enum HandshakeError {
    #[error("peer closed the control channel during the handshake")]
    Rejected,

    #[error("peer presented the wrong signature")]
    SignatureMismatch,

    #[error("invalid session port {0:?}")]
    InvalidPort(String),

    #[error("handshake timed out after {0:?}")]
    Timeout(Duration),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Render a port as the fixed-width, zero-padded field.
pub fn format_port(port: u16) -> [u8; PORT_FIELD_WIDTH] {
    let mut field = [b'0'; PORT_FIELD_WIDTH];
    field.copy_from_slice(format!("{port:05}").as_bytes());
    field
}

/// Parse the fixed-width port field. Leading spaces or zeros are padding.
pub fn parse_port(field: &[u8]) -> Result<u16, HandshakeError> {
    let invalid = || HandshakeError::InvalidPort(String::from_utf8_lossy(field).into_owned());

    let text = std::str::from_utf8(field).map_err(|_| invalid())?;
    let digits = text.trim_start_matches(' ');
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    match digits.parse::<u16>() {
        Ok(port) if port > 0 => Ok(port),
        _ => Err(invalid()),
    }
}

/// Daemon side: read the client's signature and check it.
///
/// Stops reading as soon as the received prefix diverges, so a wrong peer
/// is turned away without waiting for the full signature length.
pub async fn verify_client<S>(stream: &mut S, timeout: Option<Duration>) -> Result<(), HandshakeError>
where
    S: AsyncRead + Unpin,
{
    let read = async {
        let mut buf = [0u8; CLIENT_SIGNATURE.len()];
        let mut filled = 0;
        while filled < buf.len() {
            let n = stream.read(&mut buf[filled..]).await?;
            if n == 0 {
                return Err(HandshakeError::Rejected);
            }
            if buf[filled..filled + n] != CLIENT_SIGNATURE[filled..filled + n] {
                return Err(HandshakeError::SignatureMismatch);
            }
            filled += n;
        }
        Ok(())
    };

    within(timeout, read)
        .await
        .map_err(|_| HandshakeError::Timeout(timeout.unwrap_or_default()))?
}

/// Daemon side: answer with the server signature and the session port.
pub async fn announce_session<S>(stream: &mut S, port: u16) -> Result<(), HandshakeError>
where
    S: AsyncWrite + Unpin,
{
    let mut reply = Vec::with_capacity(SERVER_SIGNATURE.len() + PORT_FIELD_WIDTH);
    reply.extend_from_slice(SERVER_SIGNATURE);
    reply.extend_from_slice(&format_port(port));
    stream.write_all(&reply).await?;
    stream.flush().await?;
    Ok(())
}

/// Client side: present the signature and receive the session port.
pub async fn negotiate<S>(stream: &mut S, timeout: Option<Duration>) -> Result<u16, HandshakeError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let exchange = async {
        stream.write_all(CLIENT_SIGNATURE).await?;
        stream.flush().await?;

        let mut signature = [0u8; SERVER_SIGNATURE.len()];
        read_exact_or_rejected(stream, &mut signature).await?;
        if signature != SERVER_SIGNATURE {
            return Err(HandshakeError::SignatureMismatch);
        }

        let mut field = [0u8; PORT_FIELD_WIDTH];
        read_exact_or_rejected(stream, &mut field).await?;
        parse_port(&field)
    };

    within(timeout, exchange)
        .await
        .map_err(|_| HandshakeError::Timeout(timeout.unwrap_or_default()))?
}

async fn read_exact_or_rejected<S>(stream: &mut S, buf: &mut [u8]) -> Result<(), HandshakeError>
where
    S: AsyncRead + Unpin,
{
    match stream.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(HandshakeError::Rejected),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_format_port() {
        assert_eq!(&format_port(51234), b"51234");
        assert_eq!(&format_port(9171), b"09171");
        assert_eq!(&format_port(7), b"00007");
    }

    #[test]
    fn test_parse_port() {
        assert_eq!(parse_port(b"51234").unwrap(), 51234);
        assert_eq!(parse_port(b"09171").unwrap(), 9171);
        assert_eq!(parse_port(b" 9171").unwrap(), 9171);
    }

    #[test]
    fn test_parse_port_rejects_garbage() {
        for field in [
            &b"00000"[..],
            &b"99999"[..],
            &b"12a45"[..],
            &b"     "[..],
            &b"-1234"[..],
            &b"\xff\xfe123"[..],
        ] {
            assert!(
                matches!(parse_port(field), Err(HandshakeError::InvalidPort(_))),
                "{field:?} should be rejected"
            );
        }
    }

    #[tokio::test]
    async fn test_full_exchange() {
        let (mut client, mut server) = tokio::io::duplex(64);

        let daemon = tokio::spawn(async move {
            verify_client(&mut server, None).await?;
            announce_session(&mut server, 51234).await?;
            Ok::<_, HandshakeError>(())
        });

        let port = negotiate(&mut client, None).await.unwrap();
        assert_eq!(port, 51234);
        daemon.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_wrong_signature_gets_no_reply() {
        let (mut client, mut server) = tokio::io::duplex(64);

        client.write_all(b"I am otpenc").await.unwrap();
        let result = verify_client(&mut server, None).await;
        assert!(matches!(result, Err(HandshakeError::SignatureMismatch)));

        // Daemon drops the stream without writing.
        drop(server);
        let mut buf = Vec::new();
        client.read_to_end(&mut buf).await.unwrap();
        assert!(buf.is_empty());
    }

    #[tokio::test]
    async fn test_client_sees_rejection_as_eof() {
        let (mut client, server) = tokio::io::duplex(64);
        drop(server);
        let result = negotiate(&mut client, None).await;
        assert!(matches!(
            result,
            Err(HandshakeError::Rejected) | Err(HandshakeError::Io(_))
        ));
    }

    #[tokio::test]
    async fn test_client_rejects_foreign_server() {
        let (mut client, mut server) = tokio::io::duplex(64);
        tokio::spawn(async move {
            let mut sig = [0u8; CLIENT_SIGNATURE.len()];
            server.read_exact(&mut sig).await.unwrap();
            server.write_all(b"I am otpenc_d51234").await.unwrap();
        });

        let result = negotiate(&mut client, None).await;
        assert!(matches!(result, Err(HandshakeError::SignatureMismatch)));
    }

    #[tokio::test]
    async fn test_client_rejects_zero_port() {
        let (mut client, mut server) = tokio::io::duplex(64);
        tokio::spawn(async move {
            let mut sig = [0u8; CLIENT_SIGNATURE.len()];
            server.read_exact(&mut sig).await.unwrap();
            server.write_all(SERVER_SIGNATURE).await.unwrap();
            server.write_all(b"00000").await.unwrap();
        });

        let result = negotiate(&mut client, None).await;
        assert!(matches!(result, Err(HandshakeError::InvalidPort(_))));
    }

    #[tokio::test]
    async fn test_silent_client_times_out() {
        let (_client, mut server) = tokio::io::duplex(64);
        let result = verify_client(&mut server, Some(Duration::from_millis(20))).await;
        assert!(matches!(result, Err(HandshakeError::Timeout(_))));
    }
}
