//! Data-channel framing for message + key.
//!
//! Two layouts are supported, selected by [`FrameMode`]:
//!
//! ```text
//! delimited:        <message> 0x0A <key> 0x0A
//! length-prefixed:  u32 BE msg_len | u32 BE key_len | <message> | <key>
//! ```
//!
//! The delimited layout carries no length header. The message length `len`
//! is the offset of the first newline, and the reader stops once more than
//! `2 * len` bytes have arrived (message, newline, `len` key bytes). The key
//! region is therefore assumed to be exactly `len` bytes; senders trim the
//! key to the message length, and a longer key region that is visible in the
//! buffer is rejected with [`FramingError::KeyLengthMismatch`].
//!
//! That check only sees bytes that arrived in the same read as the end of
//! the key. `AB\nXYZ\n` in one read is rejected, but `AB\nXY` followed by
//! `Z\n` completes after the first read and decodes `AB` with key `XY`.
//! The excess is never looked at. Use the length-prefixed layout when the
//! key length has to be enforced.
//!
//! The length-prefixed layout states both lengths explicitly, so the key may
//! be longer than the message.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use zeroize::Zeroize;

pub use otpdec_config::FrameMode;

use crate::cipher::{self, CipherError};
use crate::key::KeyMaterial;

/// Separator between message and key in delimited mode.
pub const DELIMITER: u8 = b'\n';

/// Size of the length-prefixed header.
pub const HEADER_LEN: usize = 8;

/// Largest single socket read.
const READ_CHUNK: usize = 4096;

/// Errors from frame encoding and decoding.
#[derive(Debug, thiserror::Error)]
pub enum FramingError {
    #[error("stream ended after {received} bytes without a delimiter")]
    MissingDelimiter { received: usize },

    #[error("frame exceeds the {limit}-byte payload limit")]
    CapacityExceeded { limit: usize },

    #[error("stream truncated: expected {expected} bytes, received {received}")]
    Truncated { expected: usize, received: usize },

    #[error("key region is longer than the {message_len}-byte message")]
    KeyLengthMismatch { message_len: usize },

    #[error("key is {key_len} bytes but the message is {message_len}")]
    KeyTooShort { message_len: usize, key_len: usize },

    #[error("message contains the frame delimiter at position {position}")]
    EmbeddedDelimiter { position: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A message and the pad key that decodes it.
#[derive(Debug, Clone)]
pub struct Frame {
    pub message: Vec<u8>,
    pub key: KeyMaterial,
}

impl Frame {
    /// Pair a message with its key. The key must cover the whole message.
    pub fn new(message: impl Into<Vec<u8>>, key: KeyMaterial) -> Result<Self, FramingError> {
        let message = message.into();
        if key.len() < message.len() {
            return Err(FramingError::KeyTooShort {
                message_len: message.len(),
                key_len: key.len(),
            });
        }
        Ok(Self { message, key })
    }

    /// Decode the message with its key.
    pub fn decode(&self) -> Result<Vec<u8>, CipherError> {
        cipher::decode(&self.message, self.key.expose(), self.message.len())
    }

    /// Serialize the frame for the data channel.
    pub fn encode(&self, mode: FrameMode) -> Result<Vec<u8>, FramingError> {
        let len = self.message.len();
        match mode {
            FrameMode::Delimited => {
                if let Some(position) = self.message.iter().position(|&b| b == DELIMITER) {
                    return Err(FramingError::EmbeddedDelimiter { position });
                }
                let key = self.key.expose().get(..len).ok_or(FramingError::KeyTooShort {
                    message_len: len,
                    key_len: self.key.len(),
                })?;
                let mut out = Vec::with_capacity(2 * len + 2);
                out.extend_from_slice(&self.message);
                out.push(DELIMITER);
                out.extend_from_slice(key);
                out.push(DELIMITER);
                Ok(out)
            }
            FrameMode::LengthPrefixed => {
                let key = self.key.expose();
                let too_big = |_| FramingError::CapacityExceeded {
                    limit: u32::MAX as usize,
                };
                let msg_len = u32::try_from(len).map_err(too_big)?;
                let key_len = u32::try_from(key.len()).map_err(too_big)?;
                let mut out = Vec::with_capacity(HEADER_LEN + len + key.len());
                out.extend_from_slice(&msg_len.to_be_bytes());
                out.extend_from_slice(&key_len.to_be_bytes());
                out.extend_from_slice(&self.message);
                out.extend_from_slice(key);
                Ok(out)
            }
        }
    }
}

/// Incremental parser for the delimited layout.
///
/// Feed it bytes with [`push`](Self::push) until it reports completion or
/// the stream ends, then call [`finish`](Self::finish).
#[derive(Debug)]
pub struct DelimitedAccumulator {
    buf: Vec<u8>,
    capacity: usize,
    message_len: Option<usize>,
}

impl DelimitedAccumulator {
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: Vec::new(),
            capacity,
            message_len: None,
        }
    }

    /// Message length, once the delimiter has been seen.
    pub fn message_len(&self) -> Option<usize> {
        self.message_len
    }

    pub fn received(&self) -> usize {
        self.buf.len()
    }

    pub fn remaining_capacity(&self) -> usize {
        self.capacity - self.buf.len()
    }

    /// Whether more than `2 * len` bytes have been received.
    pub fn is_complete(&self) -> bool {
        self.message_len
            .is_some_and(|len| self.buf.len() > 2 * len)
    }

    /// Append bytes. Returns `true` once the frame is complete.
    pub fn push(&mut self, bytes: &[u8]) -> Result<bool, FramingError> {
        if bytes.len() > self.remaining_capacity() {
            return Err(FramingError::CapacityExceeded {
                limit: self.capacity,
            });
        }

        let scan_from = self.buf.len();
        self.buf.extend_from_slice(bytes);

        if self.message_len.is_none() {
            self.message_len = self.buf[scan_from..]
                .iter()
                .position(|&b| b == DELIMITER)
                .map(|offset| scan_from + offset);
        }

        if let Some(len) = self.message_len {
            let trailer = 2 * len + 1;
            if self.buf.len() > trailer && self.buf[trailer] != DELIMITER {
                return Err(FramingError::KeyLengthMismatch { message_len: len });
            }
        }

        if self.is_complete() {
            return Ok(true);
        }
        if self.buf.len() == self.capacity {
            return Err(FramingError::CapacityExceeded {
                limit: self.capacity,
            });
        }
        Ok(false)
    }

    /// Split the buffered bytes into a [`Frame`].
    pub fn finish(self) -> Result<Frame, FramingError> {
        let received = self.buf.len();
        let Some(len) = self.message_len else {
            return Err(FramingError::MissingDelimiter { received });
        };
        if !self.is_complete() {
            return Err(FramingError::Truncated {
                expected: 2 * len + 1,
                received,
            });
        }

        let message = self.buf[..len].to_vec();
        let key = KeyMaterial::new(&self.buf[len + 1..2 * len + 1]);
        Ok(Frame { message, key })
    }
}

impl Drop for DelimitedAccumulator {
    fn drop(&mut self) {
        self.buf.zeroize();
    }
}

/// Read one frame in the given layout, buffering at most `max_payload` bytes.
pub async fn read_frame<R>(
    reader: &mut R,
    mode: FrameMode,
    max_payload: usize,
) -> Result<Frame, FramingError>
where
    R: AsyncRead + Unpin,
{
    match mode {
        FrameMode::Delimited => read_delimited(reader, max_payload).await,
        FrameMode::LengthPrefixed => read_length_prefixed(reader, max_payload).await,
    }
}

async fn read_delimited<R>(reader: &mut R, max_payload: usize) -> Result<Frame, FramingError>
where
    R: AsyncRead + Unpin,
{
    let mut acc = DelimitedAccumulator::new(max_payload);
    let mut chunk = vec![0u8; READ_CHUNK.min(max_payload)];

    loop {
        let want = chunk.len().min(acc.remaining_capacity());
        let n = reader.read(&mut chunk[..want]).await?;
        if n == 0 {
            break;
        }
        let done = acc.push(&chunk[..n]);
        chunk[..n].zeroize();
        if done? {
            break;
        }
    }

    acc.finish()
}

async fn read_length_prefixed<R>(
    reader: &mut R,
    max_payload: usize,
) -> Result<Frame, FramingError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_LEN];
    let got = read_full(reader, &mut header).await?;
    if got < HEADER_LEN {
        return Err(FramingError::Truncated {
            expected: HEADER_LEN,
            received: got,
        });
    }

    let msg_len = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
    let key_len = u32::from_be_bytes([header[4], header[5], header[6], header[7]]) as usize;
    if key_len < msg_len {
        return Err(FramingError::KeyTooShort {
            message_len: msg_len,
            key_len,
        });
    }
    let body_len = msg_len + key_len;
    if HEADER_LEN + body_len > max_payload {
        return Err(FramingError::CapacityExceeded { limit: max_payload });
    }

    let mut body = vec![0u8; body_len];
    let got = read_full(reader, &mut body).await?;
    if got < body_len {
        body.zeroize();
        return Err(FramingError::Truncated {
            expected: HEADER_LEN + body_len,
            received: HEADER_LEN + got,
        });
    }

    let message = body[..msg_len].to_vec();
    let key = KeyMaterial::new(&body[msg_len..]);
    body.zeroize();
    Ok(Frame { message, key })
}

/// Fill `buf` or stop at EOF; returns the byte count read.
async fn read_full<R>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// Encode and write a frame, then flush.
pub async fn write_frame<W>(writer: &mut W, frame: &Frame, mode: FrameMode) -> Result<(), FramingError>
where
    W: AsyncWrite + Unpin,
{
    let mut bytes = frame.encode(mode)?;
    let result = writer.write_all(&bytes).await;
    bytes.zeroize();
    result?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn frame(message: &[u8], key: &[u8]) -> Frame {
        Frame::new(message.to_vec(), KeyMaterial::new(key.to_vec())).unwrap()
    }

    // ── Accumulator ───────────────────────────────────────────────────

    #[test]
    fn test_accumulator_full_frame() {
        let mut acc = DelimitedAccumulator::new(1024);
        assert!(acc.push(b"FG\nZZ\n").unwrap());
        assert_eq!(acc.message_len(), Some(2));
        let frame = acc.finish().unwrap();
        assert_eq!(frame.message, b"FG");
        assert_eq!(frame.key.expose(), b"ZZ");
        assert_eq!(frame.decode().unwrap(), b"HI");
    }

    #[test]
    fn test_accumulator_completes_before_trailing_delimiter() {
        let mut acc = DelimitedAccumulator::new(1024);
        // message(2) + delimiter + key(2) = 5 bytes > 2 * len
        assert!(acc.push(b"FG\nZZ").unwrap());
        assert_eq!(acc.finish().unwrap().decode().unwrap(), b"HI");
    }

    #[test]
    fn test_accumulator_byte_by_byte() {
        let mut acc = DelimitedAccumulator::new(1024);
        let wire = b"HELLO\nABCDE\n";
        let mut done = false;
        for b in wire.iter() {
            done = acc.push(std::slice::from_ref(b)).unwrap();
            if done {
                break;
            }
        }
        assert!(done);
        assert_eq!(acc.received(), 11);
        let frame = acc.finish().unwrap();
        assert_eq!(frame.message, b"HELLO");
        assert_eq!(frame.key.expose(), b"ABCDE");
    }

    #[test]
    fn test_accumulator_truncated_at_two_len() {
        // len = 4: complete needs 9 bytes. 8 bytes is one key byte short.
        let mut acc = DelimitedAccumulator::new(1024);
        assert!(!acc.push(b"ABCD\nXYZ").unwrap());
        assert_eq!(acc.received(), 8);
        assert!(matches!(
            acc.finish(),
            Err(FramingError::Truncated {
                expected: 9,
                received: 8
            })
        ));
    }

    #[test]
    fn test_accumulator_truncated_at_two_len_minus_one() {
        let mut acc = DelimitedAccumulator::new(1024);
        assert!(!acc.push(b"ABCD\nXY").unwrap());
        assert!(matches!(
            acc.finish(),
            Err(FramingError::Truncated { received: 7, .. })
        ));
    }

    #[test]
    fn test_accumulator_missing_delimiter() {
        let mut acc = DelimitedAccumulator::new(1024);
        assert!(!acc.push(b"ABCDEFG").unwrap());
        assert!(matches!(
            acc.finish(),
            Err(FramingError::MissingDelimiter { received: 7 })
        ));
    }

    #[test]
    fn test_accumulator_capacity_without_delimiter() {
        let mut acc = DelimitedAccumulator::new(8);
        assert!(!acc.push(b"ABCD").unwrap());
        assert!(matches!(
            acc.push(b"EFGH"),
            Err(FramingError::CapacityExceeded { limit: 8 })
        ));
    }

    #[test]
    fn test_accumulator_rejects_oversized_push() {
        let mut acc = DelimitedAccumulator::new(4);
        assert!(matches!(
            acc.push(b"ABCDE"),
            Err(FramingError::CapacityExceeded { limit: 4 })
        ));
    }

    #[test]
    fn test_accumulator_rejects_longer_key() {
        let mut acc = DelimitedAccumulator::new(1024);
        assert!(matches!(
            acc.push(b"AB\nXYZ\n"),
            Err(FramingError::KeyLengthMismatch { message_len: 2 })
        ));
    }

    #[test]
    fn test_longer_key_in_a_later_push_goes_unseen() {
        let mut acc = DelimitedAccumulator::new(1024);
        assert!(acc.push(b"AB\nXY").unwrap());
        let frame = acc.finish().unwrap();
        assert_eq!(frame.message, b"AB");
        assert_eq!(frame.key.expose(), b"XY");
    }

    #[test]
    fn test_header_len_matches_config_overhead() {
        assert_eq!(FrameMode::LengthPrefixed.overhead(), HEADER_LEN);
        assert_eq!(
            frame(b"FG", b"ZZQ").encode(FrameMode::LengthPrefixed).unwrap().len(),
            FrameMode::LengthPrefixed.frame_len(2, 3)
        );
        assert_eq!(
            frame(b"FG", b"ZZQ").encode(FrameMode::Delimited).unwrap().len(),
            FrameMode::Delimited.frame_len(2, 3)
        );
    }

    #[test]
    fn test_accumulator_empty_message() {
        let mut acc = DelimitedAccumulator::new(16);
        assert!(acc.push(b"\n").unwrap());
        let frame = acc.finish().unwrap();
        assert!(frame.message.is_empty());
        assert!(frame.decode().unwrap().is_empty());
    }

    // ── Encoding ──────────────────────────────────────────────────────

    #[test]
    fn test_encode_delimited_trims_key() {
        let bytes = frame(b"FG", b"ZZQQ").encode(FrameMode::Delimited).unwrap();
        assert_eq!(bytes, b"FG\nZZ\n");
    }

    #[test]
    fn test_encode_length_prefixed_keeps_key() {
        let bytes = frame(b"FG", b"ZZQ")
            .encode(FrameMode::LengthPrefixed)
            .unwrap();
        assert_eq!(&bytes[..HEADER_LEN], &[0, 0, 0, 2, 0, 0, 0, 3]);
        assert_eq!(&bytes[HEADER_LEN..], b"FGZZQ");
    }

    #[test]
    fn test_encode_rejects_embedded_delimiter() {
        let f = frame(b"AB\nC", b"ABCD");
        assert!(matches!(
            f.encode(FrameMode::Delimited),
            Err(FramingError::EmbeddedDelimiter { position: 2 })
        ));
        // The prefixed layout does not care.
        assert!(f.encode(FrameMode::LengthPrefixed).is_ok());
    }

    #[test]
    fn test_frame_requires_key_cover() {
        let result = Frame::new(b"ABC".to_vec(), KeyMaterial::new(b"AB".to_vec()));
        assert!(matches!(
            result,
            Err(FramingError::KeyTooShort {
                message_len: 3,
                key_len: 2
            })
        ));
    }

    // ── Async readers ─────────────────────────────────────────────────

    #[tokio::test]
    async fn test_read_delimited_from_stream() {
        let mut wire: &[u8] = b"FG\nZZ\n";
        let frame = read_frame(&mut wire, FrameMode::Delimited, 1024)
            .await
            .unwrap();
        assert_eq!(frame.decode().unwrap(), b"HI");
    }

    #[tokio::test]
    async fn test_read_delimited_split_writes() {
        let (mut client, mut server) = tokio::io::duplex(64);
        let writer = tokio::spawn(async move {
            for part in [&b"HEL"[..], b"LO\nAB", b"CDE", b"\n"] {
                client.write_all(part).await.unwrap();
                tokio::task::yield_now().await;
            }
            client
        });

        let frame = read_frame(&mut server, FrameMode::Delimited, 1024)
            .await
            .unwrap();
        assert_eq!(frame.message, b"HELLO");
        assert_eq!(frame.key.expose(), b"ABCDE");
        drop(writer.await.unwrap());
    }

    #[tokio::test]
    async fn test_read_delimited_longer_key_in_one_read() {
        let mut wire: &[u8] = b"AB\nXYZ\n";
        let err = read_frame(&mut wire, FrameMode::Delimited, 1024)
            .await
            .unwrap_err();
        assert!(matches!(err, FramingError::KeyLengthMismatch { message_len: 2 }));
    }

    #[tokio::test]
    async fn test_read_delimited_truncated_stream() {
        let mut wire: &[u8] = b"HELLO\nABCD";
        let err = read_frame(&mut wire, FrameMode::Delimited, 1024)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            FramingError::Truncated {
                expected: 11,
                received: 10
            }
        ));
    }

    #[tokio::test]
    async fn test_read_delimited_capacity() {
        let data = vec![b'A'; 64];
        let mut wire: &[u8] = &data;
        let err = read_frame(&mut wire, FrameMode::Delimited, 32)
            .await
            .unwrap_err();
        assert!(matches!(err, FramingError::CapacityExceeded { limit: 32 }));
    }

    #[tokio::test]
    async fn test_read_length_prefixed_round_trip() {
        let original = frame(b"FG", b"ZZABC");
        let bytes = original.encode(FrameMode::LengthPrefixed).unwrap();
        let mut wire: &[u8] = &bytes;
        let parsed = read_frame(&mut wire, FrameMode::LengthPrefixed, 1024)
            .await
            .unwrap();
        assert_eq!(parsed.message, b"FG");
        assert_eq!(parsed.key.expose(), b"ZZABC");
        assert_eq!(parsed.decode().unwrap(), b"HI");
    }

    #[tokio::test]
    async fn test_read_length_prefixed_short_header() {
        let mut wire: &[u8] = &[0, 0, 0];
        let err = read_frame(&mut wire, FrameMode::LengthPrefixed, 1024)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            FramingError::Truncated {
                expected: HEADER_LEN,
                received: 3
            }
        ));
    }

    #[tokio::test]
    async fn test_read_length_prefixed_truncated_body() {
        let mut bytes = frame(b"ABCD", b"ABCD")
            .encode(FrameMode::LengthPrefixed)
            .unwrap();
        bytes.pop();
        let mut wire: &[u8] = &bytes;
        let err = read_frame(&mut wire, FrameMode::LengthPrefixed, 1024)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            FramingError::Truncated {
                expected: 16,
                received: 15
            }
        ));
    }

    #[tokio::test]
    async fn test_read_length_prefixed_rejects_short_key() {
        let mut wire: &[u8] = &[0, 0, 0, 3, 0, 0, 0, 2, b'A', b'B', b'C', b'A', b'B'];
        let err = read_frame(&mut wire, FrameMode::LengthPrefixed, 1024)
            .await
            .unwrap_err();
        assert!(matches!(err, FramingError::KeyTooShort { .. }));
    }

    #[tokio::test]
    async fn test_read_length_prefixed_capacity() {
        let mut wire: &[u8] = &[0, 0, 1, 0, 0, 0, 1, 0];
        let err = read_frame(&mut wire, FrameMode::LengthPrefixed, 64)
            .await
            .unwrap_err();
        assert!(matches!(err, FramingError::CapacityExceeded { limit: 64 }));
    }

    #[tokio::test]
    async fn test_write_frame() {
        let mut out = Vec::new();
        write_frame(&mut out, &frame(b"FG", b"ZZ"), FrameMode::Delimited)
            .await
            .unwrap();
        assert_eq!(out, b"FG\nZZ\n");
    }
}
