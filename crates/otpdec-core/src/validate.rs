//! Local input checks run by the decode client before any socket I/O.

use std::path::{Path, PathBuf};

use tokio::io::AsyncReadExt;

/// Errors from local input validation.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("invalid character {byte:#04x} at position {position}")]
    InvalidCharacter { position: usize, byte: u8 },

    #[error("key is {key_len} bytes, shorter than the {plain_len}-byte message")]
    KeyTooShort { plain_len: usize, key_len: usize },

    #[error("line break at position {position} inside the transmitted region")]
    EmbeddedDelimiter { position: usize },

    #[error("{path} is larger than the {limit}-byte transmission buffer")]
    PayloadTooLarge { path: PathBuf, limit: usize },

    #[error("could not read {path}: {source}")]
    Unreadable {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Accept only `A..=Z`, space and newline.
pub fn validate(bytes: &[u8]) -> Result<(), ValidationError> {
    match bytes
        .iter()
        .position(|&b| !(b.is_ascii_uppercase() || b == b' ' || b == b'\n'))
    {
        Some(position) => Err(ValidationError::InvalidCharacter {
            position,
            byte: bytes[position],
        }),
        None => Ok(()),
    }
}

/// The key must be at least as long as the message.
pub fn check_length(plain: &[u8], key: &[u8]) -> Result<(), ValidationError> {
    if key.len() < plain.len() {
        return Err(ValidationError::KeyTooShort {
            plain_len: plain.len(),
            key_len: key.len(),
        });
    }
    Ok(())
}

/// Drop one trailing newline, as left by text editors and `echo`.
pub fn strip_line(bytes: &[u8]) -> &[u8] {
    bytes.strip_suffix(b"\n").unwrap_or(bytes)
}

/// Reject a newline inside the bytes that will be transmitted.
pub fn check_single_line(bytes: &[u8]) -> Result<(), ValidationError> {
    match bytes.iter().position(|&b| b == b'\n') {
        Some(position) => Err(ValidationError::EmbeddedDelimiter { position }),
        None => Ok(()),
    }
}

/// Read a whole input file in one bounded read.
pub async fn load_input(path: &Path, limit: usize) -> Result<Vec<u8>, ValidationError> {
    let unreadable = |source| ValidationError::Unreadable {
        path: path.to_path_buf(),
        source,
    };

    let file = tokio::fs::File::open(path).await.map_err(unreadable)?;
    let mut bytes = Vec::new();
    file.take(limit as u64 + 1)
        .read_to_end(&mut bytes)
        .await
        .map_err(unreadable)?;

    if bytes.len() > limit {
        return Err(ValidationError::PayloadTooLarge {
            path: path.to_path_buf(),
            limit,
        });
    }
    Ok(bytes)
}
