//! One-time-pad transform over the 27-symbol alphabet.
//!
//! The alphabet maps `A..=Z` to `0..=25` and the space character to `26`.
//! Decoding computes `(b - k + 27) mod 27` position by position; encoding is
//! the additive inverse `(p + k) mod 27`. Both are pure functions and only
//! touch the first `len` positions of their inputs.

/// Number of symbols in the cipher alphabet.
pub const ALPHABET_SIZE: u8 = 27;

/// The symbol mapped to index 26.
pub const SPACE: u8 = b' ';

/// Errors from the cipher transform.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CipherError {
    #[error("byte {byte:#04x} at position {position} is outside the cipher alphabet")]
    InvalidSymbol { position: usize, byte: u8 },

    #[error("key too short: need {needed} symbols, have {available}")]
    KeyTooShort { needed: usize, available: usize },

    #[error("message too short: need {needed} symbols, have {available}")]
    MessageTooShort { needed: usize, available: usize },
}

/// Map an alphabet byte to its index, or `None` if it is not in the alphabet.
pub fn symbol_index(byte: u8) -> Option<u8> {
    match byte {
        b'A'..=b'Z' => Some(byte - b'A'),
        SPACE => Some(26),
        _ => None,
    }
}

/// Map an index in `0..27` back to its alphabet byte.
///
/// # Panics
///
/// Panics if `index >= ALPHABET_SIZE`; callers only pass reduced values.
pub fn index_symbol(index: u8) -> u8 {
    assert!(index < ALPHABET_SIZE, "cipher index out of range: {index}");
    if index == 26 { SPACE } else { b'A' + index }
}

/// Decode the first `len` symbols of `message` with `key`.
pub fn decode(message: &[u8], key: &[u8], len: usize) -> Result<Vec<u8>, CipherError> {
    transform(message, key, len, |b, k| (b + ALPHABET_SIZE - k) % ALPHABET_SIZE)
}

/// Encode the first `len` symbols of `plain` with `key`.
pub fn encode(plain: &[u8], key: &[u8], len: usize) -> Result<Vec<u8>, CipherError> {
    transform(plain, key, len, |p, k| (p + k) % ALPHABET_SIZE)
}

fn transform(
    input: &[u8],
    key: &[u8],
    len: usize,
    op: impl Fn(u8, u8) -> u8,
) -> Result<Vec<u8>, CipherError> {
    if input.len() < len {
        return Err(CipherError::MessageTooShort {
            needed: len,
            available: input.len(),
        });
    }
    if key.len() < len {
        return Err(CipherError::KeyTooShort {
            needed: len,
            available: key.len(),
        });
    }

    input[..len]
        .iter()
        .zip(&key[..len])
        .enumerate()
        .map(|(position, (&b, &k))| {
            let b = symbol_index(b).ok_or(CipherError::InvalidSymbol { position, byte: b })?;
            let k = symbol_index(k).ok_or(CipherError::InvalidSymbol { position, byte: k })?;
            Ok(index_symbol(op(b, k)))
        })
        .collect()
}
