//! Pad key bytes with zeroization on drop.

use std::fmt;

use zeroize::Zeroize;

/// One-time-pad key bytes.
///
/// The buffer is wiped when dropped and never shown in `Debug` output.
#[derive(Clone, PartialEq, Eq)]
pub struct KeyMaterial {
    inner: Vec<u8>,
}

impl KeyMaterial {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            inner: bytes.into(),
        }
    }

    /// Borrow the raw key bytes.
    pub fn expose(&self) -> &[u8] {
        &self.inner
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Keep only the first `len` bytes, wiping the rest.
    pub fn truncate(&mut self, len: usize) {
        if len < self.inner.len() {
            self.inner[len..].zeroize();
            self.inner.truncate(len);
        }
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("inner", &"[REDACTED]")
            .field("len", &self.inner.len())
            .finish()
    }
}

impl Drop for KeyMaterial {
    fn drop(&mut self) {
        self.inner.zeroize();
    }
}
