//! Ciphertext and key files in a temporary directory.

use std::path::{Path, PathBuf};

use tempfile::TempDir;

/// A ciphertext/key pair on disk, removed when dropped.
pub struct InputFiles {
    pub cipher: PathBuf,
    pub key: PathBuf,
    dir: TempDir,
}

impl InputFiles {
    /// Write `cipher` and `key` verbatim.
    pub fn new(cipher: &[u8], key: &[u8]) -> Self {
        let dir = TempDir::new().expect("failed to create temp dir");
        let cipher_path = dir.path().join("ciphertext");
        let key_path = dir.path().join("key");
        std::fs::write(&cipher_path, cipher).expect("failed to write ciphertext");
        std::fs::write(&key_path, key).expect("failed to write key");
        Self {
            cipher: cipher_path,
            key: key_path,
            dir,
        }
    }

    /// Write both as text lines, each ending in a newline.
    pub fn lines(cipher: &str, key: &str) -> Self {
        Self::new(format!("{cipher}\n").as_bytes(), format!("{key}\n").as_bytes())
    }

    pub fn dir(&self) -> &Path {
        self.dir.path()
    }
}
