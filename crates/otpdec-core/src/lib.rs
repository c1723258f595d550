#![deny(unsafe_code)]

//! otpdec core: the one-time-pad decoding daemon and its client.
//!
//! A client opens the daemon's control port and presents its signature. The
//! daemon answers with a freshly bound session port. The client then sends
//! ciphertext and key over that port and reads back the plaintext. Every
//! session runs as its own task, so the control port never waits on a
//! data transfer.

use std::future::Future;
use std::time::Duration;

/// Compile-time build metadata (version, git hash, profile).
pub mod build_info;
/// The 27-symbol modular cipher.
pub mod cipher;
/// Decode client driver.
pub mod client;
/// Control-port accept loop.
pub mod daemon;
/// Data-channel frame codecs.
pub mod framing;
/// Signature exchange on the control channel.
pub mod handshake;
/// Admin interface over a Unix socket.
pub mod ipc;
pub mod key;
/// Bookkeeping for in-flight session tasks.
pub mod registry;
/// Ephemeral per-client data channels.
pub mod session;
pub mod validate;

pub use client::{ClientError, DecodeClient};
pub use daemon::{Daemon, DaemonError, DaemonStats, ShutdownSignal};
pub use framing::{Frame, FrameMode, FramingError};
pub use key::KeyMaterial;
pub use registry::SessionRegistry;
pub use session::{Session, SessionError};

/// Await `fut`, bounded by `limit` when one is set.
pub(crate) async fn within<F: Future>(
    limit: Option<Duration>,
    fut: F,
) -> Result<F::Output, tokio::time::error::Elapsed> {
    match limit {
        Some(limit) => tokio::time::timeout(limit, fut).await,
        None => Ok(fut.await),
    }
}
