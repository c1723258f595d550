//! Admin interface over a Unix domain socket.
//!
//! The daemon serves a small HTTP/JSON API next to its TCP control port.
//! `otpdec status` and `otpdec stop` talk to it; decode clients never do.
//!
//! ```text
//! ┌──────────────┐      Unix socket      ┌──────────────┐
//! │  otpdec CLI  │──────────────────────▶│  IPC server  │
//! │ status/stop  │   HTTP/1.1 + JSON     │   (axum)     │
//! └──────────────┘                       └──────┬───────┘
//!                                               │ watch / broadcast
//!                                        ┌──────▼───────┐
//!                                        │ accept loop  │
//!                                        └──────────────┘
//! ```

pub mod client;
pub mod server;
pub mod types;

pub use client::{IpcClient, IpcClientError};
pub use server::{DEFAULT_SOCKET_PATH, IpcState, socket_path_from_config};
pub use types::*;
