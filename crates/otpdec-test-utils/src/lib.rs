#![deny(unsafe_code)]

//! Shared test utilities for the otpdec workspace.
//!
//! Config builders, a self-stopping daemon, input file fixtures and a
//! tracing helper, so integration tests stay short.
//!
//! ```toml
//! [dev-dependencies]
//! otpdec-test-utils = { workspace = true }
//! ```

pub mod config;
pub mod daemon;
pub mod fixtures;
pub mod tracing_setup;

pub use config::TestConfigBuilder;
pub use daemon::TestDaemon;
pub use fixtures::InputFiles;
pub use tracing_setup::init_test_tracing;
