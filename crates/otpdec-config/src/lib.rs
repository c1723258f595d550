#![deny(unsafe_code)]

//! Configuration loading and validation for otpdec.
//!
//! Loads TOML configuration files and validates them against expected schemas.
//! Provides the [`AppConfig`] type as the central configuration structure
//! shared by the daemon, the decode client, and the CLI.

use std::ops::RangeInclusive;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Errors that can occur during configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to render TOML: {0}")]
    Render(#[from] toml::ser::Error),

    #[error("validation error: {0}")]
    Validation(String),
}

/// Top-level application configuration.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Daemon (control channel) configuration.
    #[serde(default)]
    pub daemon: DaemonConfig,

    /// Per-session (data channel) configuration.
    #[serde(default)]
    pub session: SessionConfig,

    /// Decode client configuration.
    #[serde(default)]
    pub client: ClientConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Configuration for the control-channel daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Address the daemon binds for control and session listeners.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Well-known control port.
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,

    /// Unix socket for the admin IPC API. Falls back to the default path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub socket_path: Option<String>,

    /// Seconds to wait for a client signature (0 = no timeout).
    #[serde(default = "default_handshake_timeout_secs")]
    pub handshake_timeout_secs: u64,

    /// Interval between registry sweeps while the control port is idle.
    #[serde(default = "default_reap_interval_ms")]
    pub reap_interval_ms: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            listen_port: default_listen_port(),
            socket_path: None,
            handshake_timeout_secs: default_handshake_timeout_secs(),
            reap_interval_ms: default_reap_interval_ms(),
        }
    }
}

impl DaemonConfig {
    /// Handshake read timeout, `None` when disabled.
    pub fn handshake_timeout(&self) -> Option<Duration> {
        secs_to_timeout(self.handshake_timeout_secs)
    }

    /// Registry sweep interval.
    pub fn reap_interval(&self) -> Duration {
        Duration::from_millis(self.reap_interval_ms)
    }
}

fn default_listen_addr() -> String {
    "127.0.0.1".to_string()
}

fn default_listen_port() -> u16 {
    9171
}

fn default_handshake_timeout_secs() -> u64 {
    5
}

fn default_reap_interval_ms() -> u64 {
    1000
}

/// How message and key are laid out on the data channel.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FrameMode {
    /// `<message>\n<key>\n`, message length inferred from the first newline.
    #[default]
    Delimited,
    /// Two big-endian `u32` lengths followed by message and key bytes.
    LengthPrefixed,
}

impl FrameMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FrameMode::Delimited => "delimited",
            FrameMode::LengthPrefixed => "length-prefixed",
        }
    }

    /// Bytes a frame adds on top of message and key.
    pub fn overhead(&self) -> usize {
        match self {
            FrameMode::Delimited => 2,
            FrameMode::LengthPrefixed => 8,
        }
    }

    /// Size on the wire of a frame carrying `message_len` and `key_len` bytes.
    pub fn frame_len(&self, message_len: usize, key_len: usize) -> usize {
        match self {
            // The key is trimmed to the message before sending.
            FrameMode::Delimited => 2 * message_len + self.overhead(),
            FrameMode::LengthPrefixed => message_len + key_len + self.overhead(),
        }
    }
}

/// Configuration for ephemeral data-channel sessions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// First port (inclusive) of the ephemeral range.
    #[serde(default = "default_port_range_start")]
    pub port_range_start: u16,

    /// Last port (inclusive) of the ephemeral range.
    #[serde(default = "default_port_range_end")]
    pub port_range_end: u16,

    /// Maximum bytes a worker buffers for one frame.
    #[serde(default = "default_max_payload_bytes")]
    pub max_payload_bytes: usize,

    /// Data-channel framing.
    #[serde(default)]
    pub framing: FrameMode,

    /// Seconds a worker waits for its client to connect (0 = no timeout).
    #[serde(default = "default_session_timeout_secs")]
    pub accept_timeout_secs: u64,

    /// Seconds a worker waits for the full frame (0 = no timeout).
    #[serde(default = "default_session_timeout_secs")]
    pub io_timeout_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            port_range_start: default_port_range_start(),
            port_range_end: default_port_range_end(),
            max_payload_bytes: default_max_payload_bytes(),
            framing: FrameMode::default(),
            accept_timeout_secs: default_session_timeout_secs(),
            io_timeout_secs: default_session_timeout_secs(),
        }
    }
}

impl SessionConfig {
    /// The ephemeral port range as an inclusive range.
    pub fn port_range(&self) -> RangeInclusive<u16> {
        self.port_range_start..=self.port_range_end
    }

    pub fn accept_timeout(&self) -> Option<Duration> {
        secs_to_timeout(self.accept_timeout_secs)
    }

    pub fn io_timeout(&self) -> Option<Duration> {
        secs_to_timeout(self.io_timeout_secs)
    }

    /// Longest a worker can run: accept, then read, reply and drain.
    /// `None` when any of those waits is unbounded.
    pub fn max_lifetime(&self) -> Option<Duration> {
        Some(self.accept_timeout()? + self.io_timeout()? * 3)
    }
}

fn default_port_range_start() -> u16 {
    50000
}

fn default_port_range_end() -> u16 {
    59999
}

fn default_max_payload_bytes() -> usize {
    200_000
}

fn default_session_timeout_secs() -> u64 {
    30
}

/// Configuration for the decode client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Host the client connects to for both channels.
    #[serde(default = "default_client_host")]
    pub host: String,

    /// Largest ciphertext or key file the client will transmit. Two files of
    /// this size must fit in `session.max_payload_bytes` once framed.
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: usize,

    /// Seconds to wait for each TCP connect (0 = no timeout).
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Seconds to wait on handshake and reply reads (0 = no timeout).
    #[serde(default = "default_session_timeout_secs")]
    pub io_timeout_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: default_client_host(),
            max_file_bytes: default_max_file_bytes(),
            connect_timeout_secs: default_connect_timeout_secs(),
            io_timeout_secs: default_session_timeout_secs(),
        }
    }
}

impl ClientConfig {
    pub fn connect_timeout(&self) -> Option<Duration> {
        secs_to_timeout(self.connect_timeout_secs)
    }

    pub fn io_timeout(&self) -> Option<Duration> {
        secs_to_timeout(self.io_timeout_secs)
    }
}

fn default_client_host() -> String {
    "localhost".to_string()
}

fn default_max_file_bytes() -> usize {
    99_996
}

fn default_connect_timeout_secs() -> u64 {
    5
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g. "info", "debug", "trace").
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn secs_to_timeout(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

impl AppConfig {
    /// Load configuration from a TOML file at the given path using async I/O.
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = tokio::fs::read_to_string(path).await?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Render the configuration as pretty-printed TOML.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.daemon.listen_port == 0 {
            return Err(ConfigError::Validation(
                "daemon.listen_port must be non-zero".to_string(),
            ));
        }
        if self.daemon.listen_addr.is_empty() {
            return Err(ConfigError::Validation(
                "daemon.listen_addr must not be empty".to_string(),
            ));
        }
        if self.daemon.reap_interval_ms == 0 {
            return Err(ConfigError::Validation(
                "daemon.reap_interval_ms must be at least 1".to_string(),
            ));
        }

        // Validate session config
        let session = &self.session;
        if session.port_range_start == 0 {
            return Err(ConfigError::Validation(
                "session.port_range_start must be non-zero".to_string(),
            ));
        }
        if session.port_range_start > session.port_range_end {
            return Err(ConfigError::Validation(format!(
                "session port range is empty: {}..={}",
                session.port_range_start, session.port_range_end
            )));
        }
        if session.port_range().contains(&self.daemon.listen_port) {
            return Err(ConfigError::Validation(format!(
                "daemon.listen_port {} falls inside the session port range {}..={}",
                self.daemon.listen_port, session.port_range_start, session.port_range_end
            )));
        }
        if session.max_payload_bytes < 4 {
            return Err(ConfigError::Validation(format!(
                "session.max_payload_bytes must be at least 4, got {}",
                session.max_payload_bytes
            )));
        }

        // Validate client config
        if self.client.host.is_empty() {
            return Err(ConfigError::Validation(
                "client.host must not be empty".to_string(),
            ));
        }
        let max_file = self.client.max_file_bytes;
        if max_file == 0 {
            return Err(ConfigError::Validation(
                "client.max_file_bytes must be non-zero".to_string(),
            ));
        }
        let largest_frame = max_file
            .checked_mul(2)
            .and_then(|n| n.checked_add(session.framing.overhead()));
        if largest_frame.is_none_or(|n| n > session.max_payload_bytes) {
            return Err(ConfigError::Validation(format!(
                "client.max_file_bytes {} does not fit session.max_payload_bytes {} \
                 in {} framing (need 2 * max_file_bytes + {})",
                max_file,
                session.max_payload_bytes,
                session.framing.as_str(),
                session.framing.overhead()
            )));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::Validation(format!(
                "logging.level must be one of {:?}, got {:?}",
                valid_levels, self.logging.level
            )));
        }

        Ok(())
    }
}
