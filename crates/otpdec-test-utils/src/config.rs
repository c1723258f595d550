//! Configuration builders for tests.

use otpdec_config::{AppConfig, FrameMode};

/// Fluent builder for [`AppConfig`] in tests.
///
/// Starts from a loopback config with the control port left to the OS and
/// short timeouts, so a stuck test fails quickly instead of hanging.
///
/// ```ignore
/// let config = TestConfigBuilder::new()
///     .framing(FrameMode::LengthPrefixed)
///     .build();
/// ```
pub struct TestConfigBuilder {
    config: AppConfig,
}

impl TestConfigBuilder {
    pub fn new() -> Self {
        let mut config = AppConfig::default();
        config.daemon.listen_addr = "127.0.0.1".to_string();
        config.daemon.listen_port = 0;
        config.daemon.handshake_timeout_secs = 2;
        config.daemon.reap_interval_ms = 50;
        config.session.accept_timeout_secs = 5;
        config.session.io_timeout_secs = 5;
        config.client.host = "127.0.0.1".to_string();
        config.client.connect_timeout_secs = 2;
        config.client.io_timeout_secs = 5;
        Self { config }
    }

    pub fn listen_port(mut self, port: u16) -> Self {
        self.config.daemon.listen_port = port;
        self
    }

    pub fn framing(mut self, mode: FrameMode) -> Self {
        self.config.session.framing = mode;
        self
    }

    pub fn port_range(mut self, start: u16, end: u16) -> Self {
        self.config.session.port_range_start = start;
        self.config.session.port_range_end = end;
        self
    }

    pub fn max_payload_bytes(mut self, limit: usize) -> Self {
        self.config.session.max_payload_bytes = limit;
        self
    }

    pub fn max_file_bytes(mut self, limit: usize) -> Self {
        self.config.client.max_file_bytes = limit;
        self
    }

    pub fn handshake_timeout_secs(mut self, secs: u64) -> Self {
        self.config.daemon.handshake_timeout_secs = secs;
        self
    }

    pub fn socket_path(mut self, path: impl Into<String>) -> Self {
        self.config.daemon.socket_path = Some(path.into());
        self
    }

    pub fn build(self) -> AppConfig {
        self.config
    }
}

impl Default for TestConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
