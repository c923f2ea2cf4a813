//! Configuration builders for tests.
//!
//! Use [`TestConfigBuilder`] to create customised [`AppConfig`] values without
//! repeating boilerplate across crate boundaries.

use std::path::Path;

use ubctl_config::AppConfig;

/// API key set by [`TestConfigBuilder::new`].
pub const TEST_API_KEY: &str = "test-api-key";

/// Fluent builder for [`AppConfig`] in tests.
///
/// Starts from defaults plus [`TEST_API_KEY`], so the result validates.
///
/// # Example
///
/// ```ignore
/// let config = TestConfigBuilder::new()
///     .control_tcp(&daemon.address())
///     .rate_limit(1.0, 2.0)
///     .build();
/// ```
pub struct TestConfigBuilder {
    config: AppConfig,
}

impl TestConfigBuilder {
    pub fn new() -> Self {
        let mut config = AppConfig::default();
        config.security.api_key = TEST_API_KEY.to_string();
        Self { config }
    }

    pub fn api_key(mut self, key: &str) -> Self {
        self.config.security.api_key = key.to_string();
        self
    }

    pub fn server_port(mut self, port: u16) -> Self {
        self.config.server.port = port;
        self
    }

    /// Point the control channel at a plain-TCP `host:port`.
    pub fn control_tcp(mut self, address: &str) -> Self {
        let (host, port) = address.rsplit_once(':').unwrap_or((address, "8953"));
        self.config.control.transport = "tcp".to_string();
        self.config.control.host = host.to_string();
        self.config.control.port = port.parse().unwrap_or(8953);
        self
    }

    /// Point the control channel at a local socket.
    pub fn control_unix(mut self, socket_path: &Path) -> Self {
        self.config.control.transport = "unix".to_string();
        self.config.control.socket_path = Some(socket_path.display().to_string());
        self
    }

    /// Shrink every control deadline to keep failure tests fast.
    pub fn fast_timeouts(mut self) -> Self {
        let control = &mut self.config.control;
        control.connect_timeout_ms = 500;
        control.read_timeout_ms = 300;
        control.write_timeout_ms = 300;
        control.probe_timeout_ms = 20;
        control.retry_read_timeout_ms = 50;
        self
    }

    pub fn rate_limit(mut self, requests_per_second: f64, burst_size: f64) -> Self {
        self.config.rate_limit.requests_per_second = requests_per_second;
        self.config.rate_limit.burst_size = burst_size;
        self
    }

    pub fn log_level(mut self, level: &str) -> Self {
        self.config.logging.level = level.to_string();
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
