#![deny(unsafe_code)]

//! Configuration loading and validation for ubctl.
//!
//! Loads a TOML configuration file and validates it. [`AppConfig`] is the
//! single configuration value; it is read once at startup (and again on
//! `SIGHUP`) and handed to constructors explicitly.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use ubctl_macros::Redact;

/// Errors that can occur during configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("validation error: {0}")]
    Validation(String),
}

/// Top-level application configuration.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// HTTP API listener.
    #[serde(default)]
    pub server: ServerConfig,

    /// Connection to the resolver daemon's control interface.
    #[serde(default)]
    pub control: ControlConfig,

    /// API authentication.
    #[serde(default)]
    pub security: SecurityConfig,

    /// Per-client request rate limiting.
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// HTTP API listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address the API binds to.
    #[serde(default = "default_server_host")]
    pub host: String,

    /// Port the API binds to.
    #[serde(default = "default_server_port")]
    pub port: u16,

    /// Serve HTTPS instead of plain HTTP.
    #[serde(default)]
    pub use_tls: bool,

    /// PEM certificate chain for HTTPS.
    #[serde(default)]
    pub cert_file: Option<String>,

    /// PEM private key for HTTPS.
    #[serde(default)]
    pub key_file: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_server_host(),
            port: default_server_port(),
            use_tls: false,
            cert_file: None,
            key_file: None,
        }
    }
}

impl ServerConfig {
    /// `host:port` string suitable for binding.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn default_server_host() -> String {
    "127.0.0.1".to_string()
}

fn default_server_port() -> u16 {
    8080
}

/// Daemon control-channel configuration.
///
/// ## TOML Example
///
/// ```toml
/// [control]
/// transport = "tcp"
/// host = "127.0.0.1"
/// port = 8953
/// cert_file = "/etc/unbound/unbound_control.pem"
/// key_file = "/etc/unbound/unbound_control.key"
/// server_cert_file = "/etc/unbound/unbound_server.pem"
/// ```
///
/// With `transport = "unix"` only `socket_path` is used.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlConfig {
    /// `"tcp"` (persistent stream, TLS when cert/key are set) or `"unix"`
    /// (fresh local-socket connection per command).
    #[serde(default = "default_control_transport")]
    pub transport: String,

    #[serde(default = "default_control_host")]
    pub host: String,

    #[serde(default = "default_control_port")]
    pub port: u16,

    /// Local control socket (when `transport = "unix"`).
    #[serde(default)]
    pub socket_path: Option<String>,

    /// Client certificate presented to the daemon.
    #[serde(default)]
    pub cert_file: Option<String>,

    /// Private key for `cert_file`.
    #[serde(default)]
    pub key_file: Option<String>,

    /// Trust anchor for the daemon's certificate. When unset the daemon
    /// certificate is not verified.
    #[serde(default)]
    pub server_cert_file: Option<String>,

    /// Name expected in the daemon certificate.
    #[serde(default = "default_server_name")]
    pub server_name: String,

    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Deadline for reading one complete response.
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,

    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,

    /// Deadline for the pre-send liveness probe.
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,

    /// Deadline for the single retry read after an empty end-of-stream.
    #[serde(default = "default_retry_read_timeout_ms")]
    pub retry_read_timeout_ms: u64,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            transport: default_control_transport(),
            host: default_control_host(),
            port: default_control_port(),
            socket_path: None,
            cert_file: None,
            key_file: None,
            server_cert_file: None,
            server_name: default_server_name(),
            connect_timeout_ms: default_connect_timeout_ms(),
            read_timeout_ms: default_read_timeout_ms(),
            write_timeout_ms: default_write_timeout_ms(),
            probe_timeout_ms: default_probe_timeout_ms(),
            retry_read_timeout_ms: default_retry_read_timeout_ms(),
        }
    }
}

impl ControlConfig {
    /// `host:port` of the daemon's control interface.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Whether the persistent stream is wrapped in mutual TLS.
    pub fn uses_tls(&self) -> bool {
        self.cert_file.is_some() && self.key_file.is_some()
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn retry_read_timeout(&self) -> Duration {
        Duration::from_millis(self.retry_read_timeout_ms)
    }
}

fn default_control_transport() -> String {
    "tcp".to_string()
}

fn default_control_host() -> String {
    "127.0.0.1".to_string()
}

fn default_control_port() -> u16 {
    8953
}

fn default_server_name() -> String {
    "unbound".to_string()
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_read_timeout_ms() -> u64 {
    5_000
}

fn default_write_timeout_ms() -> u64 {
    5_000
}

fn default_probe_timeout_ms() -> u64 {
    100
}

fn default_retry_read_timeout_ms() -> u64 {
    1_000
}

/// API authentication.
///
/// Requests under `/api/v1` must carry this key in the `X-API-Key` header.
#[derive(Default, Clone, Serialize, Deserialize, Redact)]
pub struct SecurityConfig {
    #[serde(default)]
    #[redact]
    pub api_key: String,
}

/// Token-bucket parameters applied per client IP.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Tokens refilled per second.
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: f64,

    /// Bucket capacity.
    #[serde(default = "default_burst_size")]
    pub burst_size: f64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: default_requests_per_second(),
            burst_size: default_burst_size(),
        }
    }
}

fn default_requests_per_second() -> f64 {
    10.0
}

fn default_burst_size() -> f64 {
    20.0
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g. "info", "debug", "trace").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format: "text" or "json".
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

impl AppConfig {
    /// Load configuration from a TOML file at the given path using async I/O.
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = tokio::fs::read_to_string(path).await?;
        let config = Self::parse(&content)?;
        tracing::debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        // Server
        if self.server.port == 0 {
            return Err(ConfigError::Validation(
                "server.port must be non-zero".to_string(),
            ));
        }
        if self.server.host.is_empty() {
            return Err(ConfigError::Validation(
                "server.host must not be empty".to_string(),
            ));
        }
        if self.server.cert_file.is_some() != self.server.key_file.is_some() {
            return Err(ConfigError::Validation(
                "server.cert_file and server.key_file must be set together".to_string(),
            ));
        }
        if self.server.use_tls && self.server.cert_file.is_none() {
            return Err(ConfigError::Validation(
                "server.use_tls requires server.cert_file and server.key_file".to_string(),
            ));
        }

        // Control channel
        let control = &self.control;
        let valid_transports = ["tcp", "unix"];
        if !valid_transports.contains(&control.transport.as_str()) {
            return Err(ConfigError::Validation(format!(
                "control.transport must be one of {:?}, got {:?}",
                valid_transports, control.transport
            )));
        }
        if control.transport == "tcp" {
            if control.port == 0 {
                return Err(ConfigError::Validation(
                    "control.port must be non-zero".to_string(),
                ));
            }
            if control.host.is_empty() {
                return Err(ConfigError::Validation(
                    "control.host must not be empty".to_string(),
                ));
            }
        }
        if control.transport == "unix" && control.socket_path.as_deref().is_none_or(str::is_empty) {
            return Err(ConfigError::Validation(
                "control.socket_path is required when control.transport is \"unix\"".to_string(),
            ));
        }
        if control.cert_file.is_some() != control.key_file.is_some() {
            return Err(ConfigError::Validation(
                "control.cert_file and control.key_file must be set together".to_string(),
            ));
        }
        if control.server_name.is_empty() {
            return Err(ConfigError::Validation(
                "control.server_name must not be empty".to_string(),
            ));
        }
        let timeouts = [
            ("connect_timeout_ms", control.connect_timeout_ms),
            ("read_timeout_ms", control.read_timeout_ms),
            ("write_timeout_ms", control.write_timeout_ms),
            ("probe_timeout_ms", control.probe_timeout_ms),
            ("retry_read_timeout_ms", control.retry_read_timeout_ms),
        ];
        for (name, value) in timeouts {
            if value == 0 {
                return Err(ConfigError::Validation(format!(
                    "control.{name} must be non-zero"
                )));
            }
        }

        // Security
        if self.security.api_key.is_empty() {
            return Err(ConfigError::Validation(
                "security.api_key must not be empty".to_string(),
            ));
        }

        // Rate limiting
        if !(self.rate_limit.requests_per_second > 0.0) {
            return Err(ConfigError::Validation(format!(
                "rate_limit.requests_per_second must be positive, got {}",
                self.rate_limit.requests_per_second
            )));
        }
        if !(self.rate_limit.burst_size >= 1.0) {
            return Err(ConfigError::Validation(format!(
                "rate_limit.burst_size must be at least 1, got {}",
                self.rate_limit.burst_size
            )));
        }

        // Logging
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::Validation(format!(
                "logging.level must be one of {:?}, got {:?}",
                valid_levels, self.logging.level
            )));
        }
        let valid_formats = ["text", "json"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            return Err(ConfigError::Validation(format!(
                "logging.format must be one of {:?}, got {:?}",
                valid_formats, self.logging.format
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    const MINIMAL: &str = r#"
        [security]
        api_key = "test-key"
    "#;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.control.transport, "tcp");
        assert_eq!(config.control.port, 8953);
        assert_eq!(config.control.server_name, "unbound");
        assert_eq!(config.logging.level, "info");
        assert!(!config.control.uses_tls());
    }

    #[test]
    fn test_parse_minimal_toml() {
        let config = AppConfig::parse(MINIMAL).unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.control.address(), "127.0.0.1:8953");
        assert_eq!(config.control.read_timeout(), Duration::from_secs(5));
        assert_eq!(config.control.probe_timeout(), Duration::from_millis(100));
    }

    #[test]
    fn test_empty_config_rejected_without_api_key() {
        let result = AppConfig::parse("");
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_parse_full_toml() {
        let toml = r#"
            [server]
            host = "0.0.0.0"
            port = 9443
            use_tls = true
            cert_file = "/etc/ubctl/api.pem"
            key_file = "/etc/ubctl/api.key"

            [control]
            transport = "tcp"
            host = "10.0.0.53"
            port = 8953
            cert_file = "/etc/unbound/unbound_control.pem"
            key_file = "/etc/unbound/unbound_control.key"
            server_cert_file = "/etc/unbound/unbound_server.pem"
            read_timeout_ms = 2500

            [security]
            api_key = "s3cret"

            [rate_limit]
            requests_per_second = 5.0
            burst_size = 10.0

            [logging]
            level = "debug"
            format = "json"
        "#;
        let config = AppConfig::parse(toml).unwrap();
        assert_eq!(config.server.bind_addr(), "0.0.0.0:9443");
        assert!(config.server.use_tls);
        assert_eq!(config.control.address(), "10.0.0.53:8953");
        assert!(config.control.uses_tls());
        assert_eq!(config.control.read_timeout(), Duration::from_millis(2500));
        assert_eq!(config.security.api_key, "s3cret");
        assert_eq!(config.rate_limit.burst_size, 10.0);
        assert_eq!(config.logging.format, "json");
    }

    #[test]
    fn test_unix_transport_requires_socket_path() {
        let toml = r#"
            [control]
            transport = "unix"

            [security]
            api_key = "k"
        "#;
        assert!(AppConfig::parse(toml).is_err());

        let toml = r#"
            [control]
            transport = "unix"
            socket_path = "/run/unbound.ctl"

            [security]
            api_key = "k"
        "#;
        let config = AppConfig::parse(toml).unwrap();
        assert_eq!(config.control.socket_path.as_deref(), Some("/run/unbound.ctl"));
    }

    #[test]
    fn test_validation_rejects_unknown_transport() {
        let toml = r#"
            [control]
            transport = "udp"

            [security]
            api_key = "k"
        "#;
        assert!(AppConfig::parse(toml).is_err());
    }

    #[test]
    fn test_validation_rejects_half_configured_client_cert() {
        let toml = r#"
            [control]
            cert_file = "/etc/unbound/unbound_control.pem"

            [security]
            api_key = "k"
        "#;
        assert!(AppConfig::parse(toml).is_err());
    }

    #[test]
    fn test_validation_rejects_tls_without_cert() {
        let toml = r#"
            [server]
            use_tls = true

            [security]
            api_key = "k"
        "#;
        assert!(AppConfig::parse(toml).is_err());
    }

    #[test]
    fn test_validation_rejects_zero_port() {
        let toml = r#"
            [server]
            port = 0

            [security]
            api_key = "k"
        "#;
        assert!(AppConfig::parse(toml).is_err());
    }

    #[test]
    fn test_validation_rejects_zero_timeout() {
        let toml = r#"
            [control]
            probe_timeout_ms = 0

            [security]
            api_key = "k"
        "#;
        let err = AppConfig::parse(toml).unwrap_err();
        assert!(err.to_string().contains("probe_timeout_ms"));
    }

    #[test]
    fn test_validation_rejects_bad_rate_limit() {
        let toml = r#"
            [rate_limit]
            requests_per_second = 0.0

            [security]
            api_key = "k"
        "#;
        assert!(AppConfig::parse(toml).is_err());

        let toml = r#"
            [rate_limit]
            burst_size = 0.5

            [security]
            api_key = "k"
        "#;
        assert!(AppConfig::parse(toml).is_err());
    }

    #[test]
    fn test_validation_rejects_bad_log_settings() {
        let toml = r#"
            [logging]
            level = "loud"

            [security]
            api_key = "k"
        "#;
        assert!(AppConfig::parse(toml).is_err());

        let toml = r#"
            [logging]
            format = "xml"

            [security]
            api_key = "k"
        "#;
        assert!(AppConfig::parse(toml).is_err());
    }

    #[test]
    fn test_api_key_redacted_in_debug() {
        let config = AppConfig::parse(r#"
            [security]
            api_key = "hunter2"
        "#)
        .unwrap();
        let debug = format!("{config:?}");
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("[REDACTED]"));
    }

    // ── Async file-based loading ──────────────────────────────────────

    #[tokio::test]
    async fn test_load_from_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("ubctl.toml");
        tokio::fs::write(
            &path,
            b"[server]\nport = 4242\nhost = \"0.0.0.0\"\n[security]\napi_key = \"k\"\n",
        )
        .await
        .unwrap();

        let config = AppConfig::load(&path).await.unwrap();
        assert_eq!(config.server.port, 4242);
        assert_eq!(config.server.host, "0.0.0.0");
    }

    #[tokio::test]
    async fn test_load_nonexistent_file() {
        let result = AppConfig::load(Path::new("/nonexistent/file.toml")).await;
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }

    #[tokio::test]
    async fn test_load_invalid_toml_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("bad.toml");
        tokio::fs::write(&path, b"not valid toml [[[").await.unwrap();

        let result = AppConfig::load(&path).await;
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::Validation("bad value".to_string());
        assert_eq!(err.to_string(), "validation error: bad value");
    }
}
