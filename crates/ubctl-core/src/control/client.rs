//! Typed operations over a control transport.

use std::path::Path;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use ubctl_config::ControlConfig;
use ubctl_macros::Validate;

use super::transport::{StreamTransport, Timeouts, Transport, UnixTransport};
use super::{Command, ControlError};
use crate::decode::{StatsInfo, StatusInfo};
use crate::tls;

/// A zone as the daemon reports and accepts it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct Zone {
    #[validate(non_empty, no_whitespace)]
    pub name: String,

    /// `primary`, `secondary`, `stub` or `forward`.
    #[serde(rename = "type")]
    #[validate(one_of("primary", "secondary", "stub", "forward"))]
    pub kind: String,

    /// Zone file path on the daemon host, if the zone has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub masters: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub forwards: Vec<String>,
}

/// Client for the daemon's control channel.
///
/// Cheap to share behind an `Arc`; the transport decides whether commands
/// are serialized (persistent stream) or concurrent (local socket).
pub struct ControlClient {
    transport: Arc<dyn Transport>,
}

impl ControlClient {
    /// Wrap an existing transport.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    /// Build the transport described by `config` without touching the network.
    pub fn from_config(config: &ControlConfig) -> Result<Self, ControlError> {
        let timeouts = Timeouts::from_config(config);
        let transport: Arc<dyn Transport> = match config.transport.as_str() {
            "unix" => {
                let path = config.socket_path.as_deref().unwrap_or_default();
                Arc::new(UnixTransport::new(path, timeouts))
            }
            _ => match (&config.cert_file, &config.key_file) {
                (Some(cert), Some(key)) => {
                    let tls_config = tls::control_client_config(
                        Path::new(cert),
                        Path::new(key),
                        config.server_cert_file.as_deref().map(Path::new),
                    )
                    .map_err(super::TransportError::from)?;
                    Arc::new(StreamTransport::tls(
                        config.address(),
                        tls_config,
                        &config.server_name,
                        timeouts,
                    )?)
                }
                _ => Arc::new(StreamTransport::plain(config.address(), timeouts)),
            },
        };
        Ok(Self::new(transport))
    }

    /// Build the client and, for the persistent stream, verify the daemon
    /// answers `status` with a plausible reply before returning.
    pub async fn connect(config: &ControlConfig) -> Result<Self, ControlError> {
        let client = Self::from_config(config)?;
        if config.transport != "unix" {
            client.verify().await?;
        }
        Ok(client)
    }

    /// Run `status` and check it looks like the daemon's status output.
    pub async fn verify(&self) -> Result<(), ControlError> {
        let raw = self.send(&Command::new("status")?).await?;
        if !raw.contains("version:") || !raw.contains("threads:") {
            return Err(ControlError::Protocol(format!(
                "unexpected status reply from {}: {raw}",
                self.transport.target()
            )));
        }
        let status = StatusInfo::parse(&raw);
        info!(
            target_addr = %self.transport.target(),
            version = %status.version,
            threads = status.threads,
            "connected to resolver daemon"
        );
        Ok(())
    }

    /// Send one command and return the response text.
    ///
    /// An empty response, or one whose first word is `error`, is a
    /// [`ControlError::Protocol`] carrying the daemon's text.
    pub async fn send(&self, command: &Command) -> Result<String, ControlError> {
        debug!(command = command.verb(), "sending control command");
        let response = self.transport.exchange(command).await.inspect_err(|e| {
            warn!(command = command.verb(), error = %e, "control exchange failed");
        })?;

        if response.is_empty() {
            warn!(command = command.verb(), "daemon returned an empty response");
            return Err(ControlError::Protocol(format!(
                "empty response to {}",
                command.verb()
            )));
        }
        if is_error_reply(&response) {
            warn!(command = command.verb(), response = %response, "daemon rejected command");
            return Err(ControlError::Protocol(response));
        }
        Ok(response)
    }

    async fn send_text(&self, text: &str) -> Result<String, ControlError> {
        self.send(&Command::new(text)?).await
    }

    async fn send_with_arg(&self, verb: &str, arg: &str) -> Result<String, ControlError> {
        self.send(&Command::with_arg(verb, arg)?).await
    }

    async fn send_json<T: Serialize>(&self, verb: &str, payload: &T) -> Result<String, ControlError> {
        let json = serde_json::to_string(payload).map_err(ControlError::Encode)?;
        self.send_with_arg(verb, &json).await
    }

    fn decode_json<T: DeserializeOwned>(what: &'static str, raw: &str) -> Result<T, ControlError> {
        serde_json::from_str(raw).map_err(|source| ControlError::Decode { what, source })
    }

    /// Daemon status, decoded.
    pub async fn status(&self) -> Result<StatusInfo, ControlError> {
        let raw = self.send_text("status").await?;
        Ok(StatusInfo::parse(&raw))
    }

    /// Re-read the daemon's configuration and zones.
    pub async fn reload(&self) -> Result<String, ControlError> {
        self.send_text("reload").await
    }

    /// Flush the whole cache, or only entries under `domain`.
    pub async fn flush(&self, domain: Option<&str>) -> Result<String, ControlError> {
        match domain {
            Some(domain) => self.send_with_arg("flush", domain).await,
            None => self.send_text("flush").await,
        }
    }

    /// Query statistics, decoded.
    pub async fn stats(&self) -> Result<StatsInfo, ControlError> {
        let raw = self.send_text("stats").await?;
        Ok(StatsInfo::parse(&raw))
    }

    /// Free-form daemon information.
    pub async fn info(&self) -> Result<String, ControlError> {
        self.send_text("info").await
    }

    pub async fn list_zones(&self) -> Result<Vec<Zone>, ControlError> {
        let raw = self.send_text("list_zones").await?;
        Self::decode_json("list_zones", &raw)
    }

    pub async fn add_zone(&self, zone: &Zone) -> Result<(), ControlError> {
        self.send_json("add_zone", zone).await.map(drop)
    }

    pub async fn remove_zone(&self, name: &str) -> Result<(), ControlError> {
        self.send_with_arg("remove_zone", name).await.map(drop)
    }

    /// Replace the settings of an existing zone.
    pub async fn update_zone(&self, zone: &Zone) -> Result<(), ControlError> {
        self.send_json("update_zone", zone).await.map(drop)
    }

    pub async fn get_zone(&self, name: &str) -> Result<Zone, ControlError> {
        let raw = self.send_with_arg("get_zone", name).await?;
        Self::decode_json("get_zone", &raw)
    }

    /// Drop the transport's connection, if it keeps one.
    pub async fn close(&self) {
        self.transport.close().await;
    }

    pub fn target(&self) -> String {
        self.transport.target()
    }
}

/// `error` as the first word, optionally followed by a colon.
fn is_error_reply(response: &str) -> bool {
    response
        .trim_start()
        .strip_prefix("error")
        .is_some_and(|rest| rest.chars().next().is_none_or(|c| c == ':' || c.is_whitespace()))
}
