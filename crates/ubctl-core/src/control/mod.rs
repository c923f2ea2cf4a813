//! Daemon control channel.
//!
//! The daemon accepts one newline-terminated ASCII command per exchange and
//! answers with plain text. Two transports are supported:
//!
//! - [`StreamTransport`]: a single persistent TCP connection, optionally
//!   wrapped in mutual TLS. Responses end with two consecutive blank lines
//!   (or end-of-stream). Exchanges are serialized.
//! - [`UnixTransport`]: a fresh local-socket connection per command, prefixed
//!   with the protocol version token. Responses end at end-of-stream.
//!
//! [`ControlClient`] sits on top of either and exposes typed operations.

pub mod client;
pub mod framing;
pub mod transport;

use std::path::PathBuf;
use std::time::Duration;

pub use client::{ControlClient, Zone};
pub use framing::{Framing, ReadDeadlines, read_framed_response};
pub use transport::{StreamTransport, Timeouts, Transport, UnixTransport};

/// Version token sent before every command on the local socket.
pub const LOCAL_SOCKET_PREAMBLE: &str = "UBCT1";

/// A single control command, e.g. `flush example.com`.
///
/// Commands are immutable once built and are guaranteed to be one line of
/// printable ASCII.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    text: String,
}

impl Command {
    /// Build a command from its full text.
    pub fn new(text: impl Into<String>) -> Result<Self, ControlError> {
        let text = text.into();
        if text.trim().is_empty() {
            return Err(ControlError::InvalidCommand("command is empty".to_string()));
        }
        if text.contains(['\n', '\r']) {
            return Err(ControlError::InvalidCommand(
                "command must not contain line breaks".to_string(),
            ));
        }
        if !text.is_ascii() || text.chars().any(|c| c.is_ascii_control()) {
            return Err(ControlError::InvalidCommand(
                "command must be printable ASCII".to_string(),
            ));
        }
        Ok(Self { text })
    }

    /// Build `verb argument`.
    pub fn with_arg(verb: &str, arg: &str) -> Result<Self, ControlError> {
        Self::new(format!("{verb} {arg}"))
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// The first word of the command. Payloads can be large, so logs use this.
    pub fn verb(&self) -> &str {
        self.text.split_whitespace().next().unwrap_or_default()
    }

    /// Wire bytes: optional version token and two spaces, the command, newline.
    pub fn encode(&self, preamble: Option<&str>) -> Vec<u8> {
        match preamble {
            Some(token) => format!("{token}  {}\n", self.text).into_bytes(),
            None => format!("{}\n", self.text).into_bytes(),
        }
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.text)
    }
}

/// Failures below the protocol: dialing, TLS, reads, writes, deadlines.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("failed to connect to {target}: {source}")]
    Connect {
        target: String,
        source: std::io::Error,
    },

    #[error("control socket not found at {0}")]
    SocketMissing(PathBuf),

    #[error("TLS setup failed: {0}")]
    Tls(#[from] crate::tls::TlsError),

    #[error("invalid TLS server name {0:?}")]
    ServerName(String),

    #[error("failed to send command: {0}")]
    Write(#[source] std::io::Error),

    #[error("failed to read response: {0}")]
    Read(#[source] std::io::Error),

    #[error("{op} timed out after {after:?}")]
    Timeout { op: &'static str, after: Duration },

    #[error("connection closed before any response data arrived")]
    EmptyEof,
}

impl TransportError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, TransportError::Timeout { .. })
    }
}

/// Errors surfaced by [`ControlClient`] operations.
#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The daemon answered, but with an error or something unusable.
    /// Daemon error text is carried verbatim.
    #[error("{0}")]
    Protocol(String),

    #[error("invalid command: {0}")]
    InvalidCommand(String),

    #[error("failed to encode command payload: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("failed to decode {what} response: {source}")]
    Decode {
        what: &'static str,
        source: serde_json::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_command_encode_plain() {
        let cmd = Command::new("status").unwrap();
        assert_eq!(cmd.encode(None), b"status\n");
    }

    #[test]
    fn test_command_encode_with_preamble() {
        let cmd = Command::with_arg("flush", "example.com").unwrap();
        assert_eq!(
            cmd.encode(Some(LOCAL_SOCKET_PREAMBLE)),
            b"UBCT1  flush example.com\n"
        );
    }

    #[test]
    fn test_command_rejects_line_breaks() {
        assert!(matches!(
            Command::new("status\nreload"),
            Err(ControlError::InvalidCommand(_))
        ));
        assert!(matches!(
            Command::with_arg("flush", "a.example\r"),
            Err(ControlError::InvalidCommand(_))
        ));
    }

    #[test]
    fn test_command_rejects_empty_and_non_ascii() {
        assert!(Command::new("   ").is_err());
        assert!(Command::new("flush bücher.example").is_err());
        assert!(Command::new("flush\ta").is_err());
    }

    #[test]
    fn test_command_verb() {
        let cmd = Command::with_arg("add_zone", r#"{"name":"a.example","type":"primary"}"#).unwrap();
        assert_eq!(cmd.verb(), "add_zone");
        assert_eq!(cmd.to_string(), cmd.as_str());
    }

    #[test]
    fn test_timeout_classification() {
        let err = TransportError::Timeout {
            op: "read",
            after: Duration::from_millis(5),
        };
        assert!(err.is_timeout());
        assert!(!TransportError::EmptyEof.is_timeout());
    }
}
