#![deny(unsafe_code)]

//! ubctl core: administration of a recursive resolver through its control channel.
//!
//! The crate talks to the daemon's line-based control protocol, decodes its
//! status and statistics output, edits the zone files the daemon serves, and
//! exposes all of it as a JSON HTTP API.

use std::future::Future;
use std::pin::Pin;

/// Boxed `Send` future returned by [`control::Transport`] methods, which are
/// called through `Arc<dyn Transport>` and so cannot use `async fn`.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// HTTP API: router, handlers, authentication, rate limiting, serving.
pub mod api;
/// Compile-time build metadata (version, git hash, profile).
pub mod build_info;
/// Control-protocol transports, response framing, and the typed client.
pub mod control;
/// Decoders for the daemon's `status` and `stats` output.
pub mod decode;
/// Tracing subscriber setup.
pub mod logging;
/// Service lifecycle: startup, config reload, shutdown.
pub mod service;
/// PEM loading and rustls configuration for both directions.
pub mod tls;
/// Zone-file parsing, serialization, and record-level edits.
pub mod zonefile;
/// Zone orchestration: control-channel lookups plus zone-file edits plus reload.
pub mod zones;

pub use control::{Command, ControlClient, ControlError, Transport, TransportError, Zone};
pub use decode::{StatsInfo, StatusInfo};
pub use service::Service;
pub use zonefile::{Record, ZoneFile, ZoneFileError};
pub use zones::{ZoneError, ZoneManager};
