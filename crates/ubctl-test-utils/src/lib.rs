#![deny(unsafe_code)]

//! Shared test utilities for the ubctl workspace.
//!
//! Provides a scriptable fake control daemon, config builders, zone-file
//! fixtures, and tracing helpers so that individual crate tests stay
//! concise and consistent.
//!
//! Add this crate as a `[dev-dependency]` in any workspace member:
//!
//! ```toml
//! [dev-dependencies]
//! ubctl-test-utils = { workspace = true }
//! ```

pub mod config;
pub mod daemon;
pub mod fixtures;
pub mod tracing_setup;

pub use config::TestConfigBuilder;
pub use daemon::{FakeDaemon, Reply};
