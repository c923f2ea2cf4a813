//! Fuzz target for the `status` and `stats` decoders.
//!
//! Run with: cargo +nightly fuzz run fuzz_daemon_output
//!
//! Daemon output is untrusted text; decoding must never panic.

#![no_main]

use libfuzzer_sys::fuzz_target;
use ubctl_core::{StatsInfo, StatusInfo};

fuzz_target!(|data: &[u8]| {
    let text = String::from_utf8_lossy(data);
    let _ = StatusInfo::parse(&text);
    let _ = StatsInfo::parse(&text);
});
