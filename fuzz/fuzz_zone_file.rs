//! Fuzz target for the zone-file parser and writer.
//!
//! Run with: cargo +nightly fuzz run fuzz_zone_file
//!
//! Parses arbitrary text, renders it, and parses the rendering again. The
//! second parse must see the same number of records and keep any SOA first.

#![no_main]

use libfuzzer_sys::fuzz_target;
use ubctl_core::ZoneFile;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    let zone = ZoneFile::parse("fuzz.zone", text);
    let reparsed = ZoneFile::parse("fuzz.zone", &zone.render());

    assert_eq!(zone.records.len(), reparsed.records.len());
    if reparsed.records.iter().any(|r| r.is_soa()) {
        assert!(reparsed.records[0].is_soa());
    }
});
