//! Fuzz target for directory-record parsing and validation.
//!
//! Records off the network are attacker-controlled; parsing and
//! validating arbitrary bytes must never panic.

#![no_main]

use libfuzzer_sys::fuzz_target;
use zerotrace_dht::DirectoryRecord;

fuzz_target!(|data: &[u8]| {
    if let Ok(record) = DirectoryRecord::from_bytes(data) {
        let _ = record.validate(1_700_000_000);
        let _ = record.key();
    }
});
