//! Fuzz target for Identifier::parse.
//!
//! Arbitrary strings must parse or fail cleanly, never panic.

#![no_main]

use libfuzzer_sys::fuzz_target;
use zerotrace_identity::Identifier;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        if let Ok(id) = Identifier::parse(s) {
            // Valid identifiers roundtrip through their string form.
            let roundtrip = Identifier::parse(id.as_str()).unwrap();
            assert_eq!(id, roundtrip);
            assert_eq!(id.digest().len(), 32);
        }
    }
});
