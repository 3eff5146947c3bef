//! Fuzz target for wire-message JSON parsing and validation.
//!
//! Arbitrary bodies must deserialize-or-reject without panicking, and
//! anything that validates must survive a serialize/parse roundtrip.

#![no_main]

use libfuzzer_sys::fuzz_target;
use zerotrace_proto::WireMessage;

fuzz_target!(|data: &[u8]| {
    if let Ok(wire) = serde_json::from_slice::<WireMessage>(data) {
        let _ = wire.validate();

        let json = serde_json::to_vec(&wire).expect("serializing a parsed message");
        let back: WireMessage = serde_json::from_slice(&json).expect("reparsing");
        assert_eq!(back.signature, wire.signature);
        assert_eq!(back.ttl, wire.ttl);
    }
});
