//! Fuzz target for NodeId::from_hex.

#![no_main]

use libfuzzer_sys::fuzz_target;
use zerotrace_dht::NodeId;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        if let Ok(id) = NodeId::from_hex(s) {
            let roundtrip = NodeId::from_hex(&id.to_hex()).unwrap();
            assert_eq!(id, roundtrip);
        }
    }
});
