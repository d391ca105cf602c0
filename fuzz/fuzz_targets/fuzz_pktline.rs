//! Fuzz target for pkt-line framing.
//!
//! Decodes packets from arbitrary input and checks that data packets
//! re-encode to the bytes they were read from.

#![no_main]

use libfuzzer_sys::fuzz_target;
use packhouse_git::PktLine;

fuzz_target!(|data: &[u8]| {
    let mut rest = data;
    // Bounded so crafted input cannot spin.
    for _ in 0..1000 {
        match PktLine::decode(rest) {
            Ok(Some((pkt, used))) => {
                assert!(used >= 4 && used <= rest.len());
                if let PktLine::Data(_) = pkt {
                    assert!(pkt.encode().eq_ignore_ascii_case(&rest[..used]));
                }
                rest = &rest[used..];
            }
            Ok(None) | Err(_) => break,
        }
    }
});
