//! Fuzz target for delta application.

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;

#[derive(Arbitrary, Debug)]
struct Input {
    base: Vec<u8>,
    instructions: Vec<u8>,
    result_size: u16,
    /// Prefix a header that matches the base, so the instruction stream
    /// is reached.
    valid_header: bool,
}

fuzz_target!(|input: Input| {
    let mut delta = Vec::new();
    if input.valid_header {
        packhouse_git::write_size(&mut delta, input.base.len());
        packhouse_git::write_size(&mut delta, input.result_size as usize);
    }
    delta.extend_from_slice(&input.instructions);
    let _ = packhouse_git::undeltify(&input.base, &delta);
});
