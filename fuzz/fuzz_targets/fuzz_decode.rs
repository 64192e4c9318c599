#![no_main]

use libfuzzer_sys::fuzz_target;
use nxcp::core::codec::decode_with_limit;

fuzz_target!(|data: &[u8]| {
    // Field table parsing and inflation must reject, never panic
    let _ = decode_with_limit(data, 1 << 20);
});
