//! Fuzz target for rule CSV parsing.
//!
//! This fuzzer feeds arbitrary byte sequences to the rule loader,
//! checking for panics, crashes, or hangs.

#![no_main]

use dcmscrub::rules::from_rules_slice;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if data.len() > 10 * 1024 * 1024 {
        return;
    }

    let _ = from_rules_slice(data);
});
