//! Fuzz target for Part 10 parsing.
//!
//! Inputs that parse are also checked for pixel consistency and written
//! back out, so the decoder and the serializer see fuzzed records too.

#![no_main]

use dcmscrub::dicom::{check_pixel_consistency, io_part10};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if data.len() > 10 * 1024 * 1024 {
        return;
    }

    if let Ok(record) = io_part10::from_part10_slice(data) {
        let _ = check_pixel_consistency(&record);
        let _ = io_part10::to_part10_vec(&record);
    }
});
