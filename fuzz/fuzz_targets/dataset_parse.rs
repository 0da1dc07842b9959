//! Fuzz target for bare data set parsing in both VR encodings.
//!
//! The first byte selects explicit or implicit VR; the rest is the data set.

#![no_main]

use dcmscrub::dicom::io_part10::fuzz_parse_dataset;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if data.len() > 10 * 1024 * 1024 {
        return;
    }
    let Some((&mode, rest)) = data.split_first() else {
        return;
    };

    let _ = fuzz_parse_dataset(rest, mode & 1 == 1);
});
