//! Feeds arbitrary bytes to the whole-file label parser.

#![no_main]

use boxset::loader::fuzz_parse_label_bytes;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if data.len() > 10 * 1024 * 1024 {
        return;
    }

    let _ = fuzz_parse_label_bytes(data);
});
