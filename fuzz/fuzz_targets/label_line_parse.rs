//! Feeds arbitrary UTF-8 lines to the label line parser.
//!
//! The parser zero-fills anything it cannot read, so the only failures
//! this target can find are panics and hangs.

#![no_main]

use boxset::loader::fuzz_parse_label_line;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if data.len() > 1024 * 1024 {
        return;
    }

    let Ok(line) = std::str::from_utf8(data) else {
        return;
    };

    let _ = fuzz_parse_label_line(line);
});
