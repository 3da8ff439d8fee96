#![no_main]
use bisect_log::decode::LineDecoder;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Arbitrary input must decode or be rejected, never panic
    if let Ok(line) = std::str::from_utf8(data) {
        let _ = LineDecoder::default().decode_line(line);
    }
});
