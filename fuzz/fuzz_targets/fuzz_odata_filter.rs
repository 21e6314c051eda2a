#![no_main]

use libfuzzer_sys::fuzz_target;
use odata_engine::parser::parse_filter;

fuzz_target!(|data: &[u8]| {
    // Limit input size to avoid OOM on pathological inputs
    if data.len() > 2048 {
        return;
    }
    if let Ok(s) = std::str::from_utf8(data) {
        // A tree that parsed must render to text that parses again
        if let Ok(expr) = parse_filter(s) {
            let rendered = expr.to_string();
            assert!(parse_filter(&rendered).is_ok(), "{rendered}");
        }
    }
});
