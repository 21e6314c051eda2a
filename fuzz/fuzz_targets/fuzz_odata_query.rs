#![no_main]

use libfuzzer_sys::fuzz_target;
use odata_engine::{QueryLimits, QueryOptions};

fuzz_target!(|data: &[u8]| {
    if data.len() > 4096 {
        return;
    }
    let Ok(pairs) = serde_urlencoded::from_bytes::<Vec<(String, String)>>(data) else {
        return;
    };
    let _ = QueryOptions::from_pairs(
        pairs.iter().map(|(k, v)| (k.as_str(), v.as_str())),
        &QueryLimits::default(),
    );
});
