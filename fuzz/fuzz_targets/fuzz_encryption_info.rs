#![no_main]

use libfuzzer_sys::fuzz_target;

/// Real descriptors are a few KiB; larger inputs only slow the XML path down.
const MAX_INPUT_BYTES: usize = 64 * 1024;

fuzz_target!(|data: &[u8]| {
    let data = &data[..data.len().min(MAX_INPUT_BYTES)];

    let Ok(info) = formula_doccrypt::parse_encryption_info(data) else {
        return;
    };

    // Whatever parses must serialize to something that parses again with the same version.
    let bytes = info.to_bytes();
    let reparsed = formula_doccrypt::parse_encryption_info(&bytes)
        .expect("serialized descriptor must parse");
    assert_eq!(reparsed.version(), info.version());
});
