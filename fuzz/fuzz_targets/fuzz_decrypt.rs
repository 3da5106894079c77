#![no_main]

use std::io::{Cursor, Read, Seek, SeekFrom};

use libfuzzer_sys::fuzz_target;

const MAX_INPUT_BYTES: usize = 256 * 1024;

fuzz_target!(|data: &[u8]| {
    let data = &data[..data.len().min(MAX_INPUT_BYTES)];

    // Keep each iteration fast: refuse expensive descriptors before hashing.
    let options = formula_doccrypt::DecryptOptions {
        max_spin_count: 16,
        ..Default::default()
    };
    let mut callback = |_: &formula_doccrypt::PasswordRequest| Some("fuzz".to_string());
    let Ok(mut stream) = formula_doccrypt::decrypt(Cursor::new(data), &mut callback, &options)
    else {
        return;
    };

    let len = stream.len();
    let mut out = Vec::new();
    if stream.read_to_end(&mut out).is_ok() {
        assert_eq!(out.len() as u64, len);
    }
    if len > 0 {
        let _ = stream.seek(SeekFrom::Start(len / 2));
        let mut buf = [0u8; 64];
        let _ = stream.read(&mut buf);
    }
    let _ = stream.verify_integrity();
});
