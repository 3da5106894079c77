use std::io::{Cursor, Read, Seek, SeekFrom};

use hmac::{Hmac, Mac};
use sha1::Sha1;

use formula_doccrypt::{
    decrypt_with_password, encrypt_to_vec, parse_encryption_info, AgileVerifier, ChainingMode,
    CipherAlgorithm, DocCryptError, EncryptOptions, EncryptedContainer, EncryptionInfo,
    EncryptionKey, PurposeBlockKey, Verifier, SEGMENT_SIZE,
};

const PASSWORD: &str = "Secret1";

fn patterned_bytes(len: usize) -> Vec<u8> {
    (0..len)
        .map(|i| (i.wrapping_mul(7) ^ (i >> 5) ^ (i >> 13)) as u8)
        .collect()
}

fn encrypted(plain: &[u8]) -> Vec<u8> {
    encrypt_to_vec(
        plain,
        PASSWORD,
        EncryptOptions {
            algorithm: CipherAlgorithm::Aes128,
            chaining: ChainingMode::Cbc,
            spin_count: 100,
            ..EncryptOptions::default()
        },
    )
    .expect("encrypt")
}

#[test]
fn direct_seek_matches_sequential_read() {
    let plain = patterned_bytes(6 * SEGMENT_SIZE + 1234);
    let bytes = encrypted(&plain);

    for k in 0..=6u64 {
        let mut stream = decrypt_with_password(Cursor::new(&bytes), PASSWORD).expect("open");
        stream
            .seek(SeekFrom::Start(k * SEGMENT_SIZE as u64))
            .expect("seek");
        let mut buf = vec![0u8; SEGMENT_SIZE];
        let mut got = 0;
        while got < buf.len() {
            let n = stream.read(&mut buf[got..]).expect("read");
            if n == 0 {
                break;
            }
            got += n;
        }
        let start = k as usize * SEGMENT_SIZE;
        let end = (start + SEGMENT_SIZE).min(plain.len());
        assert_eq!(&buf[..got], &plain[start..end], "segment {k}");
    }
}

#[test]
fn backwards_and_unaligned_seeks() {
    let plain = patterned_bytes(3 * SEGMENT_SIZE);
    let bytes = encrypted(&plain);
    let mut stream = decrypt_with_password(Cursor::new(&bytes), PASSWORD).expect("open");

    for &(pos, len) in &[(10_000usize, 50usize), (5, 4090), (4090, 20), (0, 1), (12_000, 288)] {
        stream.seek(SeekFrom::Start(pos as u64)).expect("seek");
        let mut buf = vec![0u8; len];
        stream.read_exact(&mut buf).expect("read_exact");
        assert_eq!(buf, &plain[pos..pos + len], "pos {pos}");
        assert_eq!(stream.position(), (pos + len) as u64);
    }

    stream.seek(SeekFrom::End(-3)).expect("seek from end");
    let mut tail = Vec::new();
    stream.read_to_end(&mut tail).expect("read tail");
    assert_eq!(tail, &plain[plain.len() - 3..]);
}

#[test]
fn position_at_and_past_end() {
    let plain = patterned_bytes(5000);
    let bytes = encrypted(&plain);
    let mut stream = decrypt_with_password(Cursor::new(&bytes), PASSWORD).expect("open");

    stream.set_position(5000).expect("position == length");
    let mut buf = [0u8; 16];
    assert_eq!(stream.read(&mut buf).expect("read at end"), 0);

    let err = stream.set_position(5001).expect_err("past end");
    assert!(matches!(
        err,
        DocCryptError::InvalidRange {
            position: 5001,
            length: 5000
        }
    ));
    let err = stream.seek(SeekFrom::Start(5001)).expect_err("past end");
    assert_eq!(err.kind(), std::io::ErrorKind::InvalidInput);
}

#[test]
fn verify_integrity_accepts_untouched_package() {
    let plain = patterned_bytes(9000);
    let bytes = encrypted(&plain);
    let mut stream = decrypt_with_password(Cursor::new(&bytes), PASSWORD).expect("open");
    stream.seek(SeekFrom::Start(77)).expect("seek");
    stream.verify_integrity().expect("integrity");
    assert_eq!(stream.position(), 77);
}

#[test]
fn verify_integrity_detects_tampering() {
    let plain = patterned_bytes(9000);
    let bytes = encrypted(&plain);

    // Flip one ciphertext byte in the second segment and rebuild the container.
    let mut container = EncryptedContainer::open(Cursor::new(&bytes)).expect("open container");
    let info = container.read_encryption_info().expect("info");
    let mut package = Vec::new();
    container
        .into_package_stream()
        .expect("package")
        .read_to_end(&mut package)
        .expect("read package");
    package[8 + SEGMENT_SIZE + 100] ^= 0x01;
    let tampered = formula_doccrypt::build_container(None, &info, &package).expect("rebuild");

    // Decryption itself does not check the HMAC.
    let mut stream = decrypt_with_password(Cursor::new(&tampered), PASSWORD).expect("open");
    let mut out = Vec::new();
    stream.read_to_end(&mut out).expect("read");
    assert_eq!(&out[..SEGMENT_SIZE], &plain[..SEGMENT_SIZE]);
    assert_ne!(out, plain);

    assert!(matches!(
        stream.verify_integrity(),
        Err(DocCryptError::IntegrityCheckFailed)
    ));
}

#[test]
fn stored_hmac_matches_independent_computation() {
    let plain = patterned_bytes(4097);
    let bytes = encrypted(&plain);

    let mut container = EncryptedContainer::open(Cursor::new(&bytes)).expect("open container");
    let EncryptionInfo::Agile(info) =
        parse_encryption_info(&container.read_encryption_info().expect("info")).expect("parse")
    else {
        panic!("expected Agile");
    };

    let mut kek = EncryptionKey::agile(
        info.password.cipher.params(),
        &info.password.cipher.salt,
        info.password.spin_count,
    )
    .expect("kek");
    let content_key = Verifier::Agile(AgileVerifier::from_info(&info))
        .unlock(PASSWORD, &mut kek)
        .expect("unlock")
        .expect("password accepted");

    let data_key =
        EncryptionKey::agile(info.key_data.params(), &info.key_data.salt, 0).expect("data key");
    let engine = info
        .key_data
        .params()
        .engine(content_key.as_bytes())
        .expect("engine");
    let di = info.data_integrity.as_ref().expect("dataIntegrity");

    let hmac_key = engine
        .transform(&data_key.derive_iv(Some(PurposeBlockKey::HMAC_KEY.as_bytes())))
        .expect("transform")
        .decrypt_to_vec(&di.encrypted_hmac_key)
        .expect("decrypt hmac key");
    let stored = engine
        .transform(&data_key.derive_iv(Some(PurposeBlockKey::HMAC_VALUE.as_bytes())))
        .expect("transform")
        .decrypt_to_vec(&di.encrypted_hmac_value)
        .expect("decrypt hmac value");

    let mut mac = <Hmac<Sha1> as Mac>::new_from_slice(&hmac_key[..20]).expect("hmac key");
    mac.update(&plain);
    let computed = mac.finalize().into_bytes();
    assert_eq!(&stored[..20], computed.as_slice());
}
