//! Password verification.
//!
//! A wrong password is reported as `Ok(None)` / `Ok(false)`; errors are reserved for malformed
//! verifier data and for passwords the key derivation refuses.

use std::fmt;

use rand::{CryptoRng, RngCore};
use zeroize::Zeroizing;

use crate::error::{DocCryptError, Result};
use crate::info::{
    AgileInfo, StandardVerifierData, ENCRYPTED_VERIFIER_HASH_LEN, VERIFIER_LEN,
};
use crate::kdf::{EncryptionKey, PurposeBlockKey};
use crate::util::{ct_eq, sha1, SHA1_LEN};

/// The key that encrypts the package content.
pub struct ContentKey(Zeroizing<Vec<u8>>);

impl ContentKey {
    pub fn new(bytes: &[u8]) -> Self {
        Self(Zeroizing::new(bytes.to_vec()))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for ContentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContentKey")
            .field("len", &self.0.len())
            .finish()
    }
}

#[derive(Debug, Clone)]
pub enum Verifier {
    Standard(StandardVerifier),
    Agile(AgileVerifier),
}

impl Verifier {
    /// Derive the password hash into `key` and check it.
    pub fn verify_pass(&self, password: &str, key: &mut EncryptionKey) -> Result<bool> {
        self.unlock(password, key).map(|content_key| content_key.is_some())
    }

    /// Like [`Verifier::verify_pass`], but hand back the content key on success.
    pub fn unlock(&self, password: &str, key: &mut EncryptionKey) -> Result<Option<ContentKey>> {
        key.pre_calc_key(password)?;
        match self {
            Self::Standard(v) => v.unlock(key),
            Self::Agile(v) => v.unlock(key),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StandardVerifier {
    encrypted_verifier: [u8; VERIFIER_LEN],
    encrypted_verifier_hash: [u8; ENCRYPTED_VERIFIER_HASH_LEN],
    hash_size: usize,
}

impl StandardVerifier {
    pub fn from_info(data: &StandardVerifierData) -> Self {
        Self {
            encrypted_verifier: data.encrypted_verifier,
            encrypted_verifier_hash: data.encrypted_verifier_hash,
            hash_size: (data.verifier_hash_size as usize).min(SHA1_LEN),
        }
    }

    /// Check a key whose password hash has already been computed.
    ///
    /// For Standard, the verifier key is the content key.
    pub fn unlock(&self, key: &EncryptionKey) -> Result<Option<ContentKey>> {
        let derived = key.calc_key(PurposeBlockKey::DATA_ENCRYPTION, None)?;
        let transform = derived.transform(key.params())?;
        let verifier = transform.decrypt_to_vec(&self.encrypted_verifier)?;
        let verifier_hash = transform.decrypt_to_vec(&self.encrypted_verifier_hash)?;

        let expected = sha1(&verifier);
        if ct_eq(&expected[..self.hash_size], &verifier_hash[..self.hash_size]) {
            Ok(Some(ContentKey::new(derived.key())))
        } else {
            Ok(None)
        }
    }

    /// Build verifier data for a new Standard descriptor.
    pub fn generate<R: RngCore + CryptoRng>(
        key: &EncryptionKey,
        rng: &mut R,
    ) -> Result<StandardVerifierData> {
        let derived = key.calc_key(PurposeBlockKey::DATA_ENCRYPTION, None)?;
        let transform = derived.transform(key.params())?;

        let mut verifier = Zeroizing::new([0u8; VERIFIER_LEN]);
        rng.fill_bytes(&mut verifier[..]);
        let mut hash = Zeroizing::new([0u8; ENCRYPTED_VERIFIER_HASH_LEN]);
        hash[..SHA1_LEN].copy_from_slice(&sha1(&verifier[..]));

        let mut encrypted_verifier = *verifier;
        transform.encrypt(&mut encrypted_verifier)?;
        let mut encrypted_verifier_hash = *hash;
        transform.encrypt(&mut encrypted_verifier_hash)?;

        Ok(StandardVerifierData {
            salt: key.salt().to_vec(),
            encrypted_verifier,
            verifier_hash_size: SHA1_LEN as u32,
            encrypted_verifier_hash,
        })
    }
}

#[derive(Debug, Clone)]
pub struct AgileVerifier {
    pub encrypted_verifier_hash_input: Vec<u8>,
    pub encrypted_verifier_hash_value: Vec<u8>,
    pub encrypted_key_value: Vec<u8>,
    salt_size: usize,
    hash_size: usize,
    content_key_len: usize,
}

impl AgileVerifier {
    pub fn from_info(info: &AgileInfo) -> Self {
        let p = &info.password;
        Self {
            encrypted_verifier_hash_input: p.encrypted_verifier_hash_input.clone(),
            encrypted_verifier_hash_value: p.encrypted_verifier_hash_value.clone(),
            encrypted_key_value: p.encrypted_key_value.clone(),
            salt_size: p.cipher.salt.len(),
            hash_size: p.cipher.hash_size.min(SHA1_LEN),
            content_key_len: info.key_data.algorithm.key_len(),
        }
    }

    /// Check a key whose password hash has already been computed, and unwrap the content key.
    ///
    /// All three blobs are decrypted with the key-encryptor salt as IV.
    pub fn unlock(&self, key: &EncryptionKey) -> Result<Option<ContentKey>> {
        let params = key.params();

        let input = key
            .calc_key(PurposeBlockKey::VERIFIER_HASH_INPUT, None)?
            .transform(params)?
            .decrypt_to_vec(&self.encrypted_verifier_hash_input)?;
        let input = input.get(..self.salt_size).ok_or_else(|| {
            DocCryptError::InvalidFormat("encryptedVerifierHashInput is truncated".to_string())
        })?;

        let value = key
            .calc_key(PurposeBlockKey::VERIFIER_HASH_VALUE, None)?
            .transform(params)?
            .decrypt_to_vec(&self.encrypted_verifier_hash_value)?;
        let value = value.get(..self.hash_size).ok_or_else(|| {
            DocCryptError::InvalidFormat("encryptedVerifierHashValue is truncated".to_string())
        })?;

        let digest = sha1(input);
        if !ct_eq(&digest[..self.hash_size], value) {
            return Ok(None);
        }

        let key_value = key
            .calc_key(PurposeBlockKey::KEY_VALUE, None)?
            .transform(params)?
            .decrypt_to_vec(&self.encrypted_key_value)?;
        let content_key = key_value.get(..self.content_key_len).ok_or_else(|| {
            DocCryptError::InvalidFormat("encryptedKeyValue is truncated".to_string())
        })?;
        Ok(Some(ContentKey::new(content_key)))
    }

    /// Wrap `content_key` and build fresh verifier blobs under `key`.
    pub fn generate<R: RngCore + CryptoRng>(
        key: &EncryptionKey,
        content_key: &ContentKey,
        rng: &mut R,
    ) -> Result<Self> {
        let params = key.params();
        let salt_size = key.salt().len();

        let mut input = Zeroizing::new(vec![0u8; salt_size]);
        rng.fill_bytes(&mut input);
        let hash = Zeroizing::new(sha1(&input));

        let mut encrypted_verifier_hash_input = input.to_vec();
        key.calc_key(PurposeBlockKey::VERIFIER_HASH_INPUT, None)?
            .transform(params)?
            .encrypt_padded(&mut encrypted_verifier_hash_input)?;

        let mut encrypted_verifier_hash_value = hash.to_vec();
        key.calc_key(PurposeBlockKey::VERIFIER_HASH_VALUE, None)?
            .transform(params)?
            .encrypt_padded(&mut encrypted_verifier_hash_value)?;

        let mut encrypted_key_value = content_key.as_bytes().to_vec();
        key.calc_key(PurposeBlockKey::KEY_VALUE, None)?
            .transform(params)?
            .encrypt_padded(&mut encrypted_key_value)?;

        Ok(Self {
            encrypted_verifier_hash_input,
            encrypted_verifier_hash_value,
            encrypted_key_value,
            salt_size,
            hash_size: SHA1_LEN,
            content_key_len: content_key.as_bytes().len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::{ChainingMode, CipherAlgorithm, EncryptionParameters};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn agile_key(salt: &[u8]) -> EncryptionKey {
        let params = EncryptionParameters::agile(CipherAlgorithm::Aes256, ChainingMode::Cbc);
        EncryptionKey::agile(params, salt, 10).unwrap()
    }

    #[test]
    fn agile_verifier_accepts_only_the_right_password() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut key = agile_key(&[3u8; 16]);
        key.pre_calc_key("correct horse").unwrap();
        let content_key = ContentKey::new(&[0x42; 16]);
        let verifier = Verifier::Agile(AgileVerifier::generate(&key, &content_key, &mut rng).unwrap());

        let mut probe = agile_key(&[3u8; 16]);
        let unwrapped = verifier.unlock("correct horse", &mut probe).unwrap().unwrap();
        assert_eq!(unwrapped.as_bytes(), &[0x42; 16]);
        assert!(!verifier.verify_pass("Correct horse", &mut probe).unwrap());
        assert!(!verifier.verify_pass("", &mut probe).unwrap());
    }

    #[test]
    fn agile_verifier_works_with_cfb() {
        let mut rng = StdRng::seed_from_u64(8);
        let params = EncryptionParameters::agile(CipherAlgorithm::Aes128, ChainingMode::Cfb);
        let mut key = EncryptionKey::agile(params, &[9u8; 16], 5).unwrap();
        key.pre_calc_key("pw").unwrap();
        let content_key = ContentKey::new(&[1u8; 16]);
        let verifier = Verifier::Agile(AgileVerifier::generate(&key, &content_key, &mut rng).unwrap());
        assert!(verifier.verify_pass("pw", &mut key).unwrap());
        assert!(!verifier.verify_pass("pW", &mut key).unwrap());
    }

    #[test]
    fn standard_verifier_round_trip() {
        let mut rng = StdRng::seed_from_u64(9);
        let params = EncryptionParameters::standard(CipherAlgorithm::Aes128);
        let mut key = EncryptionKey::standard(params, &[5u8; 16]).unwrap();
        key.pre_calc_key("Password").unwrap();
        let data = StandardVerifier::generate(&key, &mut rng).unwrap();
        let verifier = Verifier::Standard(StandardVerifier::from_info(&data));

        assert!(verifier.verify_pass("Password", &mut key).unwrap());
        assert!(!verifier.verify_pass("password", &mut key).unwrap());
    }

    #[test]
    fn truncated_blob_is_a_format_error() {
        let mut rng = StdRng::seed_from_u64(10);
        let mut key = agile_key(&[3u8; 16]);
        key.pre_calc_key("x").unwrap();
        let mut v = AgileVerifier::generate(&key, &ContentKey::new(&[0u8; 32]), &mut rng).unwrap();
        v.encrypted_verifier_hash_input.truncate(15);
        assert!(matches!(
            Verifier::Agile(v).verify_pass("x", &mut key),
            Err(DocCryptError::InvalidFormat(_))
        ));
    }

    #[test]
    fn overlong_password_is_an_error_not_a_mismatch() {
        let mut rng = StdRng::seed_from_u64(11);
        let mut key = agile_key(&[3u8; 16]);
        key.pre_calc_key("x").unwrap();
        let v = AgileVerifier::generate(&key, &ContentKey::new(&[0u8; 32]), &mut rng).unwrap();
        assert!(matches!(
            Verifier::Agile(v).verify_pass(&"a".repeat(300), &mut key),
            Err(DocCryptError::PasswordTooLong { .. })
        ));
    }

    #[test]
    fn oversized_hash_size_is_clamped_to_the_digest() {
        let bytes = crate::writer::encrypt_to_vec(
            b"payload",
            "pw",
            crate::writer::EncryptOptions {
                spin_count: 10,
                ..Default::default()
            },
        )
        .unwrap();
        let mut container =
            crate::container::EncryptedContainer::open(std::io::Cursor::new(bytes)).unwrap();
        let crate::info::EncryptionInfo::Agile(mut info) =
            crate::info::parse_encryption_info(&container.read_encryption_info().unwrap()).unwrap()
        else {
            panic!("expected Agile");
        };
        info.password.cipher.hash_size = 32;

        let verifier = Verifier::Agile(AgileVerifier::from_info(&info));
        let cipher = &info.password.cipher;
        let params = EncryptionParameters::agile(cipher.algorithm, cipher.chaining);
        let mut key = EncryptionKey::agile(params, &cipher.salt, info.password.spin_count).unwrap();
        assert!(verifier.verify_pass("pw", &mut key).unwrap());
        assert!(!verifier.verify_pass("nope", &mut key).unwrap());
    }
}
