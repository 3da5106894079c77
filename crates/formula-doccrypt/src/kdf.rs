//! Password-based key derivation for the Standard and Agile schemes.
//!
//! Both schemes share the same skeleton:
//!
//! 1. `H0 = SHA1(salt || UTF16LE(password))`
//! 2. For `i in 0..spinCount`: `H = SHA1(LE32(i) || H)`
//! 3. Per purpose: `Hfinal = SHA1(H || blockKey)`, then stretch or fit `Hfinal` to the key size.
//!
//! Step 1-2 is the expensive part and is computed once by [`EncryptionKey::pre_calc_key`]. Every
//! later derivation returns a fresh [`DerivedKey`], so keys and IVs for different purposes never
//! share state.

use std::fmt;

use zeroize::Zeroizing;

use crate::error::{DocCryptError, Result};
use crate::params::{ChainingMode, EncryptionParameters, Transform};
use crate::util::{fit_to_len, password_to_utf16le, sha1, sha1_concat, SHA1_LEN};

/// Spin count fixed by the Standard scheme.
pub const STANDARD_SPIN_COUNT: u32 = 50_000;
/// Spin count the writer uses unless configured otherwise.
pub const AGILE_SPIN_COUNT: u32 = 100_000;
/// Longest accepted password, in UTF-16 code units.
pub const MAX_PASSWORD_LEN: usize = 255;

const AGILE_KEY_PAD: u8 = 0x36;

/// Block key that binds a derived key to one purpose.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PurposeBlockKey(&'static [u8]);

impl PurposeBlockKey {
    pub const VERIFIER_HASH_INPUT: Self = Self(&[0xFE, 0xA7, 0xD2, 0x76, 0x3B, 0x4B, 0x9E, 0x79]);
    pub const VERIFIER_HASH_VALUE: Self = Self(&[0xD7, 0xAA, 0x0F, 0x6D, 0x30, 0x61, 0x34, 0x4E]);
    pub const KEY_VALUE: Self = Self(&[0x14, 0x6E, 0x0B, 0xE7, 0xAB, 0xAC, 0xD0, 0xD6]);
    pub const HMAC_KEY: Self = Self(&[0x5F, 0xB2, 0xAD, 0x01, 0x0C, 0xB9, 0xE1, 0xF6]);
    pub const HMAC_VALUE: Self = Self(&[0xA0, 0x67, 0x7F, 0x02, 0xB2, 0x2C, 0x84, 0x33]);
    /// `LE32(0)`: content encryption, and the Standard verifier key.
    pub const DATA_ENCRYPTION: Self = Self(&[0x00, 0x00, 0x00, 0x00]);

    pub fn as_bytes(&self) -> &'static [u8] {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyScheme {
    /// CryptoAPI-style key stretching, fixed zero IV.
    Standard,
    /// Truncate/pad key fitting with salted, per-purpose IVs.
    Agile,
}

/// A key and IV derived for a single purpose.
pub struct DerivedKey {
    key: Zeroizing<Vec<u8>>,
    iv: Vec<u8>,
}

impl fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DerivedKey")
            .field("key_len", &self.key.len())
            .field("iv_len", &self.iv.len())
            .finish()
    }
}

impl DerivedKey {
    pub fn key(&self) -> &[u8] {
        &self.key
    }

    pub fn iv(&self) -> &[u8] {
        &self.iv
    }

    /// Build a cipher transform for this key/IV pair.
    pub fn transform(&self, params: &EncryptionParameters) -> Result<Transform> {
        params.engine(&self.key)?.transform(&self.iv)
    }
}

/// Password-derived key state for one descriptor.
pub struct EncryptionKey {
    scheme: KeyScheme,
    params: EncryptionParameters,
    spin_count: u32,
    salt: Vec<u8>,
    password_hash: Option<Zeroizing<Vec<u8>>>,
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptionKey")
            .field("scheme", &self.scheme)
            .field("params", &self.params)
            .field("spin_count", &self.spin_count)
            .field("salt_len", &self.salt.len())
            .field("precomputed", &self.password_hash.is_some())
            .finish()
    }
}

impl EncryptionKey {
    pub fn standard(params: EncryptionParameters, salt: &[u8]) -> Result<Self> {
        if params.chaining != ChainingMode::Ecb {
            return Err(DocCryptError::UnsupportedEncryption(format!(
                "Standard encryption with {:?} chaining",
                params.chaining
            )));
        }
        Ok(Self {
            scheme: KeyScheme::Standard,
            params,
            spin_count: STANDARD_SPIN_COUNT,
            salt: salt.to_vec(),
            password_hash: None,
        })
    }

    pub fn agile(params: EncryptionParameters, salt: &[u8], spin_count: u32) -> Result<Self> {
        if params.chaining == ChainingMode::Ecb {
            return Err(DocCryptError::UnsupportedEncryption(
                "Agile encryption with ECB chaining".to_string(),
            ));
        }
        if salt.is_empty() {
            return Err(DocCryptError::InvalidFormat("empty Agile salt".to_string()));
        }
        Ok(Self {
            scheme: KeyScheme::Agile,
            params,
            spin_count,
            salt: salt.to_vec(),
            password_hash: None,
        })
    }

    pub fn scheme(&self) -> KeyScheme {
        self.scheme
    }

    pub fn params(&self) -> &EncryptionParameters {
        &self.params
    }

    pub fn spin_count(&self) -> u32 {
        self.spin_count
    }

    pub fn salt(&self) -> &[u8] {
        &self.salt
    }

    pub fn key_len(&self) -> usize {
        self.params.algorithm.key_len()
    }

    pub fn block_size(&self) -> usize {
        self.params.block_size()
    }

    /// Whether each content segment gets its own IV.
    pub fn has_variable_iv(&self) -> bool {
        self.scheme == KeyScheme::Agile
    }

    /// Compute and cache the password-dependent iterated hash.
    pub fn pre_calc_key(&mut self, password: &str) -> Result<()> {
        let units = password.encode_utf16().count();
        if units > MAX_PASSWORD_LEN {
            return Err(DocCryptError::PasswordTooLong {
                len: units,
                max: MAX_PASSWORD_LEN,
            });
        }
        let password = password_to_utf16le(password);
        self.password_hash = Some(iterated_hash(&password, &self.salt, self.spin_count));
        Ok(())
    }

    /// Derive the key for `purpose` and the IV for `iv_block_key`.
    pub fn calc_key(
        &self,
        purpose: PurposeBlockKey,
        iv_block_key: Option<&[u8]>,
    ) -> Result<DerivedKey> {
        let h = self.password_hash.as_ref().ok_or_else(|| {
            DocCryptError::InvalidFormat("key derivation used before pre_calc_key".to_string())
        })?;
        let h_final = Zeroizing::new(sha1_concat(&[h.as_slice(), purpose.as_bytes()]));
        let key = match self.scheme {
            KeyScheme::Standard => standard_stretch_key(&h_final[..], self.key_len()),
            KeyScheme::Agile => {
                Zeroizing::new(fit_to_len(&h_final[..], self.key_len(), AGILE_KEY_PAD))
            }
        };
        Ok(DerivedKey {
            key,
            iv: self.derive_iv(iv_block_key),
        })
    }

    /// Derive an IV. Standard always uses a zero IV.
    pub fn derive_iv(&self, block_key: Option<&[u8]>) -> Vec<u8> {
        match self.scheme {
            KeyScheme::Standard => vec![0u8; self.block_size()],
            KeyScheme::Agile => match block_key {
                Some(block_key) => {
                    let digest = sha1_concat(&[self.salt.as_slice(), block_key]);
                    fit_to_len(&digest, self.block_size(), AGILE_KEY_PAD)
                }
                None => fit_to_len(&self.salt, self.block_size(), AGILE_KEY_PAD),
            },
        }
    }

    /// IV for content segment `segment`.
    pub fn calc_data_iv(&self, segment: u32) -> Vec<u8> {
        self.derive_iv(Some(&segment.to_le_bytes()))
    }
}

/// `H0 = SHA1(salt || password)`, then `spin_count` rounds of `H = SHA1(LE32(i) || H)`.
pub(crate) fn iterated_hash(
    password_utf16le: &[u8],
    salt: &[u8],
    spin_count: u32,
) -> Zeroizing<Vec<u8>> {
    let mut h = Zeroizing::new(sha1_concat(&[salt, password_utf16le]));

    // Reuse one buffer across rounds.
    let mut round = Zeroizing::new([0u8; 4 + SHA1_LEN]);
    for i in 0..spin_count {
        round[..4].copy_from_slice(&i.to_le_bytes());
        round[4..].copy_from_slice(&h[..]);
        *h = sha1(&round[..]);
    }

    Zeroizing::new(h.to_vec())
}

/// CryptoAPI `CryptDeriveKey` stretching for SHA-1.
fn standard_stretch_key(h_final: &[u8], key_len: usize) -> Zeroizing<Vec<u8>> {
    let mut buf1 = Zeroizing::new([0x36u8; 64]);
    let mut buf2 = Zeroizing::new([0x5Cu8; 64]);
    for (i, b) in h_final.iter().enumerate() {
        buf1[i] ^= b;
        buf2[i] ^= b;
    }
    let x1 = Zeroizing::new(sha1(&buf1[..]));
    let x2 = Zeroizing::new(sha1(&buf2[..]));

    let mut out = Zeroizing::new(Vec::with_capacity(SHA1_LEN * 2));
    out.extend_from_slice(&x1[..]);
    out.extend_from_slice(&x2[..]);
    out.truncate(key_len);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::CipherAlgorithm;

    fn hex(s: &str) -> Vec<u8> {
        (0..s.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&s[i..i + 2], 16).unwrap())
            .collect()
    }

    fn salt() -> Vec<u8> {
        (0u8..16).collect()
    }

    fn agile_key(alg: CipherAlgorithm) -> EncryptionKey {
        let params = EncryptionParameters::agile(alg, ChainingMode::Cbc);
        let mut key = EncryptionKey::agile(params, &salt(), AGILE_SPIN_COUNT).unwrap();
        key.pre_calc_key("Secret1").unwrap();
        key
    }

    #[test]
    fn standard_key_matches_cryptoapi_stretching() {
        let params = EncryptionParameters::standard(CipherAlgorithm::Aes128);
        let mut key = EncryptionKey::standard(params, &salt()).unwrap();
        key.pre_calc_key("Password").unwrap();
        let derived = key
            .calc_key(PurposeBlockKey::DATA_ENCRYPTION, None)
            .unwrap();
        assert_eq!(derived.key(), hex("1ba005261aaee4686a9939437075e6c4"));
        assert_eq!(derived.iv(), &[0u8; 16]);
        assert!(!key.has_variable_iv());
        assert_eq!(key.calc_data_iv(7), vec![0u8; 16]);
    }

    #[test]
    fn agile_keys_are_deterministic_and_purpose_bound() {
        let key = agile_key(CipherAlgorithm::Aes128);
        let data = key
            .calc_key(PurposeBlockKey::DATA_ENCRYPTION, Some(&0u32.to_le_bytes()))
            .unwrap();
        assert_eq!(data.key(), hex("01863fc83586576a29a79e17b2db9035"));
        assert_eq!(data.iv(), hex("719ea750a65a93d80e1e0ba33a2ba0e7"));

        let verifier = key
            .calc_key(
                PurposeBlockKey::VERIFIER_HASH_INPUT,
                Some(PurposeBlockKey::VERIFIER_HASH_INPUT.as_bytes()),
            )
            .unwrap();
        assert_eq!(verifier.key(), hex("e027bf42f434f9f6579c136e91ba16ae"));
        assert_eq!(verifier.iv(), hex("c2a8e779e1ed88b4dfb20fbe086eaf7f"));

        // Deriving again yields the same values.
        let again = key
            .calc_key(PurposeBlockKey::DATA_ENCRYPTION, Some(&0u32.to_le_bytes()))
            .unwrap();
        assert_eq!(again.key(), data.key());
        assert_eq!(again.iv(), data.iv());
    }

    #[test]
    fn agile_key_is_padded_with_0x36() {
        let key = agile_key(CipherAlgorithm::Aes256);
        let data = key
            .calc_key(PurposeBlockKey::DATA_ENCRYPTION, None)
            .unwrap();
        assert_eq!(
            data.key(),
            hex("01863fc83586576a29a79e17b2db9035067bc921363636363636363636363636")
        );
        assert_eq!(data.iv(), salt());
    }

    #[test]
    fn data_iv_is_per_segment() {
        let key = agile_key(CipherAlgorithm::Aes128);
        assert!(key.has_variable_iv());
        assert_eq!(key.calc_data_iv(0), hex("719ea750a65a93d80e1e0ba33a2ba0e7"));
        assert_ne!(key.calc_data_iv(0), key.calc_data_iv(1));
    }

    #[test]
    fn calc_key_requires_precomputed_hash() {
        let params = EncryptionParameters::standard(CipherAlgorithm::Aes128);
        let key = EncryptionKey::standard(params, &salt()).unwrap();
        assert!(matches!(
            key.calc_key(PurposeBlockKey::DATA_ENCRYPTION, None),
            Err(DocCryptError::InvalidFormat(_))
        ));
    }

    #[test]
    fn rejects_overlong_password() {
        let params = EncryptionParameters::standard(CipherAlgorithm::Aes128);
        let mut key = EncryptionKey::standard(params, &salt()).unwrap();
        let long = "x".repeat(MAX_PASSWORD_LEN + 1);
        assert!(matches!(
            key.pre_calc_key(&long),
            Err(DocCryptError::PasswordTooLong { len: 256, max: 255 })
        ));
        key.pre_calc_key(&"x".repeat(MAX_PASSWORD_LEN)).unwrap();
    }

    #[test]
    fn rejects_mismatched_chaining() {
        let ecb = EncryptionParameters::standard(CipherAlgorithm::Aes128);
        assert!(matches!(
            EncryptionKey::agile(ecb, &salt(), 1),
            Err(DocCryptError::UnsupportedEncryption(_))
        ));
        let cbc = EncryptionParameters::agile(CipherAlgorithm::Aes128, ChainingMode::Cbc);
        assert!(matches!(
            EncryptionKey::standard(cbc, &salt()),
            Err(DocCryptError::UnsupportedEncryption(_))
        ));
    }
}
