//! Cipher parameters and the block-cipher engines built from them.
//!
//! Both schemes use AES. Standard encrypts content with ECB; Agile uses CBC or 8-bit CFB with a
//! fresh IV per segment. Engines own a copy of the key which is wiped on drop.

use std::fmt;

use aes::{Aes128, Aes192, Aes256};
use cipher::block_padding::NoPadding;
use cipher::generic_array::GenericArray;
use cipher::{
    AsyncStreamCipher, BlockCipher, BlockDecrypt, BlockDecryptMut, BlockEncrypt, BlockEncryptMut,
    KeyInit, KeyIvInit,
};
use zeroize::Zeroizing;

use crate::error::{DocCryptError, Result};
use crate::util::round_up_to_multiple;

pub const AES_BLOCK_SIZE: usize = 16;

/// CryptoAPI `ALG_ID` values for the AES family.
pub const CALG_AES_128: u32 = 0x0000_660E;
pub const CALG_AES_192: u32 = 0x0000_660F;
pub const CALG_AES_256: u32 = 0x0000_6610;
/// CryptoAPI `ALG_ID` for SHA-1.
pub const CALG_SHA1: u32 = 0x0000_8004;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherAlgorithm {
    Aes128,
    Aes192,
    Aes256,
}

impl CipherAlgorithm {
    pub fn from_alg_id(alg_id: u32) -> Result<Self> {
        match alg_id {
            CALG_AES_128 => Ok(Self::Aes128),
            CALG_AES_192 => Ok(Self::Aes192),
            CALG_AES_256 => Ok(Self::Aes256),
            other => Err(DocCryptError::UnsupportedEncryption(format!(
                "cipher AlgID 0x{other:08x}"
            ))),
        }
    }

    pub fn from_key_bits(key_bits: u32) -> Result<Self> {
        match key_bits {
            128 => Ok(Self::Aes128),
            192 => Ok(Self::Aes192),
            256 => Ok(Self::Aes256),
            other => Err(DocCryptError::UnsupportedEncryption(format!(
                "AES key size of {other} bits"
            ))),
        }
    }

    pub fn alg_id(self) -> u32 {
        match self {
            Self::Aes128 => CALG_AES_128,
            Self::Aes192 => CALG_AES_192,
            Self::Aes256 => CALG_AES_256,
        }
    }

    pub fn key_bits(self) -> u32 {
        match self {
            Self::Aes128 => 128,
            Self::Aes192 => 192,
            Self::Aes256 => 256,
        }
    }

    pub fn key_len(self) -> usize {
        self.key_bits() as usize / 8
    }

    pub fn block_size(self) -> usize {
        AES_BLOCK_SIZE
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainingMode {
    Ecb,
    Cbc,
    /// 8-bit feedback CFB.
    Cfb,
}

impl ChainingMode {
    /// Parse the `cipherChaining` attribute of an Agile descriptor.
    pub fn from_xml_name(name: &str) -> Result<Self> {
        match name {
            "ChainingModeCBC" => Ok(Self::Cbc),
            "ChainingModeCFB" => Ok(Self::Cfb),
            other => Err(DocCryptError::UnsupportedEncryption(format!(
                "cipher chaining `{other}`"
            ))),
        }
    }

    pub fn xml_name(self) -> &'static str {
        match self {
            Self::Ecb => "ChainingModeECB",
            Self::Cbc => "ChainingModeCBC",
            Self::Cfb => "ChainingModeCFB",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaddingMode {
    /// Input must already be block aligned.
    None,
    /// Input is extended with zero bytes up to the block size.
    Zeros,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncryptionParameters {
    pub algorithm: CipherAlgorithm,
    pub chaining: ChainingMode,
    pub padding: PaddingMode,
}

impl EncryptionParameters {
    pub fn new(algorithm: CipherAlgorithm, chaining: ChainingMode, padding: PaddingMode) -> Self {
        Self {
            algorithm,
            chaining,
            padding,
        }
    }

    /// AES-ECB content encryption used by the Standard scheme.
    pub fn standard(algorithm: CipherAlgorithm) -> Self {
        Self::new(algorithm, ChainingMode::Ecb, PaddingMode::Zeros)
    }

    pub fn agile(algorithm: CipherAlgorithm, chaining: ChainingMode) -> Self {
        Self::new(algorithm, chaining, PaddingMode::Zeros)
    }

    pub fn block_size(&self) -> usize {
        self.algorithm.block_size()
    }

    /// Bind a key to these parameters.
    pub fn engine(&self, key: &[u8]) -> Result<CipherEngine> {
        if key.len() != self.algorithm.key_len() {
            return Err(DocCryptError::InvalidFormat(format!(
                "key is {} bytes, {:?} needs {}",
                key.len(),
                self.algorithm,
                self.algorithm.key_len()
            )));
        }
        Ok(CipherEngine {
            params: *self,
            key: Zeroizing::new(key.to_vec()),
        })
    }
}

/// A keyed cipher. Produces [`Transform`]s, one per IV.
#[derive(Clone)]
pub struct CipherEngine {
    params: EncryptionParameters,
    key: Zeroizing<Vec<u8>>,
}

impl fmt::Debug for CipherEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CipherEngine")
            .field("params", &self.params)
            .field("key_len", &self.key.len())
            .finish()
    }
}

impl CipherEngine {
    pub fn params(&self) -> &EncryptionParameters {
        &self.params
    }

    /// Create a transform for `iv`. ECB ignores the IV; CBC and CFB require one block of it.
    pub fn transform(&self, iv: &[u8]) -> Result<Transform> {
        let iv = match self.params.chaining {
            ChainingMode::Ecb => None,
            ChainingMode::Cbc | ChainingMode::Cfb => {
                let block: [u8; AES_BLOCK_SIZE] = iv.try_into().map_err(|_| {
                    DocCryptError::InvalidFormat(format!(
                        "IV is {} bytes, expected {AES_BLOCK_SIZE}",
                        iv.len()
                    ))
                })?;
                Some(block)
            }
        };
        Ok(Transform {
            engine: self.clone(),
            iv,
        })
    }
}

#[derive(Clone, Copy)]
enum Direction {
    Encrypt,
    Decrypt,
}

/// A keyed cipher bound to one IV.
///
/// Each call to [`Transform::decrypt`] / [`Transform::encrypt`] starts chaining from the stored IV,
/// so a transform maps one buffer (one segment) at a time.
#[derive(Clone)]
pub struct Transform {
    engine: CipherEngine,
    iv: Option<[u8; AES_BLOCK_SIZE]>,
}

impl fmt::Debug for Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transform")
            .field("engine", &self.engine)
            .field("has_iv", &self.iv.is_some())
            .finish()
    }
}

impl Transform {
    pub fn decrypt(&self, buf: &mut [u8]) -> Result<()> {
        self.apply(Direction::Decrypt, buf)
    }

    pub fn encrypt(&self, buf: &mut [u8]) -> Result<()> {
        self.apply(Direction::Encrypt, buf)
    }

    /// Apply the padding mode to `buf`, then encrypt it in place.
    pub fn encrypt_padded(&self, buf: &mut Vec<u8>) -> Result<()> {
        if self.engine.params.padding == PaddingMode::Zeros {
            let len = round_up_to_multiple(buf.len(), AES_BLOCK_SIZE);
            buf.resize(len, 0);
        }
        self.encrypt(buf)
    }

    /// Decrypt a copy of `ciphertext`.
    pub fn decrypt_to_vec(&self, ciphertext: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        let mut out = Zeroizing::new(ciphertext.to_vec());
        self.decrypt(&mut out)?;
        Ok(out)
    }

    fn apply(&self, direction: Direction, buf: &mut [u8]) -> Result<()> {
        let chaining = self.engine.params.chaining;
        if chaining != ChainingMode::Cfb && buf.len() % AES_BLOCK_SIZE != 0 {
            return Err(DocCryptError::InvalidFormat(format!(
                "ciphertext length {} is not a multiple of the AES block size",
                buf.len()
            )));
        }
        let key = self.engine.key.as_slice();
        let iv = self.iv.as_ref().map(|iv| iv.as_slice());
        match self.engine.params.algorithm {
            CipherAlgorithm::Aes128 => apply_with::<Aes128>(chaining, key, iv, direction, buf),
            CipherAlgorithm::Aes192 => apply_with::<Aes192>(chaining, key, iv, direction, buf),
            CipherAlgorithm::Aes256 => apply_with::<Aes256>(chaining, key, iv, direction, buf),
        }
    }
}

fn apply_with<C>(
    chaining: ChainingMode,
    key: &[u8],
    iv: Option<&[u8]>,
    direction: Direction,
    buf: &mut [u8],
) -> Result<()>
where
    C: BlockCipher + BlockEncrypt + BlockDecrypt + KeyInit,
{
    let bad_key = |_| DocCryptError::InvalidFormat(format!("invalid AES key length {}", key.len()));

    match chaining {
        ChainingMode::Ecb => {
            let cipher = C::new_from_slice(key).map_err(bad_key)?;
            for block in buf.chunks_mut(AES_BLOCK_SIZE) {
                let block = GenericArray::from_mut_slice(block);
                match direction {
                    Direction::Encrypt => cipher.encrypt_block(block),
                    Direction::Decrypt => cipher.decrypt_block(block),
                }
            }
            Ok(())
        }
        ChainingMode::Cbc => {
            let iv = iv.ok_or_else(missing_iv)?;
            let len = buf.len();
            match direction {
                Direction::Encrypt => cbc::Encryptor::<C>::new_from_slices(key, iv)
                    .map_err(|_| invalid_key_iv())?
                    .encrypt_padded_mut::<NoPadding>(buf, len)
                    .map(|_| ())
                    .map_err(|_| DocCryptError::InvalidFormat("AES-CBC encrypt failed".into())),
                Direction::Decrypt => cbc::Decryptor::<C>::new_from_slices(key, iv)
                    .map_err(|_| invalid_key_iv())?
                    .decrypt_padded_mut::<NoPadding>(buf)
                    .map(|_| ())
                    .map_err(|_| DocCryptError::InvalidFormat("AES-CBC decrypt failed".into())),
            }
        }
        ChainingMode::Cfb => {
            let iv = iv.ok_or_else(missing_iv)?;
            match direction {
                Direction::Encrypt => cfb8::Encryptor::<C>::new_from_slices(key, iv)
                    .map_err(|_| invalid_key_iv())?
                    .encrypt(buf),
                Direction::Decrypt => cfb8::Decryptor::<C>::new_from_slices(key, iv)
                    .map_err(|_| invalid_key_iv())?
                    .decrypt(buf),
            }
            Ok(())
        }
    }
}

fn missing_iv() -> DocCryptError {
    DocCryptError::InvalidFormat("chained cipher mode requires an IV".into())
}

fn invalid_key_iv() -> DocCryptError {
    DocCryptError::InvalidFormat("invalid AES key or IV length".into())
}
