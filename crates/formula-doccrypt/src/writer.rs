//! Encrypting writer.
//!
//! Plaintext is buffered in memory. [`EncryptingWriter::finish`] encrypts it, builds the whole
//! compound file, and only then writes it to the output, so a failure never leaves a half-written
//! container behind.

use std::io::{self, Seek, SeekFrom, Write};

use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::{CryptoRng, RngCore};
use sha1::Sha1;
use zeroize::Zeroizing;

use crate::container::build_container;
use crate::error::{DocCryptError, Result};
use crate::info::{
    AgileCipherInfo, AgileInfo, DataIntegrity, EncryptionInfo, PasswordKeyEncryptor, StandardInfo,
};
use crate::kdf::{EncryptionKey, PurposeBlockKey, AGILE_SPIN_COUNT};
use crate::params::{ChainingMode, CipherAlgorithm, EncryptionParameters, AES_BLOCK_SIZE};
use crate::reader::{LENGTH_PREFIX_SIZE, SEGMENT_SIZE};
use crate::util::{round_up_to_multiple, SHA1_LEN};
use crate::verifier::{AgileVerifier, ContentKey, StandardVerifier};

const SALT_LEN: usize = 16;
/// The descriptor stream is padded with zeros to a multiple of this.
const ENCRYPTION_INFO_ALIGN: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EncryptionScheme {
    #[default]
    Agile,
    Standard,
}

#[derive(Debug, Clone)]
pub struct EncryptOptions {
    pub scheme: EncryptionScheme,
    pub algorithm: CipherAlgorithm,
    /// Agile only; Standard always uses ECB.
    pub chaining: ChainingMode,
    /// Agile only; Standard always uses 50000 rounds.
    pub spin_count: u32,
    /// Compound file whose other streams and storages are copied into the output.
    pub template: Option<Vec<u8>>,
}

impl Default for EncryptOptions {
    fn default() -> Self {
        Self {
            scheme: EncryptionScheme::Agile,
            algorithm: CipherAlgorithm::Aes256,
            chaining: ChainingMode::Cbc,
            spin_count: AGILE_SPIN_COUNT,
            template: None,
        }
    }
}

/// `Write + Seek` sink that produces an encrypted container on [`EncryptingWriter::finish`].
///
/// Positions are relative to the start of the plaintext.
pub struct EncryptingWriter<W> {
    output: W,
    password: Zeroizing<String>,
    options: EncryptOptions,
    // Plaintext, preceded by room for the length prefix.
    buf: Zeroizing<Vec<u8>>,
    pos: u64,
}

impl<W: Write> EncryptingWriter<W> {
    pub fn new(output: W, password: &str, options: EncryptOptions) -> Self {
        Self {
            output,
            password: Zeroizing::new(password.to_string()),
            options,
            buf: Zeroizing::new(vec![0u8; LENGTH_PREFIX_SIZE as usize]),
            pos: 0,
        }
    }

    pub fn len(&self) -> u64 {
        (self.buf.len() - LENGTH_PREFIX_SIZE as usize) as u64
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn position(&self) -> u64 {
        self.pos
    }

    /// Encrypt with the operating system RNG and write the container to the output.
    pub fn finish(self) -> Result<W> {
        self.finish_with_rng(&mut OsRng)
    }

    /// Encrypt with `rng` supplying keys, salts and verifier input.
    pub fn finish_with_rng<R: RngCore + CryptoRng>(self, rng: &mut R) -> Result<W> {
        let Self {
            mut output,
            password,
            options,
            mut buf,
            ..
        } = self;

        let plaintext_len = (buf.len() - LENGTH_PREFIX_SIZE as usize) as u64;
        log::debug!(
            "encrypting {plaintext_len} bytes ({:?}, {:?})",
            options.scheme,
            options.algorithm
        );

        let mut info = match options.scheme {
            EncryptionScheme::Agile => encrypt_agile(&mut buf, &password, &options, rng)?,
            EncryptionScheme::Standard => {
                encrypt_standard(&mut buf, &password, options.algorithm, rng)?
            }
        };
        buf[..LENGTH_PREFIX_SIZE as usize].copy_from_slice(&plaintext_len.to_le_bytes());

        let padded = round_up_to_multiple(info.len(), ENCRYPTION_INFO_ALIGN);
        info.resize(padded, 0);

        let container = build_container(options.template.as_deref(), &info, &buf)?;
        output.write_all(&container)?;
        output.flush()?;
        Ok(output)
    }
}

impl<W> Write for EncryptingWriter<W> {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let start = usize::try_from(self.pos)
            .ok()
            .and_then(|pos| pos.checked_add(LENGTH_PREFIX_SIZE as usize))
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "position overflows"))?;
        let end = start
            .checked_add(data.len())
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "position overflows"))?;
        let cur_len = self.buf.len();
        if end > cur_len {
            self.buf.try_reserve(end - cur_len).map_err(|_| {
                io::Error::new(io::ErrorKind::OutOfMemory, "plaintext buffer is too large")
            })?;
            self.buf.resize(end, 0);
        }
        self.buf[start..end].copy_from_slice(data);
        self.pos += data.len() as u64;
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<W> Seek for EncryptingWriter<W> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let len = (self.buf.len() - LENGTH_PREFIX_SIZE as usize) as i128;
        let new_pos: i128 = match pos {
            SeekFrom::Start(n) => n as i128,
            SeekFrom::End(off) => len + off as i128,
            SeekFrom::Current(off) => self.pos as i128 + off as i128,
        };
        if new_pos < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "invalid seek to a negative position",
            ));
        }
        self.pos = u64::try_from(new_pos).map_err(|_| {
            io::Error::new(io::ErrorKind::InvalidInput, "seek position out of range")
        })?;
        Ok(self.pos)
    }
}

/// Encrypt `plaintext` into a new container.
pub fn encrypt_to_vec(plaintext: &[u8], password: &str, options: EncryptOptions) -> Result<Vec<u8>> {
    let mut writer = EncryptingWriter::new(Vec::new(), password, options);
    writer.write_all(plaintext)?;
    writer.finish()
}

fn random_bytes<R: RngCore + CryptoRng>(rng: &mut R, len: usize) -> Zeroizing<Vec<u8>> {
    let mut out = Zeroizing::new(vec![0u8; len]);
    rng.fill_bytes(&mut out);
    out
}

/// Zero-pad the plaintext after the length prefix to whole cipher blocks.
fn pad_plaintext(buf: &mut Vec<u8>) {
    let prefix = LENGTH_PREFIX_SIZE as usize;
    let padded = round_up_to_multiple(buf.len() - prefix, AES_BLOCK_SIZE);
    buf.resize(prefix + padded, 0);
}

fn encrypt_agile<R: RngCore + CryptoRng>(
    buf: &mut Vec<u8>,
    password: &str,
    options: &EncryptOptions,
    rng: &mut R,
) -> Result<Vec<u8>> {
    let params = EncryptionParameters::agile(options.algorithm, options.chaining);

    // Derive the password key first: it rejects bad passwords before any other work.
    let kek_salt = random_bytes(rng, SALT_LEN);
    let mut kek = EncryptionKey::agile(params, &kek_salt, options.spin_count)?;
    kek.pre_calc_key(password)?;

    let content_key = ContentKey::new(&random_bytes(rng, options.algorithm.key_len()));
    let key_data_salt = random_bytes(rng, SALT_LEN);
    let data_key = EncryptionKey::agile(params, &key_data_salt, 0)?;
    let engine = params.engine(content_key.as_bytes())?;

    let hmac_key = random_bytes(rng, SHA1_LEN);
    let mut mac = <Hmac<Sha1> as Mac>::new_from_slice(&hmac_key)
        .map_err(|_| DocCryptError::InvalidFormat("invalid HMAC key".to_string()))?;
    mac.update(&buf[LENGTH_PREFIX_SIZE as usize..]);
    let hmac_value = Zeroizing::new(mac.finalize().into_bytes().to_vec());

    pad_plaintext(buf);
    let mut segments = 0u32;
    for (index, segment) in buf[LENGTH_PREFIX_SIZE as usize..]
        .chunks_mut(SEGMENT_SIZE)
        .enumerate()
    {
        let index = u32::try_from(index).map_err(|_| {
            DocCryptError::InvalidFormat("package has too many segments".to_string())
        })?;
        engine
            .transform(&data_key.calc_data_iv(index))?
            .encrypt(segment)?;
        segments += 1;
    }
    log::trace!("encrypted {segments} segment(s)");

    let mut encrypted_hmac_key = hmac_key.to_vec();
    engine
        .transform(&data_key.derive_iv(Some(PurposeBlockKey::HMAC_KEY.as_bytes())))?
        .encrypt_padded(&mut encrypted_hmac_key)?;
    let mut encrypted_hmac_value = hmac_value.to_vec();
    engine
        .transform(&data_key.derive_iv(Some(PurposeBlockKey::HMAC_VALUE.as_bytes())))?
        .encrypt_padded(&mut encrypted_hmac_value)?;

    let verifier = AgileVerifier::generate(&kek, &content_key, rng)?;

    let cipher_info = |salt: &[u8]| AgileCipherInfo {
        salt: salt.to_vec(),
        block_size: AES_BLOCK_SIZE,
        hash_size: SHA1_LEN,
        algorithm: options.algorithm,
        chaining: options.chaining,
    };
    let info = AgileInfo {
        key_data: cipher_info(key_data_salt.as_slice()),
        data_integrity: Some(DataIntegrity {
            encrypted_hmac_key,
            encrypted_hmac_value,
        }),
        password: PasswordKeyEncryptor {
            spin_count: options.spin_count,
            cipher: cipher_info(kek_salt.as_slice()),
            encrypted_verifier_hash_input: verifier.encrypted_verifier_hash_input,
            encrypted_verifier_hash_value: verifier.encrypted_verifier_hash_value,
            encrypted_key_value: verifier.encrypted_key_value,
        },
    };
    Ok(EncryptionInfo::Agile(info).to_bytes())
}

fn encrypt_standard<R: RngCore + CryptoRng>(
    buf: &mut Vec<u8>,
    password: &str,
    algorithm: CipherAlgorithm,
    rng: &mut R,
) -> Result<Vec<u8>> {
    let params = EncryptionParameters::standard(algorithm);
    let salt = random_bytes(rng, SALT_LEN);
    let mut key = EncryptionKey::standard(params, &salt)?;
    key.pre_calc_key(password)?;

    let verifier = StandardVerifier::generate(&key, rng)?;
    let transform = key
        .calc_key(PurposeBlockKey::DATA_ENCRYPTION, None)?
        .transform(&params)?;

    pad_plaintext(buf);
    for segment in buf[LENGTH_PREFIX_SIZE as usize..].chunks_mut(SEGMENT_SIZE) {
        transform.encrypt(segment)?;
    }

    Ok(EncryptionInfo::Standard(StandardInfo::new(algorithm, verifier)).to_bytes())
}
