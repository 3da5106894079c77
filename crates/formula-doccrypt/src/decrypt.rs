use std::io::{Cursor, Read, Seek};

use zeroize::Zeroizing;

use crate::container::{EncryptedContainer, PackageStream};
use crate::error::{DocCryptError, Result};
use crate::info::{parse_encryption_info, AgileInfo, EncryptionInfo, StandardInfo};
use crate::kdf::{EncryptionKey, KeyScheme};
use crate::reader::{DecryptingStream, SegmentKeying};
use crate::verifier::{AgileVerifier, ContentKey, StandardVerifier, Verifier};

/// Default upper bound for a descriptor's `spinCount`.
pub const DEFAULT_MAX_SPIN_COUNT: u32 = 10_000_000;

#[derive(Debug, Clone)]
pub struct DecryptOptions {
    /// Descriptors asking for more hash rounds than this are rejected before any hashing.
    pub max_spin_count: u32,
    /// Try the empty password before asking the callback. Files "encrypted" without a password
    /// open without prompting.
    pub try_empty_password: bool,
}

impl Default for DecryptOptions {
    fn default() -> Self {
        Self {
            max_spin_count: DEFAULT_MAX_SPIN_COUNT,
            try_empty_password: true,
        }
    }
}

/// Passed to a [`PasswordCallback`] when a password is needed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasswordRequest {
    pub scheme: KeyScheme,
}

/// Supplies the password for a protected document. `None` gives up.
pub trait PasswordCallback {
    fn password(&mut self, request: &PasswordRequest) -> Option<String>;
}

impl<F> PasswordCallback for F
where
    F: FnMut(&PasswordRequest) -> Option<String>,
{
    fn password(&mut self, request: &PasswordRequest) -> Option<String> {
        self(request)
    }
}

/// Open an encrypted container and return a decrypting view of its package.
///
/// The empty password is tried first (unless disabled in `options`); the callback is then asked
/// once. A missing or wrong password yields [`DocCryptError::InvalidPassword`].
pub fn decrypt<F, C>(
    container: F,
    callback: &mut C,
    options: &DecryptOptions,
) -> Result<DecryptingStream<PackageStream<F>>>
where
    F: Read + Seek,
    C: PasswordCallback + ?Sized,
{
    let mut container = EncryptedContainer::open(container)?;
    let info_bytes = container.read_encryption_info()?;

    match parse_encryption_info(&info_bytes)? {
        EncryptionInfo::Standard(info) => open_standard(container, &info, callback, options),
        EncryptionInfo::Agile(info) => open_agile(container, info, callback, options),
    }
}

/// [`decrypt`] with a fixed password.
pub fn decrypt_with_password<F: Read + Seek>(
    container: F,
    password: &str,
) -> Result<DecryptingStream<PackageStream<F>>> {
    let mut callback = |_: &PasswordRequest| Some(password.to_string());
    decrypt(container, &mut callback, &DecryptOptions::default())
}

/// Decrypt a whole container held in memory.
pub fn decrypt_to_vec(bytes: &[u8], password: &str) -> Result<Vec<u8>> {
    let mut stream = decrypt_with_password(Cursor::new(bytes), password)?;
    let mut out = Vec::with_capacity(usize::try_from(stream.len()).unwrap_or(0));
    stream.read_to_end(&mut out)?;
    Ok(out)
}

fn open_standard<F, C>(
    container: EncryptedContainer<F>,
    info: &StandardInfo,
    callback: &mut C,
    options: &DecryptOptions,
) -> Result<DecryptingStream<PackageStream<F>>>
where
    F: Read + Seek,
    C: PasswordCallback + ?Sized,
{
    let params = info.params();
    let mut key = EncryptionKey::standard(params, &info.verifier.salt)?;
    let verifier = Verifier::Standard(StandardVerifier::from_info(&info.verifier));
    let content_key = unlock(&verifier, &mut key, callback, options)?;

    // Standard content is ECB: a single transform serves every segment.
    let transform = params
        .engine(content_key.as_bytes())?
        .transform(&key.derive_iv(None))?;
    DecryptingStream::new(
        container.into_package_stream()?,
        SegmentKeying::Fixed(transform),
        None,
    )
}

fn open_agile<F, C>(
    container: EncryptedContainer<F>,
    info: AgileInfo,
    callback: &mut C,
    options: &DecryptOptions,
) -> Result<DecryptingStream<PackageStream<F>>>
where
    F: Read + Seek,
    C: PasswordCallback + ?Sized,
{
    let spin_count = info.password.spin_count;
    if spin_count > options.max_spin_count {
        return Err(DocCryptError::UnsupportedEncryption(format!(
            "spinCount {spin_count} exceeds the limit of {}",
            options.max_spin_count
        )));
    }

    let mut key = EncryptionKey::agile(
        info.password.cipher.params(),
        &info.password.cipher.salt,
        spin_count,
    )?;
    let verifier = Verifier::Agile(AgileVerifier::from_info(&info));
    let content_key = unlock(&verifier, &mut key, callback, options)?;

    let data_params = info.key_data.params();
    // `spin_count` is irrelevant here: this key only derives segment IVs from the keyData salt.
    let data_key = EncryptionKey::agile(data_params, &info.key_data.salt, 0)?;
    let engine = data_params.engine(content_key.as_bytes())?;
    DecryptingStream::new(
        container.into_package_stream()?,
        SegmentKeying::PerSegment { engine, data_key },
        info.data_integrity,
    )
}

fn unlock<C>(
    verifier: &Verifier,
    key: &mut EncryptionKey,
    callback: &mut C,
    options: &DecryptOptions,
) -> Result<ContentKey>
where
    C: PasswordCallback + ?Sized,
{
    if options.try_empty_password {
        if let Some(content_key) = verifier.unlock("", key)? {
            log::debug!("document opened with the empty password");
            return Ok(content_key);
        }
    }

    let request = PasswordRequest {
        scheme: key.scheme(),
    };
    let Some(password) = callback.password(&request).map(Zeroizing::new) else {
        return Err(DocCryptError::InvalidPassword);
    };
    match verifier.unlock(&password, key)? {
        Some(content_key) => Ok(content_key),
        None => {
            log::warn!("password rejected by {:?} verifier", key.scheme());
            Err(DocCryptError::InvalidPassword)
        }
    }
}
