use std::fmt;
use std::io::{self, Read, Seek, SeekFrom, Write};

use hmac::{Hmac, Mac};
use sha1::Sha1;
use zeroize::Zeroizing;

use crate::error::{DocCryptError, Result};
use crate::info::DataIntegrity;
use crate::kdf::{EncryptionKey, KeyScheme, PurposeBlockKey};
use crate::params::{CipherEngine, Transform};
use crate::util::{round_up_to_multiple, zeroize_vec_full, SHA1_LEN};

/// Plaintext bytes per content segment.
pub const SEGMENT_SIZE: usize = 0x1000;
/// Size of the little-endian plaintext length that prefixes `EncryptedPackage`.
pub const LENGTH_PREFIX_SIZE: u64 = 8;

/// How content segments are keyed.
pub(crate) enum SegmentKeying {
    /// One IV for all segments (Standard, ECB).
    Fixed(Transform),
    /// Per-segment IV from `calc_data_iv` (Agile).
    PerSegment {
        engine: CipherEngine,
        data_key: EncryptionKey,
    },
}

impl fmt::Debug for SegmentKeying {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SegmentKeying::Fixed(transform) => f.debug_tuple("Fixed").field(transform).finish(),
            SegmentKeying::PerSegment { engine, data_key } => f
                .debug_struct("PerSegment")
                .field("engine", engine)
                .field("data_key", data_key)
                .finish(),
        }
    }
}

impl SegmentKeying {
    fn scheme(&self) -> KeyScheme {
        match self {
            SegmentKeying::Fixed(_) => KeyScheme::Standard,
            SegmentKeying::PerSegment { .. } => KeyScheme::Agile,
        }
    }

    fn block_size(&self) -> usize {
        match self {
            SegmentKeying::Fixed(_) => crate::params::AES_BLOCK_SIZE,
            SegmentKeying::PerSegment { data_key, .. } => data_key.block_size(),
        }
    }
}

/// A `Read + Seek` view of the decrypted package.
///
/// Segments are decrypted on demand and one segment is cached, so sequential reads decrypt each
/// segment once and random seeks cost at most one segment.
///
/// Decryption does not check the package HMAC; call [`DecryptingStream::verify_integrity`] for
/// that.
pub struct DecryptingStream<R> {
    inner: R,
    keying: SegmentKeying,
    data_integrity: Option<DataIntegrity>,
    plaintext_len: u64,
    pos: u64,

    // Ciphertext scratch buffer (reused between segments).
    scratch: Vec<u8>,

    cached_segment: Option<u64>,
    cached_plain: Vec<u8>,
}

impl<R> fmt::Debug for DecryptingStream<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecryptingStream")
            .field("keying", &self.keying)
            .field("plaintext_len", &self.plaintext_len)
            .field("pos", &self.pos)
            .field("cached_segment", &self.cached_segment)
            .finish()
    }
}

impl<R> Drop for DecryptingStream<R> {
    fn drop(&mut self) {
        zeroize_vec_full(&mut self.cached_plain);
        zeroize_vec_full(&mut self.scratch);
    }
}

impl<R: Read + Seek> DecryptingStream<R> {
    /// Wrap an `EncryptedPackage` stream. Reads the length prefix and checks that enough
    /// ciphertext follows it.
    pub(crate) fn new(
        mut inner: R,
        keying: SegmentKeying,
        data_integrity: Option<DataIntegrity>,
    ) -> Result<Self> {
        inner.seek(SeekFrom::Start(0))?;
        let mut prefix = [0u8; LENGTH_PREFIX_SIZE as usize];
        inner.read_exact(&mut prefix).map_err(|err| match err.kind() {
            io::ErrorKind::UnexpectedEof => DocCryptError::InvalidFormat(
                "EncryptedPackage is shorter than its length prefix".to_string(),
            ),
            _ => DocCryptError::Io(err),
        })?;
        let plaintext_len = u64::from_le_bytes(prefix);

        let stream_len = inner.seek(SeekFrom::End(0))?;
        let available = stream_len - LENGTH_PREFIX_SIZE;
        let block = keying.block_size() as u64;
        let needed = plaintext_len
            .checked_add(block - 1)
            .map(|n| n / block * block)
            .ok_or_else(|| {
                DocCryptError::InvalidFormat("EncryptedPackage length overflows".to_string())
            })?;
        if available < needed {
            return Err(DocCryptError::InvalidFormat(format!(
                "EncryptedPackage declares {plaintext_len} bytes but holds {available} bytes of ciphertext"
            )));
        }

        log::debug!(
            "opened {:?} package: {plaintext_len} bytes in {} segment(s)",
            keying.scheme(),
            plaintext_len.div_ceil(SEGMENT_SIZE as u64)
        );

        Ok(Self {
            inner,
            keying,
            data_integrity,
            plaintext_len,
            pos: 0,
            scratch: Vec::new(),
            cached_segment: None,
            cached_plain: Vec::new(),
        })
    }
}

impl<R> DecryptingStream<R> {
    /// Declared plaintext length.
    pub fn len(&self) -> u64 {
        self.plaintext_len
    }

    pub fn is_empty(&self) -> bool {
        self.plaintext_len == 0
    }

    pub fn position(&self) -> u64 {
        self.pos
    }

    pub fn scheme(&self) -> KeyScheme {
        self.keying.scheme()
    }

    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    /// Move to `position`. Positions past the end are rejected; `position == len()` is allowed.
    pub fn set_position(&mut self, position: u64) -> Result<()> {
        if position > self.plaintext_len {
            return Err(DocCryptError::InvalidRange {
                position,
                length: self.plaintext_len,
            });
        }
        self.pos = position;
        Ok(())
    }
}

impl<R: Read + Seek> DecryptingStream<R> {
    /// Decrypt segment `index` into the cache unless it is already there.
    fn read_segment(&mut self, index: u64) -> Result<()> {
        if self.cached_segment == Some(index) {
            return Ok(());
        }

        let start = index
            .checked_mul(SEGMENT_SIZE as u64)
            .filter(|start| *start < self.plaintext_len)
            .ok_or(DocCryptError::InvalidRange {
                position: index.saturating_mul(SEGMENT_SIZE as u64),
                length: self.plaintext_len,
            })?;
        let plain_len = (self.plaintext_len - start).min(SEGMENT_SIZE as u64) as usize;
        let cipher_len = round_up_to_multiple(plain_len, self.keying.block_size());

        // Reuse the old plaintext buffer as the next ciphertext buffer.
        self.cached_segment = None;
        std::mem::swap(&mut self.scratch, &mut self.cached_plain);
        zeroize_vec_full(&mut self.scratch);
        self.scratch.clear();
        self.scratch.resize(cipher_len, 0);

        self.inner
            .seek(SeekFrom::Start(LENGTH_PREFIX_SIZE + start))?;
        self.inner.read_exact(&mut self.scratch)?;

        match &self.keying {
            SegmentKeying::Fixed(transform) => transform.decrypt(&mut self.scratch)?,
            SegmentKeying::PerSegment { engine, data_key } => {
                let segment = u32::try_from(index).map_err(|_| {
                    DocCryptError::InvalidFormat("segment index exceeds u32".to_string())
                })?;
                log::trace!("decrypting segment {segment}");
                engine
                    .transform(&data_key.calc_data_iv(segment))?
                    .decrypt(&mut self.scratch)?;
            }
        }
        self.scratch.truncate(plain_len);

        std::mem::swap(&mut self.scratch, &mut self.cached_plain);
        self.cached_segment = Some(index);
        Ok(())
    }

    fn read_segmented(&mut self, out: &mut [u8]) -> Result<usize> {
        let mut written = 0usize;
        while written < out.len() && self.pos < self.plaintext_len {
            let index = self.pos / SEGMENT_SIZE as u64;
            let offset = (self.pos % SEGMENT_SIZE as u64) as usize;
            self.read_segment(index)?;

            let available = self.cached_plain.len().saturating_sub(offset);
            if available == 0 {
                break;
            }
            let take = (out.len() - written).min(available);
            out[written..written + take]
                .copy_from_slice(&self.cached_plain[offset..offset + take]);
            self.pos += take as u64;
            written += take;
        }
        Ok(written)
    }

    /// Recompute HMAC-SHA1 over the whole plaintext and compare it with the stored value.
    ///
    /// The stream position is restored afterwards.
    pub fn verify_integrity(&mut self) -> Result<()> {
        let SegmentKeying::PerSegment { engine, data_key } = &self.keying else {
            return Err(DocCryptError::InvalidFormat(
                "Standard encryption carries no integrity data".to_string(),
            ));
        };
        let Some(di) = &self.data_integrity else {
            return Err(DocCryptError::InvalidFormat(
                "descriptor has no <dataIntegrity> element".to_string(),
            ));
        };

        let decrypt_digest = |purpose: PurposeBlockKey, blob: &[u8]| -> Result<Zeroizing<Vec<u8>>> {
            let mut plain = engine
                .transform(&data_key.derive_iv(Some(purpose.as_bytes())))?
                .decrypt_to_vec(blob)?;
            if plain.len() < SHA1_LEN {
                return Err(DocCryptError::InvalidFormat(
                    "encrypted HMAC field is truncated".to_string(),
                ));
            }
            plain.truncate(SHA1_LEN);
            Ok(plain)
        };
        let hmac_key = decrypt_digest(PurposeBlockKey::HMAC_KEY, &di.encrypted_hmac_key)?;
        let expected = decrypt_digest(PurposeBlockKey::HMAC_VALUE, &di.encrypted_hmac_value)?;

        let mut mac = <Hmac<Sha1> as Mac>::new_from_slice(&hmac_key)
            .map_err(|_| DocCryptError::InvalidFormat("invalid HMAC key".to_string()))?;

        let saved = self.pos;
        self.pos = 0;
        let mut buf = Zeroizing::new(vec![0u8; SEGMENT_SIZE]);
        let result = loop {
            match self.read_segmented(&mut buf) {
                Ok(0) => break Ok(()),
                Ok(n) => mac.update(&buf[..n]),
                Err(err) => break Err(err),
            }
        };
        self.pos = saved;
        result?;

        mac.verify_slice(&expected).map_err(|_| {
            log::warn!("package HMAC does not match");
            DocCryptError::IntegrityCheckFailed
        })
    }
}

impl<R: Read + Seek> Read for DecryptingStream<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() || self.pos >= self.plaintext_len {
            return Ok(0);
        }
        let remaining = self.plaintext_len - self.pos;
        let to_read = remaining.min(buf.len() as u64) as usize;
        Ok(self.read_segmented(&mut buf[..to_read])?)
    }
}

impl<R: Read + Seek> Seek for DecryptingStream<R> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let new_pos: i128 = match pos {
            SeekFrom::Start(n) => n as i128,
            SeekFrom::End(off) => self.plaintext_len as i128 + off as i128,
            SeekFrom::Current(off) => self.pos as i128 + off as i128,
        };
        if new_pos < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "invalid seek to a negative position",
            ));
        }
        let new_pos = u64::try_from(new_pos).map_err(|_| {
            io::Error::new(io::ErrorKind::InvalidInput, "seek position overflows u64")
        })?;
        self.set_position(new_pos)?;
        Ok(self.pos)
    }
}

/// The stream is read-only.
impl<R> Write for DecryptingStream<R> {
    fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
        Err(io::Error::new(io::ErrorKind::Unsupported, "not implemented"))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
