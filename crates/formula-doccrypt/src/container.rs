//! OLE/CFB compound-file plumbing: locating the two crypto streams and building new containers.

use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use cfb::CompoundFile;

use crate::error::{DocCryptError, Result};

pub const ENCRYPTION_INFO_STREAM: &str = "EncryptionInfo";
pub const ENCRYPTED_PACKAGE_STREAM: &str = "EncryptedPackage";

const OLE_MAGIC: [u8; 8] = [0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];

/// Cheap check: OLE signature plus both crypto streams. Does not parse `EncryptionInfo`.
pub fn is_encrypted_container(bytes: &[u8]) -> bool {
    if bytes.len() < OLE_MAGIC.len() || bytes[..OLE_MAGIC.len()] != OLE_MAGIC {
        return false;
    }
    is_valid_file(Cursor::new(bytes))
}

/// Same as [`is_encrypted_container`] for any seekable source.
pub fn is_valid_file<F: Read + Seek>(inner: F) -> bool {
    let Ok(mut ole) = CompoundFile::open(inner) else {
        return false;
    };
    stream_exists(&mut ole, ENCRYPTION_INFO_STREAM) && stream_exists(&mut ole, ENCRYPTED_PACKAGE_STREAM)
}

fn stream_exists<F: Read + Seek>(ole: &mut CompoundFile<F>, name: &str) -> bool {
    ole.open_stream(name).is_ok()
}

/// An opened compound file known to carry `EncryptionInfo` and `EncryptedPackage`.
pub struct EncryptedContainer<F> {
    ole: CompoundFile<F>,
}

impl<F: Read + Seek> EncryptedContainer<F> {
    pub fn open(inner: F) -> Result<Self> {
        let mut ole = CompoundFile::open(inner).map_err(|err| {
            DocCryptError::FileIsNotSupported(format!("not a compound file: {err}"))
        })?;
        for name in [ENCRYPTION_INFO_STREAM, ENCRYPTED_PACKAGE_STREAM] {
            if !stream_exists(&mut ole, name) {
                return Err(DocCryptError::FileIsNotSupported(format!(
                    "missing `{name}` stream"
                )));
            }
        }
        Ok(Self { ole })
    }

    pub fn read_encryption_info(&mut self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        self.ole
            .open_stream(ENCRYPTION_INFO_STREAM)?
            .read_to_end(&mut out)?;
        Ok(out)
    }

    /// Consume the container and expose the `EncryptedPackage` stream.
    pub fn into_package_stream(mut self) -> Result<PackageStream<F>> {
        let stream = self.ole.open_stream(ENCRYPTED_PACKAGE_STREAM)?;
        Ok(PackageStream {
            stream,
            _ole: self.ole,
        })
    }
}

/// The `EncryptedPackage` stream. Keeps the compound file alive for as long as it is read.
pub struct PackageStream<F> {
    stream: cfb::Stream<F>,
    _ole: CompoundFile<F>,
}

impl<F: Read + Seek> PackageStream<F> {
    pub fn len(&self) -> u64 {
        self.stream.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<F: Read + Seek> Read for PackageStream<F> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }
}

impl<F: Read + Seek> Seek for PackageStream<F> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.stream.seek(pos)
    }
}

/// Build a compound file holding the two crypto streams.
///
/// With a `template`, every other storage and stream of the template is copied over, so document
/// metadata streams survive re-encryption.
pub fn build_container(
    template: Option<&[u8]>,
    encryption_info: &[u8],
    encrypted_package: &[u8],
) -> Result<Vec<u8>> {
    let mut out = CompoundFile::create(Cursor::new(Vec::new()))?;

    if let Some(template) = template {
        copy_template_entries(template, &mut out)?;
    }

    out.create_stream(ENCRYPTION_INFO_STREAM)?
        .write_all(encryption_info)?;
    out.create_stream(ENCRYPTED_PACKAGE_STREAM)?
        .write_all(encrypted_package)?;
    out.flush()?;

    Ok(out.into_inner().into_inner())
}

fn is_crypto_stream(path: &Path) -> bool {
    let Some(name) = path.to_str() else {
        return false;
    };
    let name = name.strip_prefix('/').unwrap_or(name);
    name.eq_ignore_ascii_case(ENCRYPTION_INFO_STREAM)
        || name.eq_ignore_ascii_case(ENCRYPTED_PACKAGE_STREAM)
}

fn copy_template_entries<W: Read + Write + Seek>(
    template: &[u8],
    out: &mut CompoundFile<W>,
) -> Result<()> {
    let mut src = CompoundFile::open(Cursor::new(template)).map_err(|err| {
        DocCryptError::FileIsNotSupported(format!("template is not a compound file: {err}"))
    })?;

    // `walk` yields parents before children.
    let entries: Vec<(PathBuf, bool)> = src
        .walk()
        .filter(|e| !e.is_root())
        .map(|e| (e.path().to_path_buf(), e.is_storage()))
        .collect();

    let mut copied = 0usize;
    for (path, is_storage) in entries {
        if is_storage {
            out.create_storage_all(&path)?;
            continue;
        }
        if is_crypto_stream(&path) {
            continue;
        }
        let mut data = Vec::new();
        src.open_stream(&path)?.read_to_end(&mut data)?;
        out.create_stream(&path)?.write_all(&data)?;
        copied += 1;
    }
    log::debug!("copied {copied} stream(s) from template container");
    Ok(())
}
