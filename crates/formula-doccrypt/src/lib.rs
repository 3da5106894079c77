//! Password encryption for Office-style encrypted packages (`EncryptionInfo` + `EncryptedPackage`)
//! stored inside an OLE/CFB container.
//!
//! Two schemes are supported, both with AES and SHA-1:
//! - "Standard": binary descriptor, 50000-round key derivation, AES-ECB content.
//! - "Agile": XML descriptor, a random content key wrapped by a password-derived key, and content
//!   encrypted with AES-CBC (or CFB) in 4096-byte segments, each with its own IV.
//!
//! [`decrypt`] returns a [`DecryptingStream`] that decrypts segments on demand, so large packages
//! can be read with random access without decrypting everything up front. [`EncryptingWriter`]
//! produces Agile (default) or Standard containers.

mod container;
mod decrypt;
mod error;
mod info;
mod kdf;
mod params;
mod reader;
mod util;
mod verifier;
mod writer;


pub use crate::container::{
    build_container, is_encrypted_container, is_valid_file, EncryptedContainer, PackageStream,
    ENCRYPTED_PACKAGE_STREAM, ENCRYPTION_INFO_STREAM,
};
pub use crate::decrypt::{
    decrypt, decrypt_to_vec, decrypt_with_password, DecryptOptions, PasswordCallback,
    PasswordRequest, DEFAULT_MAX_SPIN_COUNT,
};
pub use crate::error::{DocCryptError, Result};
pub use crate::info::{
    parse_encryption_info, AgileCipherInfo, AgileInfo, DataIntegrity, EncryptionInfo,
    PasswordKeyEncryptor, StandardHeader, StandardInfo, StandardVerifierData, VersionInfo,
};
pub use crate::kdf::{
    DerivedKey, EncryptionKey, KeyScheme, PurposeBlockKey, AGILE_SPIN_COUNT, MAX_PASSWORD_LEN,
    STANDARD_SPIN_COUNT,
};
pub use crate::params::{
    ChainingMode, CipherAlgorithm, CipherEngine, EncryptionParameters, PaddingMode, Transform,
};
pub use crate::reader::{DecryptingStream, SEGMENT_SIZE};
pub use crate::verifier::{AgileVerifier, ContentKey, StandardVerifier, Verifier};
pub use crate::writer::{encrypt_to_vec, EncryptOptions, EncryptingWriter, EncryptionScheme};
