//! `EncryptionInfo` stream parsing and serialization.
//!
//! The stream starts with a version header (`u16 major, u16 minor, u32 flags`):
//!
//! - `3.2` / `4.2`: Standard. A binary `EncryptionHeader` + `EncryptionVerifier` follows.
//! - `4.4` with flags `0x40`: Agile. An XML descriptor follows.
//!
//! Anything else is rejected before any key derivation happens.

use std::collections::HashMap;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader as XmlReader;

use crate::error::{DocCryptError, Result};
use crate::params::{
    ChainingMode, CipherAlgorithm, EncryptionParameters, AES_BLOCK_SIZE, CALG_SHA1,
};
use crate::util::{decode_b64, encode_b64, ByteReader, SHA1_LEN};

pub const AGILE_VERSION_FLAGS: u32 = 0x40;
/// `fCryptoAPI | fAES`
pub const STANDARD_VERSION_FLAGS: u32 = 0x24;

const HEADER_FLAG_EXTERNAL: u32 = 0x10;
const HEADER_FLAG_AES: u32 = 0x20;
/// `PROV_RSA_AES`
const PROVIDER_RSA_AES: u32 = 0x18;
pub const STANDARD_CSP_NAME: &str = "Microsoft Enhanced RSA and AES Cryptographic Provider";

pub const VERIFIER_LEN: usize = 16;
/// SHA-1 digest padded to the AES block size.
pub const ENCRYPTED_VERIFIER_HASH_LEN: usize = 32;

const XML_NS_ENCRYPTION: &str = "http://schemas.microsoft.com/office/2006/encryption";
const XML_NS_PASSWORD: &str = "http://schemas.microsoft.com/office/2006/keyEncryptor/password";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionInfo {
    pub major: u16,
    pub minor: u16,
    pub flags: u32,
}

impl VersionInfo {
    fn parse(r: &mut ByteReader<'_>) -> Result<Self> {
        Ok(Self {
            major: r.read_u16_le("EncryptionInfo.versionMajor")?,
            minor: r.read_u16_le("EncryptionInfo.versionMinor")?,
            flags: r.read_u32_le("EncryptionInfo.flags")?,
        })
    }

    fn write_to(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.major.to_le_bytes());
        out.extend_from_slice(&self.minor.to_le_bytes());
        out.extend_from_slice(&self.flags.to_le_bytes());
    }
}

/// Parsed `EncryptionInfo` for either scheme.
#[derive(Debug, Clone)]
pub enum EncryptionInfo {
    Standard(StandardInfo),
    Agile(AgileInfo),
}

impl EncryptionInfo {
    pub fn version(&self) -> VersionInfo {
        match self {
            Self::Standard(info) => info.version,
            Self::Agile(_) => VersionInfo {
                major: 4,
                minor: 4,
                flags: AGILE_VERSION_FLAGS,
            },
        }
    }

    /// Serialize to the `EncryptionInfo` stream layout, version header included.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.version().write_to(&mut out);
        match self {
            Self::Standard(info) => info.write_body(&mut out),
            Self::Agile(info) => out.extend_from_slice(info.to_xml().as_bytes()),
        }
        out
    }
}

/// Parse an `EncryptionInfo` stream.
pub fn parse_encryption_info(bytes: &[u8]) -> Result<EncryptionInfo> {
    let mut r = ByteReader::new(bytes);
    let version = VersionInfo::parse(&mut r).map_err(|_| {
        DocCryptError::FileIsNotSupported("EncryptionInfo is too short".to_string())
    })?;

    match (version.major, version.minor) {
        (3 | 4, 2) => {
            log::debug!(
                "detected Standard encryption (version {}.{})",
                version.major,
                version.minor
            );
            StandardInfo::parse_body(version, &mut r).map(EncryptionInfo::Standard)
        }
        (4, 4) => {
            if version.flags != AGILE_VERSION_FLAGS {
                return Err(DocCryptError::UnsupportedEncryption(format!(
                    "Agile EncryptionInfo flags 0x{:08x}",
                    version.flags
                )));
            }
            log::debug!("detected Agile encryption");
            AgileInfo::parse_xml(&bytes[r.position()..]).map(EncryptionInfo::Agile)
        }
        (major, minor) => Err(DocCryptError::FileIsNotSupported(format!(
            "EncryptionInfo version {major}.{minor}"
        ))),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StandardHeader {
    pub flags: u32,
    pub size_extra: u32,
    pub alg_id: u32,
    pub alg_id_hash: u32,
    pub key_bits: u32,
    pub provider_type: u32,
    pub csp_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StandardVerifierData {
    pub salt: Vec<u8>,
    pub encrypted_verifier: [u8; VERIFIER_LEN],
    pub verifier_hash_size: u32,
    pub encrypted_verifier_hash: [u8; ENCRYPTED_VERIFIER_HASH_LEN],
}

#[derive(Debug, Clone)]
pub struct StandardInfo {
    pub version: VersionInfo,
    pub header: StandardHeader,
    pub verifier: StandardVerifierData,
    pub algorithm: CipherAlgorithm,
}

impl StandardInfo {
    pub fn new(algorithm: CipherAlgorithm, verifier: StandardVerifierData) -> Self {
        Self {
            version: VersionInfo {
                major: 4,
                minor: 2,
                flags: STANDARD_VERSION_FLAGS,
            },
            header: StandardHeader {
                flags: STANDARD_VERSION_FLAGS,
                size_extra: 0,
                alg_id: algorithm.alg_id(),
                alg_id_hash: CALG_SHA1,
                key_bits: algorithm.key_bits(),
                provider_type: PROVIDER_RSA_AES,
                csp_name: STANDARD_CSP_NAME.to_string(),
            },
            verifier,
            algorithm,
        }
    }

    pub fn params(&self) -> EncryptionParameters {
        EncryptionParameters::standard(self.algorithm)
    }

    fn parse_body(version: VersionInfo, r: &mut ByteReader<'_>) -> Result<Self> {
        let header_size = r.read_u32_le("EncryptionInfo.headerSize")? as usize;
        let header_bytes = r.take(header_size, "EncryptionHeader")?;
        let header = parse_standard_header(header_bytes)?;

        if header.flags & HEADER_FLAG_EXTERNAL != 0 {
            return Err(DocCryptError::UnsupportedEncryption(
                "externally keyed Standard encryption".to_string(),
            ));
        }
        let algorithm = match header.alg_id {
            // Some producers leave AlgID unset and rely on fAES + keyBits.
            0 if header.flags & HEADER_FLAG_AES != 0 => {
                CipherAlgorithm::from_key_bits(header.key_bits)?
            }
            alg_id => CipherAlgorithm::from_alg_id(alg_id)?,
        };
        if header.alg_id_hash != 0 && header.alg_id_hash != CALG_SHA1 {
            return Err(DocCryptError::UnsupportedEncryption(format!(
                "hash AlgID 0x{:08x}",
                header.alg_id_hash
            )));
        }
        if header.key_bits != 0 && header.key_bits != algorithm.key_bits() {
            return Err(DocCryptError::InvalidFormat(format!(
                "keyBits {} does not match {algorithm:?}",
                header.key_bits
            )));
        }

        let salt_size = r.read_u32_le("EncryptionVerifier.saltSize")? as usize;
        let salt = r.take(salt_size, "EncryptionVerifier.salt")?.to_vec();
        let mut encrypted_verifier = [0u8; VERIFIER_LEN];
        encrypted_verifier
            .copy_from_slice(r.take(VERIFIER_LEN, "EncryptionVerifier.encryptedVerifier")?);
        let verifier_hash_size = r.read_u32_le("EncryptionVerifier.verifierHashSize")?;
        if verifier_hash_size as usize != SHA1_LEN {
            return Err(DocCryptError::InvalidFormat(format!(
                "verifierHashSize {verifier_hash_size} (expected {SHA1_LEN})"
            )));
        }
        let mut encrypted_verifier_hash = [0u8; ENCRYPTED_VERIFIER_HASH_LEN];
        encrypted_verifier_hash.copy_from_slice(r.take(
            ENCRYPTED_VERIFIER_HASH_LEN,
            "EncryptionVerifier.encryptedVerifierHash",
        )?);

        Ok(Self {
            version,
            header,
            verifier: StandardVerifierData {
                salt,
                encrypted_verifier,
                verifier_hash_size,
                encrypted_verifier_hash,
            },
            algorithm,
        })
    }

    fn write_body(&self, out: &mut Vec<u8>) {
        let mut header = Vec::new();
        let h = &self.header;
        for field in [
            h.flags,
            h.size_extra,
            h.alg_id,
            h.alg_id_hash,
            h.key_bits,
            h.provider_type,
            0,
            0,
        ] {
            header.extend_from_slice(&field.to_le_bytes());
        }
        for unit in h.csp_name.encode_utf16().chain(std::iter::once(0)) {
            header.extend_from_slice(&unit.to_le_bytes());
        }

        out.extend_from_slice(&(header.len() as u32).to_le_bytes());
        out.extend_from_slice(&header);

        let v = &self.verifier;
        out.extend_from_slice(&(v.salt.len() as u32).to_le_bytes());
        out.extend_from_slice(&v.salt);
        out.extend_from_slice(&v.encrypted_verifier);
        out.extend_from_slice(&v.verifier_hash_size.to_le_bytes());
        out.extend_from_slice(&v.encrypted_verifier_hash);
    }
}

fn parse_standard_header(bytes: &[u8]) -> Result<StandardHeader> {
    let mut r = ByteReader::new(bytes);
    let flags = r.read_u32_le("EncryptionHeader.flags")?;
    let size_extra = r.read_u32_le("EncryptionHeader.sizeExtra")?;
    let alg_id = r.read_u32_le("EncryptionHeader.algID")?;
    let alg_id_hash = r.read_u32_le("EncryptionHeader.algIDHash")?;
    let key_bits = r.read_u32_le("EncryptionHeader.keySize")?;
    let provider_type = r.read_u32_le("EncryptionHeader.providerType")?;
    let _reserved1 = r.read_u32_le("EncryptionHeader.reserved1")?;
    let _reserved2 = r.read_u32_le("EncryptionHeader.reserved2")?;
    let csp_name = decode_csp_name(&bytes[r.position()..])?;

    Ok(StandardHeader {
        flags,
        size_extra,
        alg_id,
        alg_id_hash,
        key_bits,
        provider_type,
        csp_name,
    })
}

fn decode_csp_name(bytes: &[u8]) -> Result<String> {
    if bytes.len() % 2 != 0 {
        return Err(DocCryptError::InvalidFormat(
            "EncryptionHeader.cspName has an odd length".to_string(),
        ));
    }
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .take_while(|&u| u != 0)
        .collect();
    String::from_utf16(&units).map_err(|_| {
        DocCryptError::InvalidFormat("EncryptionHeader.cspName is not valid UTF-16".to_string())
    })
}

/// Cipher settings shared by `<keyData>` and the password `<encryptedKey>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgileCipherInfo {
    pub salt: Vec<u8>,
    pub block_size: usize,
    pub hash_size: usize,
    pub algorithm: CipherAlgorithm,
    pub chaining: ChainingMode,
}

impl AgileCipherInfo {
    pub fn params(&self) -> EncryptionParameters {
        EncryptionParameters::agile(self.algorithm, self.chaining)
    }

    fn from_attrs(attrs: &Attrs, element: &'static str) -> Result<Self> {
        let salt = attrs.b64("saltValue", element)?;
        let salt_size = attrs.number("saltSize", element)?;
        if salt_size != salt.len() {
            return Err(DocCryptError::InvalidFormat(format!(
                "{element} saltSize {salt_size} does not match saltValue ({} bytes)",
                salt.len()
            )));
        }

        let cipher = attrs.required("cipherAlgorithm", element)?;
        if cipher != "AES" {
            return Err(DocCryptError::UnsupportedEncryption(format!(
                "cipher algorithm `{cipher}`"
            )));
        }
        let hash = attrs.required("hashAlgorithm", element)?;
        if !matches!(hash, "SHA1" | "SHA-1") {
            return Err(DocCryptError::UnsupportedEncryption(format!(
                "hash algorithm `{hash}`"
            )));
        }
        let chaining = ChainingMode::from_xml_name(attrs.required("cipherChaining", element)?)?;
        let key_bits = u32::try_from(attrs.number("keyBits", element)?).map_err(|_| {
            DocCryptError::InvalidFormat(format!("{element} keyBits out of range"))
        })?;
        let algorithm = CipherAlgorithm::from_key_bits(key_bits)?;

        let block_size = attrs.number("blockSize", element)?;
        if block_size != AES_BLOCK_SIZE {
            return Err(DocCryptError::UnsupportedEncryption(format!(
                "{element} blockSize {block_size}"
            )));
        }
        let hash_size = attrs.number("hashSize", element)?;
        if hash_size != SHA1_LEN {
            return Err(DocCryptError::InvalidFormat(format!(
                "{element} hashSize {hash_size} (expected {SHA1_LEN})"
            )));
        }

        Ok(Self {
            salt,
            block_size,
            hash_size,
            algorithm,
            chaining,
        })
    }

    fn xml_attrs(&self) -> String {
        format!(
            r#"saltSize="{}" blockSize="{}" keyBits="{}" hashSize="{}" cipherAlgorithm="AES" cipherChaining="{}" hashAlgorithm="SHA1" saltValue="{}""#,
            self.salt.len(),
            self.block_size,
            self.algorithm.key_bits(),
            self.hash_size,
            self.chaining.xml_name(),
            encode_b64(&self.salt),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataIntegrity {
    pub encrypted_hmac_key: Vec<u8>,
    pub encrypted_hmac_value: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasswordKeyEncryptor {
    pub spin_count: u32,
    pub cipher: AgileCipherInfo,
    pub encrypted_verifier_hash_input: Vec<u8>,
    pub encrypted_verifier_hash_value: Vec<u8>,
    pub encrypted_key_value: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgileInfo {
    pub key_data: AgileCipherInfo,
    pub data_integrity: Option<DataIntegrity>,
    pub password: PasswordKeyEncryptor,
}

impl AgileInfo {
    /// Parse the XML descriptor that follows the version header.
    pub fn parse_xml(bytes: &[u8]) -> Result<Self> {
        let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
        let end = bytes
            .iter()
            .rposition(|&b| b != 0)
            .map(|i| i + 1)
            .unwrap_or(0);
        let xml = std::str::from_utf8(&bytes[..end]).map_err(|_| {
            DocCryptError::InvalidFormat("Agile EncryptionInfo XML is not valid UTF-8".to_string())
        })?;

        let mut reader = XmlReader::from_str(xml);
        reader.trim_text(true);

        let mut key_data: Option<Attrs> = None;
        let mut data_integrity: Option<Attrs> = None;
        let mut encrypted_key: Option<Attrs> = None;
        let mut saw_encryption = false;
        let mut in_password_encryptor = false;
        let mut saw_key_encryptor = false;

        loop {
            let event = reader.read_event().map_err(|err| {
                DocCryptError::InvalidFormat(format!("Agile EncryptionInfo XML: {err}"))
            })?;
            let (e, is_empty) = match event {
                Event::Start(e) => (e, false),
                Event::Empty(e) => (e, true),
                Event::End(e) => {
                    if e.local_name().as_ref() == b"keyEncryptor" {
                        in_password_encryptor = false;
                    }
                    continue;
                }
                Event::Eof => break,
                _ => continue,
            };

            match e.local_name().as_ref() {
                b"encryption" => saw_encryption = true,
                b"keyData" => key_data = Some(Attrs::collect(&e)?),
                b"dataIntegrity" => data_integrity = Some(Attrs::collect(&e)?),
                b"keyEncryptor" => {
                    saw_key_encryptor = true;
                    let attrs = Attrs::collect(&e)?;
                    in_password_encryptor =
                        !is_empty && attrs.get("uri") == Some(XML_NS_PASSWORD);
                }
                b"encryptedKey" if in_password_encryptor && encrypted_key.is_none() => {
                    encrypted_key = Some(Attrs::collect(&e)?);
                }
                _ => {}
            }
        }

        if !saw_encryption {
            return Err(DocCryptError::InvalidFormat(
                "missing <encryption> element".to_string(),
            ));
        }
        let key_data = key_data
            .ok_or_else(|| DocCryptError::InvalidFormat("missing <keyData> element".to_string()))?;
        let encrypted_key = match encrypted_key {
            Some(attrs) => attrs,
            None if saw_key_encryptor => {
                return Err(DocCryptError::UnsupportedEncryption(
                    "no password key encryptor".to_string(),
                ))
            }
            None => {
                return Err(DocCryptError::InvalidFormat(
                    "missing <keyEncryptor> element".to_string(),
                ))
            }
        };

        let key_data = AgileCipherInfo::from_attrs(&key_data, "keyData")?;
        let data_integrity = data_integrity
            .map(|attrs| -> Result<DataIntegrity> {
                Ok(DataIntegrity {
                    encrypted_hmac_key: attrs.b64("encryptedHmacKey", "dataIntegrity")?,
                    encrypted_hmac_value: attrs.b64("encryptedHmacValue", "dataIntegrity")?,
                })
            })
            .transpose()?;

        let spin_count = u32::try_from(encrypted_key.number("spinCount", "encryptedKey")?)
            .map_err(|_| DocCryptError::InvalidFormat("spinCount out of range".to_string()))?;
        let password = PasswordKeyEncryptor {
            spin_count,
            cipher: AgileCipherInfo::from_attrs(&encrypted_key, "encryptedKey")?,
            encrypted_verifier_hash_input: encrypted_key
                .b64("encryptedVerifierHashInput", "encryptedKey")?,
            encrypted_verifier_hash_value: encrypted_key
                .b64("encryptedVerifierHashValue", "encryptedKey")?,
            encrypted_key_value: encrypted_key.b64("encryptedKeyValue", "encryptedKey")?,
        };

        Ok(Self {
            key_data,
            data_integrity,
            password,
        })
    }

    pub fn to_xml(&self) -> String {
        let data_integrity = match &self.data_integrity {
            Some(di) => format!(
                r#"<dataIntegrity encryptedHmacKey="{}" encryptedHmacValue="{}"/>"#,
                encode_b64(&di.encrypted_hmac_key),
                encode_b64(&di.encrypted_hmac_value),
            ),
            None => String::new(),
        };
        let p = &self.password;
        format!(
            concat!(
                "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\r\n",
                "<encryption xmlns=\"{ns}\" xmlns:p=\"{ns_p}\">",
                "<keyData {key_data}/>",
                "{data_integrity}",
                "<keyEncryptors><keyEncryptor uri=\"{ns_p}\">",
                "<p:encryptedKey spinCount=\"{spin}\" {key_enc} ",
                "encryptedVerifierHashInput=\"{vhi}\" encryptedVerifierHashValue=\"{vhv}\" ",
                "encryptedKeyValue=\"{kv}\"/>",
                "</keyEncryptor></keyEncryptors></encryption>"
            ),
            ns = XML_NS_ENCRYPTION,
            ns_p = XML_NS_PASSWORD,
            key_data = self.key_data.xml_attrs(),
            data_integrity = data_integrity,
            spin = p.spin_count,
            key_enc = p.cipher.xml_attrs(),
            vhi = encode_b64(&p.encrypted_verifier_hash_input),
            vhv = encode_b64(&p.encrypted_verifier_hash_value),
            kv = encode_b64(&p.encrypted_key_value),
        )
    }
}

/// Attributes of one XML element, keyed by local name.
struct Attrs(HashMap<String, String>);

impl Attrs {
    fn collect(e: &BytesStart<'_>) -> Result<Self> {
        let mut map = HashMap::new();
        for attr in e.attributes().with_checks(false) {
            let attr = attr.map_err(|_| {
                DocCryptError::InvalidFormat("invalid XML attribute".to_string())
            })?;
            let key = attr.key.local_name();
            let key = std::str::from_utf8(key.as_ref()).map_err(|_| {
                DocCryptError::InvalidFormat("invalid UTF-8 attribute name".to_string())
            })?;
            let value = attr.unescape_value().map_err(|_| {
                DocCryptError::InvalidFormat(format!("invalid value for attribute `{key}`"))
            })?;
            map.insert(key.to_string(), value.into_owned());
        }
        Ok(Self(map))
    }

    fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    fn required(&self, name: &'static str, element: &'static str) -> Result<&str> {
        self.get(name).ok_or_else(|| {
            DocCryptError::InvalidFormat(format!("missing {element}.{name}"))
        })
    }

    fn number(&self, name: &'static str, element: &'static str) -> Result<usize> {
        let raw = self.required(name, element)?;
        raw.trim().parse().map_err(|_| {
            DocCryptError::InvalidFormat(format!("{element}.{name} is not a number: `{raw}`"))
        })
    }

    fn b64(&self, name: &'static str, element: &'static str) -> Result<Vec<u8>> {
        decode_b64(self.required(name, element)?, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agile_stream(xml: &str) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&4u16.to_le_bytes());
        out.extend_from_slice(&4u16.to_le_bytes());
        out.extend_from_slice(&AGILE_VERSION_FLAGS.to_le_bytes());
        out.extend_from_slice(xml.as_bytes());
        out
    }

    const SAMPLE_XML: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<encryption xmlns="http://schemas.microsoft.com/office/2006/encryption"
    xmlns:p="http://schemas.microsoft.com/office/2006/keyEncryptor/password"
    xmlns:c="http://schemas.microsoft.com/office/2006/keyEncryptor/certificate">
  <keyData saltSize="16" blockSize="16" keyBits="128" hashSize="20" cipherAlgorithm="AES"
    cipherChaining="ChainingModeCBC" hashAlgorithm="SHA1" saltValue="AAECAwQFBgcICQoLDA0ODw=="/>
  <dataIntegrity encryptedHmacKey="EBESEw" encryptedHmacValue="qrvM"/>
  <keyEncryptors>
    <keyEncryptor uri="http://schemas.microsoft.com/office/2006/keyEncryptor/certificate">
      <c:encryptedKey encryptedKeyValue="AAAA"/>
    </keyEncryptor>
    <keyEncryptor uri="http://schemas.microsoft.com/office/2006/keyEncryptor/password">
      <p:encryptedKey spinCount="100000" saltSize="16" blockSize="16" keyBits="256"
        hashSize="20" cipherAlgorithm="AES" cipherChaining="ChainingModeCFB"
        hashAlgorithm="SHA1" saltValue="EBESExQVFhcYGRobHB0eHw=="
        encryptedVerifierHashInput="CQoL DA"
        encryptedVerifierHashValue="DQ4PEA=="
        encryptedKeyValue="BQYHCA=="/>
    </keyEncryptor>
  </keyEncryptors>
</encryption>
"#;

    #[test]
    fn parses_agile_descriptor_with_certificate_encryptor_first() {
        let mut stream = agile_stream(SAMPLE_XML);
        stream.extend_from_slice(&[0u8; 64]);
        let EncryptionInfo::Agile(info) = parse_encryption_info(&stream).unwrap() else {
            panic!("expected Agile");
        };
        assert_eq!(info.key_data.salt, (0u8..16).collect::<Vec<_>>());
        assert_eq!(info.key_data.algorithm, CipherAlgorithm::Aes128);
        assert_eq!(info.key_data.chaining, ChainingMode::Cbc);
        let di = info.data_integrity.as_ref().unwrap();
        assert_eq!(di.encrypted_hmac_key, vec![0x10, 0x11, 0x12, 0x13]);
        assert_eq!(info.password.spin_count, 100_000);
        assert_eq!(info.password.cipher.algorithm, CipherAlgorithm::Aes256);
        assert_eq!(info.password.cipher.chaining, ChainingMode::Cfb);
        assert_eq!(info.password.cipher.salt, (16u8..32).collect::<Vec<_>>());
        assert_eq!(info.password.encrypted_verifier_hash_input, vec![9, 10, 11, 12]);
        assert_eq!(info.password.encrypted_key_value, vec![5, 6, 7, 8]);
    }

    #[test]
    fn agile_xml_survives_serialization() {
        let EncryptionInfo::Agile(info) = parse_encryption_info(&agile_stream(SAMPLE_XML)).unwrap()
        else {
            panic!("expected Agile");
        };
        let bytes = EncryptionInfo::Agile(info.clone()).to_bytes();
        let EncryptionInfo::Agile(reparsed) = parse_encryption_info(&bytes).unwrap() else {
            panic!("expected Agile");
        };
        assert_eq!(reparsed, info);
    }

    #[test]
    fn tolerates_utf8_bom() {
        let xml = format!("\u{FEFF}{SAMPLE_XML}");
        assert!(matches!(
            parse_encryption_info(&agile_stream(&xml)).unwrap(),
            EncryptionInfo::Agile(_)
        ));
    }

    #[test]
    fn rejects_unsupported_hash() {
        let xml = SAMPLE_XML.replacen(r#"hashAlgorithm="SHA1""#, r#"hashAlgorithm="SHA512""#, 1);
        assert!(matches!(
            parse_encryption_info(&agile_stream(&xml)),
            Err(DocCryptError::UnsupportedEncryption(_))
        ));
    }

    #[test]
    fn rejects_unsupported_chaining() {
        let xml = SAMPLE_XML.replacen("ChainingModeCBC", "ChainingModeOFB", 1);
        assert!(matches!(
            parse_encryption_info(&agile_stream(&xml)),
            Err(DocCryptError::UnsupportedEncryption(_))
        ));
    }

    #[test]
    fn rejects_certificate_only_descriptor() {
        let xml = SAMPLE_XML.replace(
            "http://schemas.microsoft.com/office/2006/keyEncryptor/password\">",
            "urn:other\">",
        );
        assert!(matches!(
            parse_encryption_info(&agile_stream(&xml)),
            Err(DocCryptError::UnsupportedEncryption(_))
        ));
    }

    #[test]
    fn rejects_salt_size_mismatch() {
        let xml = SAMPLE_XML.replacen(r#"saltSize="16""#, r#"saltSize="8""#, 1);
        assert!(matches!(
            parse_encryption_info(&agile_stream(&xml)),
            Err(DocCryptError::InvalidFormat(_))
        ));
    }

    #[test]
    fn version_dispatch() {
        let mut bytes = Vec::new();
        VersionInfo {
            major: 4,
            minor: 4,
            flags: 0x24,
        }
        .write_to(&mut bytes);
        assert!(matches!(
            parse_encryption_info(&bytes),
            Err(DocCryptError::UnsupportedEncryption(_))
        ));

        for (major, minor) in [(1, 1), (4, 3), (2, 2), (5, 2)] {
            let mut bytes = Vec::new();
            VersionInfo {
                major,
                minor,
                flags: 0,
            }
            .write_to(&mut bytes);
            assert!(
                matches!(
                    parse_encryption_info(&bytes),
                    Err(DocCryptError::FileIsNotSupported(_))
                ),
                "version {major}.{minor}"
            );
        }

        assert!(matches!(
            parse_encryption_info(&[4, 0]),
            Err(DocCryptError::FileIsNotSupported(_))
        ));
    }

    fn sample_standard(algorithm: CipherAlgorithm) -> StandardInfo {
        StandardInfo::new(
            algorithm,
            StandardVerifierData {
                salt: (0u8..16).collect(),
                encrypted_verifier: [0xAA; VERIFIER_LEN],
                verifier_hash_size: SHA1_LEN as u32,
                encrypted_verifier_hash: [0xBB; ENCRYPTED_VERIFIER_HASH_LEN],
            },
        )
    }

    #[test]
    fn standard_layout_offsets() {
        let bytes = EncryptionInfo::Standard(sample_standard(CipherAlgorithm::Aes192)).to_bytes();
        assert_eq!(&bytes[0..4], &[4, 0, 2, 0]);
        let header_size = u32::from_le_bytes(bytes[8..12].try_into().unwrap()) as usize;
        let header = &bytes[12..12 + header_size];
        assert_eq!(u32::from_le_bytes(header[8..12].try_into().unwrap()), 0x660F);
        assert_eq!(u32::from_le_bytes(header[16..20].try_into().unwrap()), 192);

        let EncryptionInfo::Standard(parsed) = parse_encryption_info(&bytes).unwrap() else {
            panic!("expected Standard");
        };
        assert_eq!(parsed.algorithm, CipherAlgorithm::Aes192);
        assert_eq!(parsed.header.csp_name, STANDARD_CSP_NAME);
        assert_eq!(parsed.verifier, sample_standard(CipherAlgorithm::Aes192).verifier);
    }

    #[test]
    fn standard_rejects_non_aes_and_non_sha1() {
        let mut info = sample_standard(CipherAlgorithm::Aes128);
        info.header.alg_id = 0x6801; // RC4
        assert!(matches!(
            parse_encryption_info(&EncryptionInfo::Standard(info).to_bytes()),
            Err(DocCryptError::UnsupportedEncryption(_))
        ));

        let mut info = sample_standard(CipherAlgorithm::Aes128);
        info.header.alg_id_hash = 0x8003; // MD5
        assert!(matches!(
            parse_encryption_info(&EncryptionInfo::Standard(info).to_bytes()),
            Err(DocCryptError::UnsupportedEncryption(_))
        ));
    }

    #[test]
    fn standard_accepts_version_3_2_and_unset_alg_id() {
        let mut info = sample_standard(CipherAlgorithm::Aes256);
        info.version.major = 3;
        info.header.alg_id = 0;
        let EncryptionInfo::Standard(parsed) =
            parse_encryption_info(&EncryptionInfo::Standard(info).to_bytes()).unwrap()
        else {
            panic!("expected Standard");
        };
        assert_eq!(parsed.algorithm, CipherAlgorithm::Aes256);
        assert_eq!(parsed.version.major, 3);
    }

    #[test]
    fn standard_truncated_verifier_is_invalid_format() {
        let bytes = EncryptionInfo::Standard(sample_standard(CipherAlgorithm::Aes128)).to_bytes();
        assert!(matches!(
            parse_encryption_info(&bytes[..bytes.len() - 1]),
            Err(DocCryptError::InvalidFormat(_))
        ));
    }
}
