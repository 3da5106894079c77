use thiserror::Error;

#[derive(Debug, Error)]
pub enum DocCryptError {
    #[error("unsupported encryption: {0}")]
    UnsupportedEncryption(String),
    #[error("invalid password")]
    InvalidPassword,
    #[error("password is too long ({len} UTF-16 code units, max {max})")]
    PasswordTooLong { len: usize, max: usize },
    #[error("file is not supported: {0}")]
    FileIsNotSupported(String),
    #[error("position {position} is out of range for a stream of length {length}")]
    InvalidRange { position: u64, length: u64 },
    #[error("invalid format: {0}")]
    InvalidFormat(String),
    #[error("integrity check failed")]
    IntegrityCheckFailed,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = DocCryptError> = std::result::Result<T, E>;

impl From<DocCryptError> for std::io::Error {
    fn from(err: DocCryptError) -> Self {
        use std::io::ErrorKind;

        match err {
            DocCryptError::Io(err) => err,
            DocCryptError::InvalidRange { .. } => {
                std::io::Error::new(ErrorKind::InvalidInput, err)
            }
            other => std::io::Error::new(ErrorKind::InvalidData, other),
        }
    }
}
