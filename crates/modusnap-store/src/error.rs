use thiserror::Error;

use modusnap_types::ErrorKind;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("failed to encode state: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("unknown transaction `{0}`")]
    UnknownTransaction(String),
    #[error("unknown snapshot `{0}`")]
    UnknownSnapshot(String),
    #[error("api key store is full ({0} keys)")]
    KeyStoreFull(usize),
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Io(_) | Self::Encode(_) => ErrorKind::Internal,
            Self::UnknownTransaction(_) | Self::UnknownSnapshot(_) => ErrorKind::NotFound,
            Self::KeyStoreFull(_) => ErrorKind::InvalidArg,
        }
    }
}
