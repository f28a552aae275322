use thiserror::Error;

use modusnap_client::ClientError;
use modusnap_heal::HealError;
use modusnap_types::ErrorKind;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Client(#[from] ClientError),

    #[error(transparent)]
    Heal(#[from] HealError),

    #[error("{0}")]
    InvalidArg(String),
}

impl OrchestratorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Client(err) => err.kind(),
            Self::Heal(err) => err.kind(),
            Self::InvalidArg(_) => ErrorKind::InvalidArg,
        }
    }
}
