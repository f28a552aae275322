use thiserror::Error;

use modusnap_store::StoreError;
use modusnap_types::ErrorKind;

#[derive(Debug, Error)]
pub enum EnvError {
    #[error("transaction `{id}` cannot {action} while {state}")]
    Conflict {
        id: String,
        action: &'static str,
        state: String,
    },

    #[error("unknown transaction `{0}`")]
    NotFound(String),

    #[error("requested packs violate the current tier policy: {}", violations.join(", "))]
    PolicyViolation { violations: Vec<String> },

    #[error("{0}")]
    InvalidArg(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl EnvError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Conflict { .. } => ErrorKind::Conflict,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::PolicyViolation { .. } => ErrorKind::PolicyViolation,
            Self::InvalidArg(_) => ErrorKind::InvalidArg,
            Self::Store(err) => err.kind(),
        }
    }
}
