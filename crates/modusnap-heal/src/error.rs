use thiserror::Error;

use modusnap_reconciler::ReconcilerError;
use modusnap_store::StoreError;
use modusnap_types::{ErrorKind, IssueId};

#[derive(Debug, Error)]
pub enum HealError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Reconciler(#[from] ReconcilerError),

    #[error("no automated fix for issue `{}`", .0.as_str())]
    NoAutomatedFix(IssueId),
}

impl HealError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Io(_) => ErrorKind::Internal,
            Self::Store(err) => err.kind(),
            Self::Reconciler(err) => err.kind(),
            Self::NoAutomatedFix(_) => ErrorKind::InvalidArg,
        }
    }
}
