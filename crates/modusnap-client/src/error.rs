use thiserror::Error;

use modusnap_types::ErrorKind;

#[derive(Debug, Error)]
pub enum ClientError {
    /// The engine answered with a non-2xx. Carries the upstream status and a
    /// body snippet; consumers treat 502/503 as retryable.
    #[error("engine returned {status} for {url}: {snippet}")]
    Upstream {
        status: u16,
        url: String,
        snippet: String,
    },

    #[error(transparent)]
    Middleware(#[from] reqwest_middleware::Error),

    #[error(transparent)]
    Request(#[from] reqwest::Error),

    #[error("invalid engine url `{0}`")]
    InvalidUrl(String),
}

impl ClientError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Upstream { .. } => ErrorKind::UpstreamError,
            Self::Middleware(_) | Self::Request(_) => ErrorKind::BackendUnreachable,
            Self::InvalidUrl(_) => ErrorKind::InvalidArg,
        }
    }

    pub fn upstream_status(&self) -> Option<u16> {
        match self {
            Self::Upstream { status, .. } => Some(*status),
            _ => None,
        }
    }
}
