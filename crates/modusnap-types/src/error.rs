use serde::{Deserialize, Serialize};

/// The transport-agnostic error taxonomy.
///
/// Every operation boundary maps its failure into one of these kinds; the
/// kind is what callers dispatch on, the message carries the detail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// No valid engine location; carries the checked paths and remediation.
    BackendDirNotFound,
    /// The engine up-check failed.
    BackendUnreachable,
    /// The virtualenv interpreter was not found.
    VenvMissing,
    /// Transaction state invalid for the requested transition.
    Conflict,
    /// Unknown transaction or snapshot.
    NotFound,
    /// Missing or malformed input.
    InvalidArg,
    /// Requested packs not permitted for the current tier.
    PolicyViolation,
    /// Queue drain or readiness poll exceeded its wall-clock.
    QueueTimeout,
    /// The engine returned a non-2xx for a consumed endpoint.
    UpstreamError,
    /// Uncaught failure at an operation boundary.
    Internal,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let token = match self {
            Self::BackendDirNotFound => "BACKEND_DIR_NOT_FOUND",
            Self::BackendUnreachable => "BACKEND_UNREACHABLE",
            Self::VenvMissing => "VENV_MISSING",
            Self::Conflict => "CONFLICT",
            Self::NotFound => "NOT_FOUND",
            Self::InvalidArg => "INVALID_ARG",
            Self::PolicyViolation => "POLICY_VIOLATION",
            Self::QueueTimeout => "QUEUE_TIMEOUT",
            Self::UpstreamError => "UPSTREAM_ERROR",
            Self::Internal => "INTERNAL",
        };
        f.write_str(token)
    }
}

impl ErrorKind {
    /// Whether a consumer may retry the operation without changing the input.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::BackendUnreachable | Self::QueueTimeout | Self::UpstreamError
        )
    }
}
