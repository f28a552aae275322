use serde::{Deserialize, Serialize};

/// The closed set of issue ids the fix engine can dispatch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueId {
    BackendDown,
    ManagerRoutesMissing,
    VenvMissing,
    ManagerPkgMissing,
    ManagerImportRuntimeFailed,
    PipCheckFailed,
    SslCertIssue,
    PipLogIssue,
    RembgOnnxMissing,
}

impl IssueId {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::BackendDown => "backend_down",
            Self::ManagerRoutesMissing => "manager_routes_missing",
            Self::VenvMissing => "venv_missing",
            Self::ManagerPkgMissing => "manager_pkg_missing",
            Self::ManagerImportRuntimeFailed => "manager_import_runtime_failed",
            Self::PipCheckFailed => "pip_check_failed",
            Self::SslCertIssue => "ssl_cert_issue",
            Self::PipLogIssue => "pip_log_issue",
            Self::RembgOnnxMissing => "rembg_onnx_missing",
        }
    }
}

impl std::str::FromStr for IssueId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "backend_down" => Ok(Self::BackendDown),
            "manager_routes_missing" => Ok(Self::ManagerRoutesMissing),
            "venv_missing" => Ok(Self::VenvMissing),
            "manager_pkg_missing" => Ok(Self::ManagerPkgMissing),
            "manager_import_runtime_failed" => Ok(Self::ManagerImportRuntimeFailed),
            "pip_check_failed" => Ok(Self::PipCheckFailed),
            "ssl_cert_issue" => Ok(Self::SslCertIssue),
            "pip_log_issue" => Ok(Self::PipLogIssue),
            "rembg_onnx_missing" => Ok(Self::RembgOnnxMissing),
            other => Err(format!("unknown issue id: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

/// A typed issue produced by the diagnostics engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticIssue {
    pub id: IssueId,
    pub severity: Severity,
    pub title: String,
    pub cause: String,
    pub evidence: String,
    /// Human-readable, and parseable by the fix engine.
    pub fix: String,
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::IssueId;

    #[test]
    fn issue_ids_round_trip() {
        for id in [
            IssueId::BackendDown,
            IssueId::ManagerRoutesMissing,
            IssueId::VenvMissing,
            IssueId::ManagerPkgMissing,
            IssueId::ManagerImportRuntimeFailed,
            IssueId::PipCheckFailed,
            IssueId::SslCertIssue,
            IssueId::PipLogIssue,
            IssueId::RembgOnnxMissing,
        ] {
            assert_eq!(IssueId::from_str(id.as_str()).unwrap(), id);
            let json = serde_json::to_string(&id).unwrap();
            assert_eq!(json, format!("\"{}\"", id.as_str()));
        }
    }
}
