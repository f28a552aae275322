use jiff::Timestamp;
use serde::{Deserialize, Serialize};

use modusnap_types::{DiagnosticIssue, IssueId, Severity};

use crate::logscan::LogFindings;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeMode {
    Fast,
    Deep,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectInfoProbe {
    /// Node classes the engine advertises.
    pub node_classes: usize,
    /// Whether the canonical nodes are present with their metadata.
    pub canonical_nodes_present: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipCheckProbe {
    pub healthy: bool,
    pub output: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TorchProbe {
    #[serde(default)]
    pub cuda: bool,
    #[serde(default)]
    pub mps: bool,
}

/// Everything one diagnostics pass observed, plus the issues derived from
/// it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticsReport {
    pub mode: ProbeMode,
    pub generated_at: Timestamp,
    pub backend_up: bool,
    pub manager_endpoint: Option<String>,
    pub venv_exists: bool,
    pub object_info: Option<ObjectInfoProbe>,
    /// Deep mode only.
    pub manager_pkg_found: Option<bool>,
    pub manager_import_ok: Option<bool>,
    pub pip_check: Option<PipCheckProbe>,
    pub hardware_profile: String,
    pub dependency_synced_at: Option<String>,
    /// Packs advertising workflow templates; deep mode only.
    pub workflow_templates: Option<usize>,
    pub torch: Option<TorchProbe>,
    pub log_findings: LogFindings,
    pub issues: Vec<DiagnosticIssue>,
}

fn issue(id: IssueId, severity: Severity, title: &str, cause: &str, evidence: String) -> DiagnosticIssue {
    DiagnosticIssue {
        id,
        severity,
        title: title.to_string(),
        cause: cause.to_string(),
        evidence,
        fix: format!("apply fix `{}`", id.as_str()),
    }
}

/// The §issue table: derive the typed issue list from the observed facts.
pub(crate) fn derive_issues(report: &DiagnosticsReport) -> Vec<DiagnosticIssue> {
    let mut issues = Vec::new();
    let pip_failed = report
        .pip_check
        .as_ref()
        .is_some_and(|check| !check.healthy);

    if !report.backend_up {
        issues.push(issue(
            IssueId::BackendDown,
            Severity::Error,
            "Engine is not reachable",
            "no 2xx from /system_stats",
            String::new(),
        ));
    }
    if report.backend_up && report.manager_endpoint.is_none() {
        issues.push(issue(
            IssueId::ManagerRoutesMissing,
            Severity::Error,
            "Manager routes are missing",
            "engine is up but no manager endpoint answered",
            String::new(),
        ));
    }
    if !report.venv_exists {
        issues.push(issue(
            IssueId::VenvMissing,
            Severity::Error,
            "Virtualenv interpreter is missing",
            "venv/bin/python does not exist",
            String::new(),
        ));
    }
    if report.venv_exists
        && report.manager_pkg_found == Some(false)
        && report.manager_endpoint.is_none()
    {
        issues.push(issue(
            IssueId::ManagerPkgMissing,
            Severity::Error,
            "Manager package is not installed",
            "importlib cannot find comfyui_manager",
            String::new(),
        ));
    }
    if report.manager_pkg_found == Some(true)
        && report.manager_import_ok == Some(false)
        && report.manager_endpoint.is_none()
    {
        issues.push(issue(
            IssueId::ManagerImportRuntimeFailed,
            Severity::Warning,
            "Manager package fails to import",
            "the package is installed but its runtime import raises",
            String::new(),
        ));
    }
    if pip_failed {
        issues.push(issue(
            IssueId::PipCheckFailed,
            Severity::Warning,
            "pip check reports broken requirements",
            "the dependency graph is inconsistent",
            report
                .pip_check
                .as_ref()
                .map(|check| check.output.clone())
                .unwrap_or_default(),
        ));
    }
    if report.log_findings.ssl_cert {
        issues.push(issue(
            IssueId::SslCertIssue,
            Severity::Warning,
            "TLS certificate verification failures in the log",
            "CERTIFICATE_VERIFY_FAILED marker in the current run",
            String::new(),
        ));
    }
    if report.log_findings.pip_errors && pip_failed {
        issues.push(issue(
            IssueId::PipLogIssue,
            Severity::Warning,
            "pip errors in the log",
            "pip failure markers in the current run while pip check fails",
            String::new(),
        ));
    }
    if report.log_findings.rembg_onnx {
        issues.push(issue(
            IssueId::RembgOnnxMissing,
            Severity::Error,
            "rembg has no onnxruntime backend",
            "onnxruntime/rembg markers in the current run",
            String::new(),
        ));
    }
    issues
}
