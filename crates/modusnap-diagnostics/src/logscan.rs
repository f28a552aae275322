use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Only this much of the log tail is ever read.
const MAX_TAIL_BYTES: u64 = 256 * 1024;
/// Scanning starts at the last occurrence of this marker, i.e. the current
/// engine run.
const START_MARKER: &str = "Starting server";

/// Fixed-substring findings from the engine log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogFindings {
    pub ssl_cert: bool,
    pub pip_errors: bool,
    pub rembg_onnx: bool,
}

/// Read the tail of the engine log and scan the current run's section.
pub(crate) fn scan_log(path: &Path) -> LogFindings {
    let Ok(mut file) = fs_err::File::open(path) else {
        debug!("No engine log at {}", path.display());
        return LogFindings::default();
    };
    let len = file.metadata().map(|m| m.len()).unwrap_or(0);
    let start = len.saturating_sub(MAX_TAIL_BYTES);
    if file.seek(SeekFrom::Start(start)).is_err() {
        return LogFindings::default();
    }
    let mut tail = String::new();
    if file.read_to_string(&mut tail).is_err() {
        return LogFindings::default();
    }

    let section = match tail.rfind(START_MARKER) {
        Some(idx) => &tail[idx..],
        None => tail.as_str(),
    };
    scan_section(section)
}

fn scan_section(section: &str) -> LogFindings {
    let lower = section.to_lowercase();
    let pip_errors = lower.contains("pip")
        && ["error", "failed", "conflict", "exception"]
            .iter()
            .any(|marker| lower.contains(marker));
    LogFindings {
        ssl_cert: section.contains("CERTIFICATE_VERIFY_FAILED"),
        pip_errors,
        rembg_onnx: lower.contains("no onnxruntime backend found")
            || (lower.contains("install rembg") && lower.contains("onnxruntime")),
    }
}

#[cfg(test)]
mod tests {
    use super::{scan_log, scan_section};

    #[test]
    fn detects_ssl_marker() {
        let findings = scan_section("urlopen error [SSL: CERTIFICATE_VERIFY_FAILED]");
        assert!(findings.ssl_cert);
        assert!(!findings.pip_errors);
    }

    #[test]
    fn pip_errors_need_pip_and_a_failure_word() {
        assert!(scan_section("pip install exited with error").pip_errors);
        assert!(!scan_section("pip install finished").pip_errors);
        assert!(!scan_section("an error occurred in the sampler").pip_errors);
    }

    #[test]
    fn rembg_markers() {
        assert!(scan_section("No onnxruntime backend found").rembg_onnx);
        assert!(scan_section("please install rembg with onnxruntime support").rembg_onnx);
        assert!(!scan_section("rembg loaded").rembg_onnx);
    }

    #[test]
    fn only_the_current_run_is_scanned() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("comfyui.log");
        fs_err::write(
            &log,
            "CERTIFICATE_VERIFY_FAILED in an old run\nStarting server\nall quiet now\n",
        )
        .unwrap();
        let findings = scan_log(&log);
        assert!(!findings.ssl_cert);
    }

    #[test]
    fn missing_log_is_empty_findings() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(scan_log(&dir.path().join("nope.log")), super::LogFindings::default());
    }
}
