//! Classifies catalog packs against the host hardware before any disk or
//! install activity.
//!
//! The rules are a data table of case-insensitive patterns matched against
//! a text blob built from the pack's descriptive fields. `blocked` wins
//! over `warning` wins over `installable`; reasons accumulate for display.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use modusnap_types::{
    CatalogAuditSummary, CatalogItem, Decision, ErrorKind, HardwareProfile, PackDecision,
    PreflightReport, SizeEstimate, SizeEstimateEntry,
};

/// Above this batch size the per-item report keeps non-installable items
/// only.
const COMPACT_THRESHOLD: usize = 600;
/// Above this batch size the preflight suggests chunked submission.
const LARGE_BATCH_THRESHOLD: usize = 200;

pub const INSTALLABLE_FILE: &str = "modusnap_catalog_installable_packs.json";
pub const INCOMPATIBLE_FILE: &str = "modusnap_catalog_incompatible_packs.json";

#[derive(Debug, Error)]
pub enum AuditError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("failed to encode audit trail: {0}")]
    Encode(#[from] serde_json::Error),
}

impl AuditError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Internal
    }
}

#[derive(Debug, Clone, Copy)]
enum Condition {
    NoNvidia,
    NoRocm,
    DarwinArm64,
}

impl Condition {
    fn holds(self, profile: &HardwareProfile) -> bool {
        match self {
            Self::NoNvidia => !profile.has_nvidia,
            Self::NoRocm => !profile.has_rocm,
            Self::DarwinArm64 => profile.is_darwin_arm64(),
        }
    }
}

struct Rule {
    patterns: &'static [&'static str],
    condition: Condition,
    decision: Decision,
    reason: &'static str,
}

/// Precedence is table order, high to low; the strictest matched decision
/// wins.
const RULES: &[Rule] = &[
    Rule {
        patterns: &[
            "cuda-only",
            "requires cuda",
            "nvidia-only",
            "tensorrt required",
            "triton required",
        ],
        condition: Condition::NoNvidia,
        decision: Decision::Blocked,
        reason: "requires NVIDIA CUDA hardware",
    },
    Rule {
        patterns: &["rocm-only", "requires rocm", "hip required"],
        condition: Condition::NoRocm,
        decision: Decision::Blocked,
        reason: "requires AMD ROCm hardware",
    },
    Rule {
        patterns: &["cuda", "nvidia", "tensorrt", "cu12", "cu11"],
        condition: Condition::NoNvidia,
        decision: Decision::Warning,
        reason: "references CUDA tooling but no NVIDIA hardware is present",
    },
    Rule {
        patterns: &["rocm", "hip"],
        condition: Condition::NoRocm,
        decision: Decision::Warning,
        reason: "references ROCm tooling but no AMD hardware is present",
    },
    Rule {
        patterns: &["xformers", "triton", "flash-attn", "bitsandbytes"],
        condition: Condition::DarwinArm64,
        decision: Decision::Warning,
        reason: "known to be problematic on Apple Silicon",
    },
];

/// Classify one item against the profile.
pub fn classify(item: &CatalogItem, profile: &HardwareProfile) -> PackDecision {
    let blob = item.audit_blob();
    let mut decision = Decision::Installable;
    let mut reasons = Vec::new();

    for rule in RULES {
        if !rule.condition.holds(profile) {
            continue;
        }
        if let Some(pattern) = rule.patterns.iter().find(|pattern| blob.contains(*pattern)) {
            reasons.push(format!("`{pattern}`: {}", rule.reason));
            decision = decision.max(rule.decision);
        }
    }

    PackDecision {
        key: item.ui_key.clone(),
        title: item.title.clone(),
        decision,
        reasons,
    }
}

/// The preflight surface over a batch of items.
pub fn preflight(
    items: &[CatalogItem],
    profile: &HardwareProfile,
    pip_healthy: Option<bool>,
) -> PreflightReport {
    let decisions: Vec<PackDecision> = items.iter().map(|item| classify(item, profile)).collect();
    let summary = summarize(&decisions);
    let blocked_keys = decisions
        .iter()
        .filter(|decision| decision.decision == Decision::Blocked)
        .map(|decision| decision.key.clone())
        .collect();

    let mut global_warnings = Vec::new();
    if pip_healthy == Some(false) {
        global_warnings
            .push("existing pip conflicts; installs may fail until the environment is repaired".to_string());
    }
    if items.len() > LARGE_BATCH_THRESHOLD {
        global_warnings.push(format!(
            "large batch ({} items); submission will be chunked",
            items.len()
        ));
    }

    let compact = items.len() > COMPACT_THRESHOLD;
    let per_item = if compact {
        decisions
            .into_iter()
            .filter(|decision| decision.decision != Decision::Installable)
            .collect()
    } else {
        decisions
    };

    PreflightReport {
        summary,
        blocked_keys,
        global_warnings,
        per_item,
        compact,
    }
}

pub fn summarize(decisions: &[PackDecision]) -> CatalogAuditSummary {
    let mut summary = CatalogAuditSummary {
        total: decisions.len(),
        ..CatalogAuditSummary::default()
    };
    for decision in decisions {
        match decision.decision {
            Decision::Installable => summary.installable += 1,
            Decision::Warning => summary.warning += 1,
            Decision::Blocked => summary.blocked += 1,
        }
    }
    summary
}

/// Write the audit-trail files: installable (and warned) packs in one,
/// blocked packs in the other. Returns both paths.
pub fn write_audit_files(
    user_dir: &Path,
    decisions: &[PackDecision],
) -> Result<(PathBuf, PathBuf), AuditError> {
    fs_err::create_dir_all(user_dir)?;
    let installable: Vec<&PackDecision> = decisions
        .iter()
        .filter(|decision| decision.decision != Decision::Blocked)
        .collect();
    let blocked: Vec<&PackDecision> = decisions
        .iter()
        .filter(|decision| decision.decision == Decision::Blocked)
        .collect();

    let installable_path = user_dir.join(INSTALLABLE_FILE);
    let blocked_path = user_dir.join(INCOMPATIBLE_FILE);
    fs_err::write(&installable_path, serde_json::to_string_pretty(&installable)? + "\n")?;
    fs_err::write(&blocked_path, serde_json::to_string_pretty(&blocked)? + "\n")?;
    debug!(
        "Audit trail written: {} installable, {} blocked",
        installable.len(),
        blocked.len()
    );
    Ok((installable_path, blocked_path))
}

/// Sum the advertised sizes of a batch, counting what the catalog doesn't
/// know.
pub fn size_estimate(items: &[CatalogItem]) -> SizeEstimate {
    let results: Vec<SizeEstimateEntry> = items
        .iter()
        .map(|item| SizeEstimateEntry {
            key: item.ui_key.clone(),
            title: item.title.clone(),
            kb: item.size,
            known: item.size.is_some(),
        })
        .collect();
    let known_count = results.iter().filter(|entry| entry.known).count();
    let total_kb: u64 = results.iter().filter_map(|entry| entry.kb).sum();
    #[allow(clippy::cast_precision_loss)]
    let total_gb = (total_kb as f64 / (1024.0 * 1024.0) * 100.0).round() / 100.0;

    SizeEstimate {
        total: items.len(),
        known_count,
        unknown_count: items.len() - known_count,
        total_kb,
        total_gb,
        results,
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use modusnap_types::{CatalogItem, Decision, HardwareProfile};

    use super::{classify, preflight, size_estimate, write_audit_files};

    fn item(key: &str, title: &str, description: &str) -> CatalogItem {
        CatalogItem {
            ui_key: key.to_string(),
            title: title.to_string(),
            description: description.to_string(),
            ..CatalogItem::default()
        }
    }

    fn no_gpu() -> HardwareProfile {
        HardwareProfile::from_token("darwin-arm64-nvidia:false-rocm:false")
    }

    fn nvidia() -> HardwareProfile {
        HardwareProfile::from_token("linux-x86_64-nvidia:true-rocm:false")
    }

    #[test_case("cuda-only kernels", Decision::Blocked; "cuda only blocks")]
    #[test_case("requires cuda 12", Decision::Blocked; "requires cuda blocks")]
    #[test_case("TensorRT required for speed", Decision::Blocked; "tensorrt required blocks")]
    #[test_case("accelerated with CUDA", Decision::Warning; "bare cuda warns")]
    #[test_case("ships cu121 wheels", Decision::Warning; "cu12 warns")]
    #[test_case("pure python, no accelerators", Decision::Installable; "neutral is installable")]
    fn classification_without_nvidia(description: &str, expected: Decision) {
        let decision = classify(&item("k", "Pack", description), &no_gpu());
        assert_eq!(decision.decision, expected, "{description}");
    }

    #[test]
    fn nvidia_hosts_install_cuda_packs() {
        let decision = classify(&item("k", "Pack", "cuda-only kernels"), &nvidia());
        assert_eq!(decision.decision, Decision::Installable);
        assert!(decision.reasons.is_empty());
    }

    #[test]
    fn blocked_wins_over_warning() {
        // Matches both the blocked rule and the warning rule.
        let decision = classify(&item("k", "Pack", "cuda-only, ships cuda kernels"), &no_gpu());
        assert_eq!(decision.decision, Decision::Blocked);
        assert!(decision.reasons.len() >= 2);
    }

    #[test]
    fn apple_silicon_warns_on_fragile_packs() {
        let decision = classify(&item("k", "Pack", "uses xformers attention"), &no_gpu());
        assert_eq!(decision.decision, Decision::Warning);
    }

    #[test]
    fn preflight_summary_counts() {
        let items = vec![
            item("k1", "CUDA-only Flash Attention", "requires cuda"),
            item("k2", "Standard pack", "pure python"),
        ];
        let report = preflight(&items, &no_gpu(), Some(true));
        assert_eq!(report.summary.total, 2);
        assert_eq!(report.summary.installable, 1);
        assert_eq!(report.summary.warning, 0);
        assert_eq!(report.summary.blocked, 1);
        assert_eq!(report.blocked_keys, vec!["k1".to_string()]);
        assert!(!report.compact);
    }

    #[test]
    fn preflight_compacts_large_batches() {
        let mut items: Vec<CatalogItem> = (0..601)
            .map(|i| item(&format!("k{i}"), "Pack", "pure python"))
            .collect();
        items[0].description = "cuda-only".to_string();
        let report = preflight(&items, &no_gpu(), None);
        assert!(report.compact);
        assert_eq!(report.per_item.len(), 1);
        assert_eq!(report.summary.total, 601);
        assert!(report
            .global_warnings
            .iter()
            .any(|warning| warning.contains("chunked")));
    }

    #[test]
    fn unhealthy_pip_is_a_global_warning() {
        let report = preflight(&[item("k", "Pack", "")], &nvidia(), Some(false));
        assert!(report
            .global_warnings
            .iter()
            .any(|warning| warning.contains("pip conflicts")));
    }

    #[test]
    fn audit_trail_splits_blocked() {
        let dir = tempfile::tempdir().unwrap();
        let decisions = vec![
            classify(&item("k1", "A", "cuda-only"), &no_gpu()),
            classify(&item("k2", "B", "pure python"), &no_gpu()),
        ];
        let (installable, blocked) = write_audit_files(dir.path(), &decisions).unwrap();
        let installable = fs_err::read_to_string(installable).unwrap();
        let blocked = fs_err::read_to_string(blocked).unwrap();
        assert!(installable.contains("k2"));
        assert!(blocked.contains("k1"));
        assert!(!blocked.contains("k2"));
    }

    #[test]
    fn size_estimate_totals() {
        let mut a = item("k1", "A", "");
        a.size = Some(2048);
        let mut b = item("k2", "B", "");
        b.size = Some(1024 * 1024);
        let c = item("k3", "C", "");

        let estimate = size_estimate(&[a, b, c]);
        assert_eq!(estimate.total, 3);
        assert_eq!(estimate.known_count, 2);
        assert_eq!(estimate.unknown_count, 1);
        assert_eq!(estimate.total_kb, 2048 + 1024 * 1024);
        // 1,050,624 KB is 1.002 GB, rounded to two decimals.
        assert!((estimate.total_gb - 1.0).abs() < 1e-9);
    }
}
