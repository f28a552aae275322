use jiff::Timestamp;
use serde::{Deserialize, Serialize};

use crate::audit::CatalogAuditSummary;

/// One installed package pin, as reported by `pip list --format=json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinnedPackage {
    pub name: String,
    pub version: String,
}

/// The verified dependency state captured alongside a compatibility set.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyLock {
    pub python: Option<String>,
    #[serde(default)]
    pub pkgs: Vec<PinnedPackage>,
    pub manager_version: Option<String>,
    pub git_commit: Option<String>,
}

/// A freeze snapshot of the virtualenv, keyed per hardware profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub id: String,
    pub hardware_profile: String,
    pub created_at: Timestamp,
    pub freeze_list_path: std::path::PathBuf,
    pub dependency_lock: DependencyLock,
}

/// A package whose specifier intersection came up empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequirementConflict {
    pub package: String,
    pub specs: Vec<String>,
    pub markers: Vec<String>,
    pub reasons: Vec<String>,
}

/// Structured output of one dependency reconciliation pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyAuditReport {
    pub files_scanned: usize,
    pub packages_scanned: usize,
    pub conflicts: Vec<RequirementConflict>,
    pub compatible_requirement_count: usize,
    pub compatible_requirements_path: std::path::PathBuf,
    pub incompatible_requirements_path: std::path::PathBuf,
    pub report_path: std::path::PathBuf,
}

/// The guard record install sessions check before touching the venv: a
/// snapshot of hardware profile, verified dependency state, normalized
/// constraint set, and audited pack classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompatibilitySet {
    pub lock_id: String,
    pub created_at: Timestamp,
    pub hardware_profile: String,
    pub pip_healthy: bool,
    pub pip_check_output: String,
    #[serde(default)]
    pub selected_pack_keys: Vec<String>,
    #[serde(default)]
    pub selected_pack_ids: Vec<String>,
    pub dependency_lock: DependencyLock,
    pub dependency_audit: Option<DependencyAuditReport>,
    pub catalog_audit: Option<CatalogAuditSummary>,
}

impl CompatibilitySet {
    /// How long a set stays fresh before install sessions rebuild it.
    pub const MAX_AGE_SECS: i64 = 15 * 60;

    /// Whether this set still guards installs for the given profile.
    pub fn is_fresh(&self, now: Timestamp, profile_token: &str) -> bool {
        self.pip_healthy
            && self.hardware_profile == profile_token
            && now.as_second().saturating_sub(self.created_at.as_second()) < Self::MAX_AGE_SECS
    }
}

#[cfg(test)]
mod tests {
    use jiff::Timestamp;

    use super::{CompatibilitySet, DependencyLock};

    fn set_at(created_at: Timestamp) -> CompatibilitySet {
        CompatibilitySet {
            lock_id: "lock1".to_string(),
            created_at,
            hardware_profile: "linux-x86_64-nvidia:true-rocm:false".to_string(),
            pip_healthy: true,
            pip_check_output: String::new(),
            selected_pack_keys: vec![],
            selected_pack_ids: vec![],
            dependency_lock: DependencyLock::default(),
            dependency_audit: None,
            catalog_audit: None,
        }
    }

    #[test]
    fn fresh_within_fifteen_minutes() {
        let now = Timestamp::new(1_700_000_000, 0).unwrap();
        let set = set_at(Timestamp::new(1_700_000_000 - 60, 0).unwrap());
        assert!(set.is_fresh(now, "linux-x86_64-nvidia:true-rocm:false"));
    }

    #[test]
    fn stale_after_fifteen_minutes() {
        let now = Timestamp::new(1_700_000_000, 0).unwrap();
        let set = set_at(Timestamp::new(1_700_000_000 - 16 * 60, 0).unwrap());
        assert!(!set.is_fresh(now, "linux-x86_64-nvidia:true-rocm:false"));
    }

    #[test]
    fn profile_change_invalidates() {
        let now = Timestamp::new(1_700_000_000, 0).unwrap();
        let set = set_at(now);
        assert!(!set.is_fresh(now, "darwin-arm64-nvidia:false-rocm:false"));
    }

    #[test]
    fn unhealthy_pip_invalidates() {
        let now = Timestamp::new(1_700_000_000, 0).unwrap();
        let mut set = set_at(now);
        set.pip_healthy = false;
        assert!(!set.is_fresh(now, "linux-x86_64-nvidia:true-rocm:false"));
    }
}
