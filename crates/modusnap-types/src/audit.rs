use serde::{Deserialize, Serialize};

/// Classification of a catalog item against the current hardware profile.
///
/// Ordered by severity so that the strictest matched rule wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Installable,
    Warning,
    Blocked,
}

/// Per-item output of the compatibility audit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackDecision {
    pub key: String,
    pub title: String,
    pub decision: Decision,
    pub reasons: Vec<String>,
}

/// Aggregate counts over one audited batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogAuditSummary {
    pub total: usize,
    pub installable: usize,
    pub warning: usize,
    pub blocked: usize,
}

/// The preflight report returned before any disk or install activity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreflightReport {
    #[serde(flatten)]
    pub summary: CatalogAuditSummary,
    pub blocked_keys: Vec<String>,
    pub global_warnings: Vec<String>,
    /// Compressed to non-installable items only when the batch exceeds 600
    /// entries; `compact` records that the compression happened.
    pub per_item: Vec<PackDecision>,
    pub compact: bool,
}

/// One line of the size estimate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SizeEstimateEntry {
    pub key: String,
    pub title: String,
    pub kb: Option<u64>,
    pub known: bool,
}

/// Response shape of `manager.sizeEstimate`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SizeEstimate {
    pub total: usize,
    pub known_count: usize,
    pub unknown_count: usize,
    pub total_kb: u64,
    pub total_gb: f64,
    pub results: Vec<SizeEstimateEntry>,
}

#[cfg(test)]
mod tests {
    use super::Decision;

    #[test]
    fn decision_precedence_is_total() {
        assert!(Decision::Blocked > Decision::Warning);
        assert!(Decision::Warning > Decision::Installable);
    }
}
