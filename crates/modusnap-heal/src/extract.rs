use std::collections::BTreeSet;

use once_cell::sync::Lazy;
use regex::Regex;

/// `pkg 1.0 has requirement foo<2.0, but you have foo 2.1.`
static HAS_REQUIREMENT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?m)^\s*(?P<parent>[A-Za-z0-9][A-Za-z0-9._-]*)\s+\S+\s+has requirement\s+(?P<spec>[^,]+),\s+but you have",
    )
    .unwrap()
});

/// `pkg 1.0 requires bar, which is not installed.`
static REQUIRES_MISSING_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?m)^\s*(?P<parent>[A-Za-z0-9][A-Za-z0-9._-]*)\s+\S+\s+requires\s+(?P<spec>[^,]+),\s+which is not installed",
    )
    .unwrap()
});

/// The specifiers `pip check` says are required. Sorted, so two rounds can
/// be compared for the fixed-point exit.
pub(crate) fn extract_spec_hints(output: &str) -> BTreeSet<String> {
    let mut specs = BTreeSet::new();
    for captures in HAS_REQUIREMENT_RE.captures_iter(output) {
        specs.insert(captures["spec"].trim().to_string());
    }
    for captures in REQUIRES_MISSING_RE.captures_iter(output) {
        specs.insert(captures["spec"].trim().to_string());
    }
    specs
}

/// The packages `pip check` names as the complaining parents; prune
/// candidates.
pub(crate) fn extract_conflict_parents(output: &str) -> BTreeSet<String> {
    let mut parents = BTreeSet::new();
    for captures in HAS_REQUIREMENT_RE.captures_iter(output) {
        parents.insert(captures["parent"].to_lowercase());
    }
    for captures in REQUIRES_MISSING_RE.captures_iter(output) {
        parents.insert(captures["parent"].to_lowercase());
    }
    parents
}
