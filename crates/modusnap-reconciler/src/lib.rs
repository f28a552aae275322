//! Reconciles the requirement files of every installed extension pack into
//! one installable constraint set, or an explicit conflict report.
//!
//! The pass is pure: enumerate `requirements*.txt` under `custom_nodes/`,
//! parse, group by package, intersect the version specifiers, and emit the
//! compatible/incompatible files plus a structured report. Installation of
//! the compatible set is a separate, single `pip install -r`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;
use walkdir::WalkDir;

use modusnap_types::{DependencyAuditReport, ErrorKind, RequirementConflict};

use crate::intersect::Intersection;
use crate::requirement::{parse_line, LineOutcome, ParsedRequirement};

mod intersect;
mod requirement;

/// Conflicts reported beyond this are counted but not listed.
const MAX_CONFLICTS: usize = 200;

pub const COMPATIBLE_FILE: &str = "modusnap_compatible_requirements.txt";
pub const INCOMPATIBLE_FILE: &str = "modusnap_incompatible_requirements.txt";
pub const REPORT_FILE: &str = "modusnap_dependency_compatibility_report.json";

#[derive(Debug, Error)]
pub enum ReconcilerError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("failed to encode report: {0}")]
    Encode(#[from] serde_json::Error),
}

impl ReconcilerError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Internal
    }
}

/// Enumerate requirement files under `custom_nodes/`, excluding disabled
/// packs. Deterministic order.
fn requirement_files(custom_nodes_dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(custom_nodes_dir)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            let name = entry.file_name().to_string_lossy().to_lowercase();
            name.ends_with(".txt") && name.contains("requirements")
        })
        .filter(|entry| {
            !entry
                .path()
                .components()
                .any(|component| component.as_os_str().to_string_lossy().contains(".disabled"))
        })
        .map(|entry| entry.into_path())
        .collect();
    files.sort();
    files
}

/// Run the reconciliation pass and write the three output files under
/// `user_dir`.
pub fn reconcile(
    custom_nodes_dir: &Path,
    user_dir: &Path,
) -> Result<DependencyAuditReport, ReconcilerError> {
    let files = requirement_files(custom_nodes_dir);
    let mut unparsed = 0usize;
    let mut groups: BTreeMap<String, Vec<ParsedRequirement>> = BTreeMap::new();

    for file in &files {
        let origin = file
            .strip_prefix(custom_nodes_dir)
            .unwrap_or(file)
            .to_string_lossy()
            .into_owned();
        let content = match fs_err::read_to_string(file) {
            Ok(content) => content,
            Err(err) => {
                debug!("Skipping unreadable {}: {err}", file.display());
                continue;
            }
        };
        for line in content.lines() {
            match parse_line(line, &origin) {
                LineOutcome::Requirement(req) => groups.entry(req.name.clone()).or_default().push(req),
                LineOutcome::Skip => {}
                LineOutcome::Unparsed => unparsed += 1,
            }
        }
    }
    if unparsed > 0 {
        debug!("{unparsed} requirement lines could not be parsed");
    }

    let mut compatible_lines = Vec::new();
    let mut incompatible_lines = Vec::new();
    let mut conflicts = Vec::new();

    // BTreeMap iteration gives the stable by-name order the outputs need.
    for (package, entries) in &groups {
        let mut intersection = Intersection::default();
        for entry in entries {
            intersection.add(entry.specifiers.as_ref(), &entry.raw_spec);
        }
        match intersection.resolve() {
            Ok(specifier) => compatible_lines.push(format!("{package}{specifier}")),
            Err(reasons) => {
                let specs: Vec<String> = entries
                    .iter()
                    .map(|entry| {
                        if entry.raw_spec.is_empty() {
                            format!("{} (unconstrained)", entry.origin)
                        } else {
                            format!("{} ({})", entry.raw_spec, entry.origin)
                        }
                    })
                    .collect();
                incompatible_lines.push(format!(
                    "{package} :: {} :: {}",
                    specs.join(" | "),
                    reasons.join("; ")
                ));
                if conflicts.len() < MAX_CONFLICTS {
                    conflicts.push(RequirementConflict {
                        package: package.clone(),
                        specs,
                        markers: entries.iter().filter_map(|e| e.marker.clone()).collect(),
                        reasons,
                    });
                }
            }
        }
    }

    fs_err::create_dir_all(user_dir)?;
    let compatible_requirements_path = user_dir.join(COMPATIBLE_FILE);
    let incompatible_requirements_path = user_dir.join(INCOMPATIBLE_FILE);
    let report_path = user_dir.join(REPORT_FILE);

    fs_err::write(&compatible_requirements_path, join_lines(&compatible_lines))?;
    fs_err::write(&incompatible_requirements_path, join_lines(&incompatible_lines))?;

    let report = DependencyAuditReport {
        files_scanned: files.len(),
        packages_scanned: groups.len(),
        compatible_requirement_count: compatible_lines.len(),
        conflicts,
        compatible_requirements_path,
        incompatible_requirements_path,
        report_path: report_path.clone(),
    };
    fs_err::write(&report_path, serde_json::to_string_pretty(&report)? + "\n")?;

    Ok(report)
}

fn join_lines(lines: &[String]) -> String {
    if lines.is_empty() {
        return String::new();
    }
    let mut joined = lines.join("\n");
    joined.push('\n');
    joined
}
