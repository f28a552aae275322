use std::collections::BTreeSet;
use std::path::Path;

use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use modusnap_locator::BackendLocation;
use modusnap_subprocess::VenvRunner;
use modusnap_types::EnvStep;

use crate::extract::{extract_conflict_parents, extract_spec_hints};
use crate::recipes::match_recipe;
use crate::step::record_step;

/// Heal rounds before giving up.
const MAX_ROUNDS: u32 = 6;
/// Prune rounds before giving up.
const MAX_PRUNE_ROUNDS: u32 = 6;

/// Packages never removed by the prune pass, beyond whatever the baseline
/// requirement files name.
const PROTECTED_PACKAGES: &[&str] = &[
    "pip",
    "setuptools",
    "wheel",
    "torch",
    "torchvision",
    "torchaudio",
    "comfyui-manager",
    "comfyui_frontend_package",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoHealOutcome {
    pub healthy: bool,
    pub rounds: u32,
    pub prune_rounds: u32,
    pub steps: Vec<EnvStep>,
    /// Conflicting parents removed by the prune pass.
    pub removed: Vec<String>,
    pub pip_check_output: String,
}

/// Names declared in a requirements file, for the protected set.
fn requirement_names(path: &Path) -> BTreeSet<String> {
    let Ok(content) = fs_err::read_to_string(path) else {
        return BTreeSet::new();
    };
    content
        .lines()
        .filter_map(|line| {
            let line = line.split('#').next().unwrap_or_default().trim();
            if line.is_empty() || line.starts_with('-') {
                return None;
            }
            let name: String = line
                .chars()
                .take_while(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
                .collect();
            (!name.is_empty()).then(|| name.to_lowercase())
        })
        .collect()
}

fn protected_set(location: &BackendLocation) -> BTreeSet<String> {
    let mut protected: BTreeSet<String> =
        PROTECTED_PACKAGES.iter().map(ToString::to_string).collect();
    protected.extend(requirement_names(&location.requirements()));
    protected.extend(requirement_names(&location.manager_requirements()));
    protected.extend(requirement_names(
        &location.user_dir.join(modusnap_reconciler::COMPATIBLE_FILE),
    ));
    protected
}

/// Drive `pip check` to green: canned recipes and extracted-spec installs
/// for up to six rounds with a fixed-point exit, then conflict pruning.
pub async fn auto_heal(runner: &VenvRunner, location: &BackendLocation) -> AutoHealOutcome {
    let mut steps = Vec::new();
    let mut removed = Vec::new();
    let mut rounds = 0u32;
    let mut prune_rounds = 0u32;
    let mut seen_spec_sets: Vec<BTreeSet<String>> = Vec::new();

    let mut check = {
        let started = Timestamp::now();
        let record = runner.pip_check().await;
        steps.push(record_step("python -m pip check", started, &record));
        record
    };

    while rounds < MAX_ROUNDS && !check.ok {
        rounds += 1;
        let hints = extract_spec_hints(&check.output);
        if seen_spec_sets.contains(&hints) {
            debug!("AutoHeal fixed point: same required-spec set observed twice");
            break;
        }
        seen_spec_sets.push(hints.clone());

        if let Some(recipe) = match_recipe(&check.output) {
            info!("AutoHeal round {rounds}: applying recipe {}", recipe.name);
            for args in recipe.steps {
                let started = Timestamp::now();
                let record = runner.pip_install(args, false).await;
                steps.push(record_step(
                    format!("python -m pip install {}", args.join(" ")),
                    started,
                    &record,
                ));
            }
        } else if hints.is_empty() {
            debug!("AutoHeal round {rounds}: nothing extractable from pip check output");
            break;
        } else {
            info!("AutoHeal round {rounds}: installing {} extracted specs", hints.len());
            for hint in &hints {
                let started = Timestamp::now();
                let record = runner.pip_install(&[hint.as_str()], false).await;
                steps.push(record_step(
                    format!("python -m pip install {hint}"),
                    started,
                    &record,
                ));
            }
        }

        let started = Timestamp::now();
        check = runner.pip_check().await;
        steps.push(record_step("python -m pip check", started, &check));
    }

    // No progress and still dirty: remove the complaining parents that
    // nothing protects, reinstall the baselines, re-verify.
    if !check.ok {
        let protected = protected_set(location);
        while prune_rounds < MAX_PRUNE_ROUNDS && !check.ok {
            prune_rounds += 1;
            let removable: Vec<String> = extract_conflict_parents(&check.output)
                .into_iter()
                .filter(|parent| !protected.contains(parent) && !removed.contains(parent))
                .collect();
            if removable.is_empty() {
                debug!("Prune round {prune_rounds}: nothing removable");
                break;
            }

            info!("Prune round {prune_rounds}: removing {}", removable.join(", "));
            let args: Vec<&str> = removable.iter().map(String::as_str).collect();
            let started = Timestamp::now();
            let record = runner.pip_uninstall(&args).await;
            steps.push(record_step(
                format!("python -m pip uninstall -y {}", removable.join(" ")),
                started,
                &record,
            ));
            removed.extend(removable);

            for baseline in [
                location.requirements(),
                location.manager_requirements(),
                location.user_dir.join(modusnap_reconciler::COMPATIBLE_FILE),
            ] {
                if !baseline.is_file() {
                    continue;
                }
                let started = Timestamp::now();
                let record = runner.pip_install_requirements(&baseline).await;
                steps.push(record_step(
                    format!("python -m pip install -r {}", baseline.display()),
                    started,
                    &record,
                ));
            }

            let started = Timestamp::now();
            check = runner.pip_check().await;
            steps.push(record_step("python -m pip check", started, &check));
        }
    }

    AutoHealOutcome {
        healthy: check.ok,
        rounds,
        prune_rounds,
        steps,
        removed,
        pip_check_output: check.output,
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;

    use modusnap_locator::locate;
    use modusnap_subprocess::VenvRunner;

    use super::{auto_heal, protected_set, requirement_names};

    /// Counts pip check invocations in `checks.log`; turns healthy once
    /// `HEAL_AFTER` invocations have happened (never, when 99).
    const FAKE_PYTHON: &str = r#"#!/bin/sh
here="$(dirname "$0")"
case "$*" in
  *"pip check"*)
    count=$(cat "$here/checks.log" 2>/dev/null || echo 0)
    count=$((count + 1))
    echo "$count" > "$here/checks.log"
    threshold=$(cat "$here/HEAL_AFTER" 2>/dev/null || echo 99)
    if [ "$count" -gt "$threshold" ]; then
      echo "No broken requirements found."
      exit 0
    fi
    echo "torchsde 0.2.6 has requirement torch>=2.5, but you have torch 2.4.0."
    exit 1
    ;;
  *"pip uninstall"*)
    echo "uninstalled: $*" >> "$here/uninstalls.log"
    ;;
  *"pip install"*)
    echo "installed: $*" >> "$here/installs.log"
    ;;
esac
exit 0
"#;

    fn seed(dir: &Path, heal_after: Option<u32>) -> (VenvRunner, modusnap_locator::BackendLocation) {
        fs_err::write(dir.join("main.py"), "\n").unwrap();
        fs_err::write(dir.join("requirements.txt"), "torch\npillow\n").unwrap();
        fs_err::write(dir.join("manager_requirements.txt"), "rich\n").unwrap();
        let bin = dir.join("venv").join("bin");
        fs_err::create_dir_all(&bin).unwrap();
        let python = bin.join("python");
        fs_err::write(&python, FAKE_PYTHON).unwrap();
        let mut perms = fs_err::metadata(&python).unwrap().permissions();
        perms.set_mode(0o755);
        fs_err::set_permissions(&python, perms).unwrap();
        if let Some(threshold) = heal_after {
            fs_err::write(bin.join("HEAL_AFTER"), threshold.to_string()).unwrap();
        }
        let location = locate(Some(dir)).unwrap();
        (VenvRunner::new(&location.venv_python, &location.backend_dir), location)
    }

    #[tokio::test]
    async fn heals_when_the_check_goes_green() {
        let dir = tempfile::tempdir().unwrap();
        // Dirty on the first check, green on the second.
        let (runner, location) = seed(dir.path(), Some(1));
        let outcome = auto_heal(&runner, &location).await;
        assert!(outcome.healthy);
        assert_eq!(outcome.rounds, 1);
        assert_eq!(outcome.prune_rounds, 0);
        assert!(outcome.removed.is_empty());
        // The extracted spec was installed.
        let installs = fs_err::read_to_string(dir.path().join("venv/bin/installs.log")).unwrap();
        assert!(installs.contains("torch>=2.5"));
    }

    #[tokio::test]
    async fn fixed_point_stops_repeat_rounds_then_prunes() {
        let dir = tempfile::tempdir().unwrap();
        // Never heals: the same spec set repeats.
        let (runner, location) = seed(dir.path(), None);
        let outcome = auto_heal(&runner, &location).await;
        assert!(!outcome.healthy);
        // Round 1 installs; round 2 sees the same set and exits.
        assert_eq!(outcome.rounds, 2);
        // torchsde is not protected, so the first prune round removes it;
        // the second round finds nothing removable and stops.
        assert_eq!(outcome.removed, vec!["torchsde".to_string()]);
        assert_eq!(outcome.prune_rounds, 2);
        let uninstalls = fs_err::read_to_string(dir.path().join("venv/bin/uninstalls.log")).unwrap();
        assert!(uninstalls.contains("torchsde"));
    }

    #[tokio::test]
    async fn protected_packages_survive_pruning() {
        let dir = tempfile::tempdir().unwrap();
        let (_, location) = seed(dir.path(), None);
        let protected = protected_set(&location);
        assert!(protected.contains("torch"));
        assert!(protected.contains("pip"));
        // From requirements.txt.
        assert!(protected.contains("pillow"));
        // From manager_requirements.txt.
        assert!(protected.contains("rich"));
    }

    #[test]
    fn requirement_names_strips_specifiers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("requirements.txt");
        fs_err::write(&path, "Torch==2.4.0\nscipy~=1.15.3 ; python_version >= '3.9'\n# note\n-r other.txt\n").unwrap();
        let names = requirement_names(&path);
        assert!(names.contains("torch"));
        assert!(names.contains("scipy"));
        assert_eq!(names.len(), 2);
    }
}
