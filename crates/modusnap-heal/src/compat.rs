use std::time::Duration;

use jiff::Timestamp;
use nanoid::nanoid;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use modusnap_client::EngineClient;
use modusnap_locator::BackendLocation;
use modusnap_store::CompatSetStore;
use modusnap_subprocess::VenvRunner;
use modusnap_types::{
    CatalogAuditSummary, CompatibilitySet, DependencyLock, EnvStep, PinnedPackage,
};

use crate::autoheal::auto_heal;
use crate::error::HealError;
use crate::step::record_step;

const GIT_TIMEOUT: Duration = Duration::from_secs(5);
const VERSION_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompatPipelineOutcome {
    pub compatibility_set: CompatibilitySet,
    pub steps: Vec<EnvStep>,
    pub auto_healed: bool,
    pub removed: Vec<String>,
}

/// Selection carried into the persisted set.
#[derive(Debug, Clone, Default)]
pub struct Selection {
    pub pack_keys: Vec<String>,
    pub pack_ids: Vec<String>,
}

/// Rebuild the compatibility set: baseline installs, dependency
/// reconciliation, compatible-set install, verification with AutoHeal on
/// failure, dependency lock collection, persistence.
pub async fn build_compatibility_set(
    location: &BackendLocation,
    runner: &VenvRunner,
    client: Option<&EngineClient>,
    selection: Selection,
    catalog_audit: Option<CatalogAuditSummary>,
) -> Result<CompatPipelineOutcome, HealError> {
    let mut steps = Vec::new();

    for baseline in [location.requirements(), location.manager_requirements()] {
        let started = Timestamp::now();
        let record = runner.pip_install_requirements(&baseline).await;
        steps.push(record_step(
            format!("python -m pip install -r {}", baseline.display()),
            started,
            &record,
        ));
    }

    let audit = modusnap_reconciler::reconcile(&location.custom_nodes_dir, &location.user_dir)?;
    if audit.compatible_requirement_count > 0 {
        let started = Timestamp::now();
        let record = runner
            .pip_install_requirements(&audit.compatible_requirements_path)
            .await;
        steps.push(record_step(
            format!(
                "python -m pip install -r {}",
                audit.compatible_requirements_path.display()
            ),
            started,
            &record,
        ));
    }

    let started = Timestamp::now();
    let mut check = runner.pip_check().await;
    steps.push(record_step("python -m pip check", started, &check));

    let mut auto_healed = false;
    let mut removed = Vec::new();
    if !check.ok {
        info!("pip check failed after compat install; entering AutoHeal");
        let outcome = auto_heal(runner, location).await;
        auto_healed = true;
        removed = outcome.removed.clone();
        steps.extend(outcome.steps);
        check = modusnap_subprocess::ExecRecord {
            exit_status: Some(i32::from(!outcome.healthy)),
            ok: outcome.healthy,
            output: outcome.pip_check_output,
        };
    }

    let dependency_lock = collect_dependency_lock(location, runner, client).await;

    let set = CompatibilitySet {
        lock_id: nanoid!(),
        created_at: Timestamp::now(),
        hardware_profile: location.hardware_profile().token,
        pip_healthy: check.ok,
        pip_check_output: check.output,
        selected_pack_keys: selection.pack_keys,
        selected_pack_ids: selection.pack_ids,
        dependency_lock,
        dependency_audit: Some(audit),
        catalog_audit,
    };

    CompatSetStore::new(&location.user_dir).save(&set)?;
    if set.pip_healthy {
        if let Err(err) = fs_err::write(
            location.dependency_sync_marker(),
            format!("{}\n", set.created_at),
        ) {
            debug!("Failed to touch dependency sync marker: {err}");
        }
    }

    Ok(CompatPipelineOutcome {
        compatibility_set: set,
        steps,
        auto_healed,
        removed,
    })
}

/// Capture the verified dependency state: interpreter version, installed
/// pins, manager version, engine commit. All best-effort.
async fn collect_dependency_lock(
    location: &BackendLocation,
    runner: &VenvRunner,
    client: Option<&EngineClient>,
) -> DependencyLock {
    let python = {
        let record = runner
            .probe(
                "import sys; print('.'.join(map(str, sys.version_info[:3])))",
                VERSION_PROBE_TIMEOUT,
            )
            .await;
        record.ok.then(|| record.output.trim().to_string())
    };

    let pkgs = {
        let record = runner.pip_list_json().await;
        if record.ok {
            serde_json::from_str::<Vec<PinnedPackage>>(record.output.trim()).unwrap_or_default()
        } else {
            Vec::new()
        }
    };

    let manager_version = match client {
        Some(client) => client.manager_version().await.ok().map(|v| v.trim().to_string()),
        None => None,
    };

    let git_commit = engine_commit(location).await;

    DependencyLock {
        python,
        pkgs,
        manager_version,
        git_commit,
    }
}

async fn engine_commit(location: &BackendLocation) -> Option<String> {
    let output = tokio::time::timeout(
        GIT_TIMEOUT,
        tokio::process::Command::new("git")
            .args(["rev-parse", "HEAD"])
            .current_dir(&location.backend_dir)
            .output(),
    )
    .await
    .ok()?
    .ok()?;
    if !output.status.success() {
        return None;
    }
    let commit = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!commit.is_empty()).then_some(commit)
}
