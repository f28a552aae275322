use std::path::PathBuf;
use std::time::Duration;

use jiff::Timestamp;
use nanoid::nanoid;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use modusnap_locator::BackendLocation;
use modusnap_store::{SnapshotService, TxStore};
use modusnap_subprocess::{ExecRecord, VenvRunner, INSTALL_TIMEOUT, PROBE_TIMEOUT};
use modusnap_types::{evaluate_policy, EnvStep, EnvTx, EnvTxSummary, PolicyTier, TxKind, TxStatus};

use crate::error::EnvError;
use crate::sanitize::sanitize_packages;

/// Response shape of `env.status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvStatus {
    pub ok: bool,
    pub backend_dir: PathBuf,
    pub venv_exists: bool,
    pub pip_healthy: Option<bool>,
    pub pip_check_output: Option<String>,
    pub transactions: usize,
    pub latest_transaction: Option<EnvTxSummary>,
}

fn status_label(status: TxStatus) -> &'static str {
    match status {
        TxStatus::Planned => "planned",
        TxStatus::Running => "running",
        TxStatus::Succeeded => "succeeded",
        TxStatus::Failed => "failed",
        TxStatus::RolledBack => "rolled_back",
    }
}

/// Plan → apply → verify → rollback over one backend's virtualenv.
#[derive(Debug, Clone)]
pub struct TxEngine {
    location: BackendLocation,
    runner: VenvRunner,
    store: TxStore,
    snapshots: SnapshotService,
    tier: PolicyTier,
}

impl TxEngine {
    pub fn new(location: BackendLocation, tier: PolicyTier) -> Self {
        let runner = VenvRunner::new(&location.venv_python, &location.backend_dir);
        let store = TxStore::new(&location.user_dir);
        let snapshots = SnapshotService::new(&location.user_dir);
        Self {
            location,
            runner,
            store,
            snapshots,
            tier,
        }
    }

    pub fn store(&self) -> &TxStore {
        &self.store
    }

    pub fn runner(&self) -> &VenvRunner {
        &self.runner
    }

    /// Create a planned transaction. Policies gate before anything else.
    pub fn create_plan(
        &self,
        kind: TxKind,
        packages: &[String],
        policies: &[String],
    ) -> Result<EnvTx, EnvError> {
        if kind == TxKind::Rollback {
            return Err(EnvError::InvalidArg(
                "rollback transactions are created via env.rollback".to_string(),
            ));
        }
        let decision = evaluate_policy(self.tier, policies);
        if !decision.allowed {
            return Err(EnvError::PolicyViolation {
                violations: decision.violations,
            });
        }

        let requested_packages = sanitize_packages(packages);
        let mut plan_commands = vec![
            "python -m pip install -r requirements.txt".to_string(),
            "python -m pip install -r manager_requirements.txt".to_string(),
        ];
        if kind == TxKind::Install && !requested_packages.is_empty() {
            plan_commands.push(format!(
                "python -m pip install {}",
                requested_packages.join(" ")
            ));
        }
        plan_commands.push("python -m pip check".to_string());

        let now = Timestamp::now();
        let tx = EnvTx {
            id: nanoid!(),
            kind,
            status: TxStatus::Planned,
            created_at: now,
            updated_at: now,
            requested_packages,
            plan_commands,
            steps: vec![],
            snapshot_before: None,
            snapshot_after: None,
            pip_healthy: None,
            pip_check_output: None,
            rollback_of: None,
            error: None,
        };
        self.store.create(tx.clone())?;
        Ok(tx)
    }

    /// Execute a planned (or failed) transaction. Every planned step runs
    /// even after failures, so the final `pip check` sees the combined
    /// state; the transaction is persisted after each step.
    pub async fn apply(&self, id: &str) -> Result<EnvTx, EnvError> {
        let mut tx = self.store.get(id).ok_or_else(|| EnvError::NotFound(id.to_string()))?;
        if !tx.status.is_applicable() {
            return Err(EnvError::Conflict {
                id: tx.id,
                action: "apply",
                state: status_label(tx.status).to_string(),
            });
        }

        tx.status = TxStatus::Running;
        tx.error = None;
        tx.updated_at = Timestamp::now();
        self.store.update(&tx)?;

        tx.snapshot_before = self.take_freeze(&format!("{id}-before")).await;
        self.store.update(&tx)?;

        let mut commands: Vec<(String, Vec<String>)> = vec![
            step_args(&["install", "-r", "requirements.txt"]),
            step_args(&["install", "-r", "manager_requirements.txt"]),
        ];
        if tx.kind == TxKind::Install && !tx.requested_packages.is_empty() {
            let mut args = vec!["install".to_string()];
            args.extend(tx.requested_packages.iter().cloned());
            commands.push((
                format!("python -m pip install {}", tx.requested_packages.join(" ")),
                args,
            ));
        }
        for (command, args) in commands {
            self.run_step(&mut tx, &command, &args, INSTALL_TIMEOUT).await?;
        }

        let healthy = self.finish_with_check(&mut tx).await?;
        tx.status = if healthy {
            TxStatus::Succeeded
        } else {
            TxStatus::Failed
        };
        if !healthy {
            tx.error = Some(if self.runner.exists() {
                "pip check reported broken requirements".to_string()
            } else {
                "virtualenv missing".to_string()
            });
        }

        tx.snapshot_after = self.take_freeze(&format!("{id}-after")).await;
        tx.updated_at = Timestamp::now();
        self.store.update(&tx)?;
        Ok(tx)
    }

    /// Undo a transaction from its before-freeze: a new linked transaction
    /// that reinstalls the snapshot and verifies.
    pub async fn rollback(&self, id: &str) -> Result<EnvTx, EnvError> {
        let original = self.store.get(id).ok_or_else(|| EnvError::NotFound(id.to_string()))?;
        let Some(snapshot_before) = original.snapshot_before.clone() else {
            return Err(EnvError::Conflict {
                id: original.id,
                action: "rollback",
                state: "missing its before-snapshot".to_string(),
            });
        };
        if !snapshot_before.is_file() {
            return Err(EnvError::Conflict {
                id: original.id,
                action: "rollback",
                state: format!("snapshot {} no longer on disk", snapshot_before.display()),
            });
        }

        let now = Timestamp::now();
        let snapshot_arg = snapshot_before.to_string_lossy().into_owned();
        let mut tx = EnvTx {
            id: nanoid!(),
            kind: TxKind::Rollback,
            status: TxStatus::Planned,
            created_at: now,
            updated_at: now,
            requested_packages: vec![],
            plan_commands: vec![
                format!("python -m pip install -r {snapshot_arg}"),
                "python -m pip check".to_string(),
            ],
            steps: vec![],
            snapshot_before: None,
            snapshot_after: None,
            pip_healthy: None,
            pip_check_output: None,
            rollback_of: Some(original.id),
            error: None,
        };
        self.store.create(tx.clone())?;

        tx.status = TxStatus::Running;
        tx.updated_at = Timestamp::now();
        self.store.update(&tx)?;

        let (command, args) = (
            format!("python -m pip install -r {snapshot_arg}"),
            vec![
                "install".to_string(),
                "-r".to_string(),
                snapshot_arg.clone(),
            ],
        );
        self.run_step(&mut tx, &command, &args, INSTALL_TIMEOUT).await?;

        let healthy = self.finish_with_check(&mut tx).await?;
        tx.status = if healthy {
            TxStatus::RolledBack
        } else {
            TxStatus::Failed
        };
        if !healthy {
            tx.error = Some("rollback verification failed".to_string());
        }
        tx.updated_at = Timestamp::now();
        self.store.update(&tx)?;
        Ok(tx)
    }

    pub async fn status(&self) -> EnvStatus {
        let venv_exists = self.runner.exists();
        let (pip_healthy, pip_check_output) = if venv_exists {
            let record = self.runner.pip_check().await;
            (Some(record.ok), Some(record.output))
        } else {
            (None, None)
        };
        EnvStatus {
            ok: venv_exists && pip_healthy.unwrap_or(false),
            backend_dir: self.location.backend_dir.clone(),
            venv_exists,
            pip_healthy,
            pip_check_output,
            transactions: self.store.count(),
            latest_transaction: self.store.latest().map(|tx| tx.summary()),
        }
    }

    pub fn list(&self) -> Vec<EnvTxSummary> {
        self.store.list().iter().map(EnvTx::summary).collect()
    }

    pub fn get(&self, id: &str) -> Result<EnvTx, EnvError> {
        self.store.get(id).ok_or_else(|| EnvError::NotFound(id.to_string()))
    }

    /// Run one pip step, with the virtualenv-missing short circuit, and
    /// persist the transaction afterwards.
    async fn run_step(
        &self,
        tx: &mut EnvTx,
        command: &str,
        args: &[String],
        timeout: Duration,
    ) -> Result<bool, EnvError> {
        let started_at = Timestamp::now();
        let record = if self.runner.exists() {
            let mut full: Vec<&str> = vec!["-m", "pip"];
            full.extend(args.iter().map(String::as_str));
            self.runner.run(&full, timeout).await
        } else {
            ExecRecord::synthetic("virtualenv interpreter missing; step skipped")
        };
        if !record.ok {
            warn!("Step failed: {command}");
        }
        let ok = record.ok;
        tx.steps.push(EnvStep {
            id: nanoid!(),
            command: command.to_string(),
            started_at,
            finished_at: Timestamp::now(),
            exit_status: record.exit_status,
            ok,
            output: record.output,
        });
        tx.updated_at = Timestamp::now();
        self.store.update(tx)?;
        Ok(ok)
    }

    /// The closing `pip check` step; sets the verification fields.
    async fn finish_with_check(&self, tx: &mut EnvTx) -> Result<bool, EnvError> {
        let healthy = self
            .run_step(
                tx,
                "python -m pip check",
                &["check".to_string()],
                PROBE_TIMEOUT,
            )
            .await?;
        let check = tx.steps.last().expect("check step was just recorded");
        tx.pip_healthy = Some(healthy);
        tx.pip_check_output = Some(check.output.clone());
        Ok(healthy)
    }

    async fn take_freeze(&self, tag: &str) -> Option<PathBuf> {
        if !self.runner.exists() {
            return None;
        }
        let record = self.runner.pip_freeze().await;
        if !record.ok {
            debug!("pip freeze failed, proceeding without snapshot: {}", record.output);
            return None;
        }
        match self.snapshots.write_freeze(tag, &record.output) {
            Ok(path) => Some(path),
            Err(err) => {
                warn!("Failed to store freeze snapshot: {err}");
                None
            }
        }
    }
}

fn step_args(pip_args: &[&str]) -> (String, Vec<String>) {
    let command = format!("python -m pip {}", pip_args.join(" "));
    (command, pip_args.iter().map(ToString::to_string).collect())
}

#[cfg(all(test, unix))]
mod tests {
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;

    use modusnap_locator::locate;
    use modusnap_types::{PolicyTier, TxKind, TxStatus};

    use super::TxEngine;
    use crate::error::EnvError;

    /// A stand-in interpreter that answers the pip subcommands the engine
    /// uses. `pip check` honors a `PIPCHECK_FAIL` marker file next to it.
    const FAKE_PYTHON: &str = r#"#!/bin/sh
here="$(dirname "$0")"
case "$*" in
  *"pip freeze"*)
    echo "pillow==10.0.0"
    echo "torch==2.4.0"
    ;;
  *"pip check"*)
    if [ -f "$here/PIPCHECK_FAIL" ]; then
      echo "torchsde 0.2.6 has requirement torch>=2.5, but you have torch 2.4.0."
      exit 1
    fi
    echo "No broken requirements found."
    ;;
  *"pip install"*)
    echo "ok: $*"
    ;;
esac
exit 0
"#;

    fn seed_backend(dir: &Path, venv: bool) {
        fs_err::write(dir.join("main.py"), "\n").unwrap();
        fs_err::write(dir.join("requirements.txt"), "torch\n").unwrap();
        fs_err::write(dir.join("manager_requirements.txt"), "rich\n").unwrap();
        if venv {
            let bin = dir.join("venv").join("bin");
            fs_err::create_dir_all(&bin).unwrap();
            let python = bin.join("python");
            fs_err::write(&python, FAKE_PYTHON).unwrap();
            let mut perms = fs_err::metadata(&python).unwrap().permissions();
            perms.set_mode(0o755);
            fs_err::set_permissions(&python, perms).unwrap();
        }
    }

    fn engine(dir: &Path, venv: bool) -> TxEngine {
        seed_backend(dir, venv);
        TxEngine::new(locate(Some(dir)).unwrap(), PolicyTier::Free)
    }

    #[tokio::test]
    async fn plan_then_apply_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path(), true);

        let tx = engine.create_plan(TxKind::Repair, &[], &[]).unwrap();
        assert_eq!(tx.status, TxStatus::Planned);
        assert_eq!(tx.plan_commands.len(), 3);

        let tx = engine.apply(&tx.id).await.unwrap();
        assert_eq!(tx.status, TxStatus::Succeeded);
        assert_eq!(tx.pip_healthy, Some(true));
        assert!(tx.snapshot_before.is_some());
        assert!(tx.snapshot_after.is_some());
        assert!(tx.steps.len() >= 3);
        assert!(tx.steps.iter().all(|step| step.ok));
    }

    #[tokio::test]
    async fn bad_specifiers_are_dropped_from_the_plan() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path(), true);

        let tx = engine
            .create_plan(
                TxKind::Install,
                &[
                    "torch==2.4".to_string(),
                    "rm -rf /".to_string(),
                    "pillow".to_string(),
                ],
                &[],
            )
            .unwrap();
        assert_eq!(
            tx.requested_packages,
            vec!["torch==2.4".to_string(), "pillow".to_string()]
        );
        assert!(tx
            .plan_commands
            .contains(&"python -m pip install torch==2.4 pillow".to_string()));
    }

    #[tokio::test]
    async fn policy_violation_blocks_planning() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path(), true);

        let err = engine
            .create_plan(
                TxKind::Install,
                &[],
                &["open".to_string(), "unknown".to_string()],
            )
            .unwrap_err();
        match err {
            EnvError::PolicyViolation { violations } => {
                assert_eq!(violations, vec!["unknown".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn apply_requires_planned_or_failed() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path(), true);

        let tx = engine.create_plan(TxKind::Repair, &[], &[]).unwrap();
        let applied = engine.apply(&tx.id).await.unwrap();
        assert_eq!(applied.status, TxStatus::Succeeded);

        let err = engine.apply(&tx.id).await.unwrap_err();
        assert!(matches!(err, EnvError::Conflict { .. }));
        // The stored transaction is untouched by the refused apply.
        assert_eq!(engine.get(&tx.id).unwrap(), applied);
    }

    #[tokio::test]
    async fn failed_check_marks_the_transaction() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path(), true);
        fs_err::write(dir.path().join("venv/bin/PIPCHECK_FAIL"), "\n").unwrap();

        let tx = engine.create_plan(TxKind::Repair, &[], &[]).unwrap();
        let tx = engine.apply(&tx.id).await.unwrap();
        assert_eq!(tx.status, TxStatus::Failed);
        assert_eq!(tx.pip_healthy, Some(false));
        assert!(tx.error.as_deref().unwrap().contains("pip check"));
        // A failed transaction may be retried.
        fs_err::remove_file(dir.path().join("venv/bin/PIPCHECK_FAIL")).unwrap();
        let tx = engine.apply(&tx.id).await.unwrap();
        assert_eq!(tx.status, TxStatus::Succeeded);
    }

    #[tokio::test]
    async fn missing_venv_records_skipped_steps() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path(), false);

        let tx = engine.create_plan(TxKind::Repair, &[], &[]).unwrap();
        let tx = engine.apply(&tx.id).await.unwrap();
        assert_eq!(tx.status, TxStatus::Failed);
        assert_eq!(tx.error.as_deref(), Some("virtualenv missing"));
        assert!(tx.snapshot_before.is_none());
        assert!(tx.steps.iter().all(|step| !step.ok));
        assert!(tx.steps[0].output.contains("virtualenv interpreter missing"));
    }

    #[tokio::test]
    async fn rollback_reinstalls_the_before_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path(), true);

        let tx = engine.create_plan(TxKind::Repair, &[], &[]).unwrap();
        let tx = engine.apply(&tx.id).await.unwrap();
        let before = tx.snapshot_before.clone().unwrap();

        let rollback = engine.rollback(&tx.id).await.unwrap();
        assert_eq!(rollback.kind, TxKind::Rollback);
        assert_eq!(rollback.rollback_of.as_deref(), Some(tx.id.as_str()));
        assert_eq!(rollback.status, TxStatus::RolledBack);
        assert_eq!(
            rollback.plan_commands,
            vec![
                format!("python -m pip install -r {}", before.display()),
                "python -m pip check".to_string(),
            ]
        );

        // The freeze the rollback reinstalls is the before-state.
        let content = fs_err::read_to_string(&before).unwrap();
        assert_eq!(content, "pillow==10.0.0\ntorch==2.4.0\n");
    }

    #[tokio::test]
    async fn rollback_without_snapshot_conflicts() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path(), false);

        let tx = engine.create_plan(TxKind::Repair, &[], &[]).unwrap();
        let tx = engine.apply(&tx.id).await.unwrap();
        assert!(tx.snapshot_before.is_none());
        let err = engine.rollback(&tx.id).await.unwrap_err();
        assert!(matches!(err, EnvError::Conflict { .. }));
    }

    #[tokio::test]
    async fn unknown_transaction_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path(), true);
        assert!(matches!(
            engine.apply("ghost").await.unwrap_err(),
            EnvError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn status_reports_health_and_latest() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path(), true);
        let tx = engine.create_plan(TxKind::Repair, &[], &[]).unwrap();
        engine.apply(&tx.id).await.unwrap();

        let status = engine.status().await;
        assert!(status.ok);
        assert!(status.venv_exists);
        assert_eq!(status.pip_healthy, Some(true));
        assert_eq!(status.transactions, 1);
        assert_eq!(status.latest_transaction.unwrap().id, tx.id);
    }
}
