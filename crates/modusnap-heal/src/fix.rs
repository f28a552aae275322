use std::time::Duration;

use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use modusnap_client::EngineClient;
use modusnap_locator::BackendLocation;
use modusnap_subprocess::{spawn_detached, VenvRunner};
use modusnap_types::{EnvStep, HardwareProfile, IssueId};

use crate::compat::{build_compatibility_set, Selection};
use crate::error::HealError;
use crate::step::record_step;

const IMPORT_PROBE_TIMEOUT: Duration = Duration::from_secs(12);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestartMethod {
    ManagerReboot,
    DetachedStart,
    NotRestarted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestartDescriptor {
    pub method: RestartMethod,
    pub detail: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FixOutcome {
    pub ok: bool,
    pub issue: IssueId,
    pub steps: Vec<EnvStep>,
    pub restart: Option<RestartDescriptor>,
    pub removed: Vec<String>,
    pub notes: Vec<String>,
}

/// Applies typed fixes. Each fix is idempotent and returns its step log
/// plus a restart descriptor.
#[derive(Debug, Clone)]
pub struct FixEngine {
    location: BackendLocation,
    runner: VenvRunner,
    client: EngineClient,
    profile: HardwareProfile,
}

impl FixEngine {
    pub fn new(location: BackendLocation, client: EngineClient) -> Self {
        let runner = VenvRunner::new(&location.venv_python, &location.backend_dir);
        let profile = location.hardware_profile();
        Self {
            location,
            runner,
            client,
            profile,
        }
    }

    pub async fn apply(&self, issue: IssueId) -> Result<FixOutcome, HealError> {
        match issue {
            IssueId::SslCertIssue => self.fix_ssl_cert().await,
            IssueId::PipCheckFailed
            | IssueId::PipLogIssue
            | IssueId::ManagerImportRuntimeFailed
            | IssueId::ManagerPkgMissing => self.fix_dependency_drift(issue).await,
            IssueId::RembgOnnxMissing => self.fix_rembg_onnx().await,
            IssueId::BackendDown => self.fix_backend_down().await,
            IssueId::ManagerRoutesMissing | IssueId::VenvMissing => {
                Err(HealError::NoAutomatedFix(issue))
            }
        }
    }

    /// Upgrade the certificate bundle and restart.
    async fn fix_ssl_cert(&self) -> Result<FixOutcome, HealError> {
        let mut steps = Vec::new();
        let mut notes = Vec::new();

        let started = Timestamp::now();
        let record = self.runner.pip_install(&["--upgrade", "certifi"], false).await;
        let ok = record.ok;
        steps.push(record_step("python -m pip install --upgrade certifi", started, &record));

        let started = Timestamp::now();
        let probe = self
            .runner
            .probe("import certifi; print(certifi.where())", IMPORT_PROBE_TIMEOUT)
            .await;
        if probe.ok {
            notes.push(format!("certificate bundle: {}", probe.output.trim()));
        }
        steps.push(record_step("python -c 'import certifi; print(certifi.where())'", started, &probe));

        let restart = self.restart_backend().await;
        Ok(FixOutcome {
            ok,
            issue: IssueId::SslCertIssue,
            steps,
            restart: Some(restart),
            removed: vec![],
            notes,
        })
    }

    /// The full compat-install + AutoHeal + prune pipeline; restart only if
    /// the engine was already down.
    async fn fix_dependency_drift(&self, issue: IssueId) -> Result<FixOutcome, HealError> {
        let was_down = !self.client.is_reachable().await;
        let outcome = build_compatibility_set(
            &self.location,
            &self.runner,
            Some(&self.client),
            Selection::default(),
            None,
        )
        .await?;

        let mut notes = Vec::new();
        if !outcome.removed.is_empty() {
            notes.push(format!(
                "removed {} conflicting packages: {}",
                outcome.removed.len(),
                outcome.removed.join(", ")
            ));
        }

        let restart = if was_down {
            Some(self.restart_backend().await)
        } else {
            None
        };
        Ok(FixOutcome {
            ok: outcome.compatibility_set.pip_healthy,
            issue,
            steps: outcome.steps,
            restart,
            removed: outcome.removed,
            notes,
        })
    }

    /// Hardware-conditioned onnxruntime plan, verified by an import probe.
    async fn fix_rembg_onnx(&self) -> Result<FixOutcome, HealError> {
        let runtime = if self.profile.has_nvidia && !self.profile.is_darwin_arm64() {
            "onnxruntime-gpu"
        } else {
            "onnxruntime"
        };
        let mut steps = Vec::new();

        let started = Timestamp::now();
        let record = self
            .runner
            .pip_install(&["rembg==2.0.69", runtime], false)
            .await;
        steps.push(record_step(
            format!("python -m pip install rembg==2.0.69 {runtime}"),
            started,
            &record,
        ));

        let started = Timestamp::now();
        let probe = self
            .runner
            .probe("import rembg, onnxruntime; print('ok')", IMPORT_PROBE_TIMEOUT)
            .await;
        let verified = probe.ok;
        steps.push(record_step("python -c 'import rembg, onnxruntime'", started, &probe));

        let restart = if verified {
            Some(self.restart_backend().await)
        } else {
            None
        };
        Ok(FixOutcome {
            ok: verified,
            issue: IssueId::RembgOnnxMissing,
            steps,
            restart,
            removed: vec![],
            notes: vec![format!("selected runtime: {runtime}")],
        })
    }

    /// Detached start when the engine is down; otherwise nothing to do.
    async fn fix_backend_down(&self) -> Result<FixOutcome, HealError> {
        let mut notes = Vec::new();
        let restart = if self.client.is_reachable().await {
            notes.push("engine is already up".to_string());
            None
        } else {
            Some(self.detached_start())
        };
        Ok(FixOutcome {
            ok: true,
            issue: IssueId::BackendDown,
            steps: vec![],
            restart,
            removed: vec![],
            notes,
        })
    }

    /// In-process manager reboot first; detached start as the fallback.
    async fn restart_backend(&self) -> RestartDescriptor {
        match self.client.reboot().await {
            Ok(()) => {
                info!("Engine rebooting in process");
                RestartDescriptor {
                    method: RestartMethod::ManagerReboot,
                    detail: "manager reboot accepted".to_string(),
                }
            }
            Err(err) => {
                warn!("Manager reboot failed, starting detached: {err}");
                self.detached_start()
            }
        }
    }

    fn detached_start(&self) -> RestartDescriptor {
        match spawn_detached(
            &self.location.start_script(),
            &self.location.backend_dir,
            &self.location.restart_log,
        ) {
            Ok(pid) => RestartDescriptor {
                method: RestartMethod::DetachedStart,
                detail: format!("started pid {pid}, logging to {}", self.location.restart_log.display()),
            },
            Err(err) => RestartDescriptor {
                method: RestartMethod::NotRestarted,
                detail: format!("detached start failed: {err}"),
            },
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;

    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use modusnap_client::EngineClientBuilder;
    use modusnap_locator::locate;
    use modusnap_types::IssueId;

    use super::{FixEngine, RestartMethod};
    use crate::error::HealError;

    const FAKE_PYTHON: &str = r#"#!/bin/sh
case "$*" in
  *"pip check"*) echo "No broken requirements found." ;;
  *"pip list"*) echo '[]' ;;
  *"certifi"*) echo "/fake/venv/certifi/cacert.pem" ;;
  *"import rembg"*) echo "ok" ;;
  *) echo "ok" ;;
esac
exit 0
"#;

    fn seed(dir: &Path, profile: &str) {
        fs_err::write(dir.join("main.py"), "\n").unwrap();
        fs_err::write(dir.join("requirements.txt"), "torch\n").unwrap();
        fs_err::write(dir.join("manager_requirements.txt"), "rich\n").unwrap();
        fs_err::write(dir.join("start.sh"), "#!/bin/sh\ntrue\n").unwrap();
        let user = dir.join("user");
        fs_err::create_dir_all(&user).unwrap();
        fs_err::write(user.join("modusnap_hardware_profile"), profile).unwrap();
        let bin = dir.join("venv").join("bin");
        fs_err::create_dir_all(&bin).unwrap();
        let python = bin.join("python");
        fs_err::write(&python, FAKE_PYTHON).unwrap();
        let mut perms = fs_err::metadata(&python).unwrap().permissions();
        perms.set_mode(0o755);
        fs_err::set_permissions(&python, perms).unwrap();
    }

    async fn engine(dir: &Path, profile: &str, server: &MockServer) -> FixEngine {
        seed(dir, profile);
        let location = locate(Some(dir)).unwrap();
        let client = EngineClientBuilder::new(server.uri()).retries(0).build().unwrap();
        FixEngine::new(location, client)
    }

    #[tokio::test]
    async fn rembg_fix_picks_gpu_runtime_on_nvidia() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        let fix = engine(dir.path(), "linux-x86_64-nvidia:true-rocm:false", &server).await;

        let outcome = fix.apply(IssueId::RembgOnnxMissing).await.unwrap();
        assert!(outcome.ok);
        assert!(outcome.notes.iter().any(|note| note.contains("onnxruntime-gpu")));
        assert!(outcome.steps[0].command.contains("onnxruntime-gpu"));
    }

    #[tokio::test]
    async fn rembg_fix_picks_cpu_runtime_elsewhere() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        let fix = engine(dir.path(), "darwin-arm64-nvidia:false-rocm:false", &server).await;

        let outcome = fix.apply(IssueId::RembgOnnxMissing).await.unwrap();
        assert!(outcome.steps[0].command.ends_with("rembg==2.0.69 onnxruntime"));
    }

    #[tokio::test]
    async fn ssl_fix_prefers_manager_reboot() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/manager/reboot"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let fix = engine(dir.path(), "unknown", &server).await;
        let outcome = fix.apply(IssueId::SslCertIssue).await.unwrap();
        assert!(outcome.ok);
        assert_eq!(outcome.restart.unwrap().method, RestartMethod::ManagerReboot);
        assert!(outcome.notes.iter().any(|note| note.contains("cacert.pem")));
    }

    #[tokio::test]
    async fn backend_down_starts_detached_when_unreachable() {
        let server = MockServer::start().await;
        // No system_stats mock: the engine is down, reboot is down too.
        let dir = tempfile::tempdir().unwrap();
        let fix = engine(dir.path(), "unknown", &server).await;
        let outcome = fix.apply(IssueId::BackendDown).await.unwrap();
        let restart = outcome.restart.unwrap();
        assert_eq!(restart.method, RestartMethod::DetachedStart);
    }

    #[tokio::test]
    async fn backend_down_is_a_noop_when_up() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/system_stats"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .mount(&server)
            .await;
        let dir = tempfile::tempdir().unwrap();
        let fix = engine(dir.path(), "unknown", &server).await;
        let outcome = fix.apply(IssueId::BackendDown).await.unwrap();
        assert!(outcome.restart.is_none());
        assert!(outcome.notes[0].contains("already up"));
    }

    #[tokio::test]
    async fn unfixable_issues_are_rejected() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        let fix = engine(dir.path(), "unknown", &server).await;
        assert!(matches!(
            fix.apply(IssueId::VenvMissing).await.unwrap_err(),
            HealError::NoAutomatedFix(IssueId::VenvMissing)
        ));
    }

    #[tokio::test]
    async fn dependency_drift_runs_the_pipeline() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/system_stats"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .mount(&server)
            .await;
        let dir = tempfile::tempdir().unwrap();
        let fix = engine(dir.path(), "unknown", &server).await;
        let outcome = fix.apply(IssueId::PipCheckFailed).await.unwrap();
        assert!(outcome.ok);
        // Engine was up, so no restart.
        assert!(outcome.restart.is_none());
        assert!(!outcome.steps.is_empty());
    }
}
