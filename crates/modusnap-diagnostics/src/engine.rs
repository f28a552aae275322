use std::time::{Duration, Instant};

use jiff::Timestamp;
use tokio::sync::Mutex;
use tracing::debug;

use modusnap_client::EngineClient;
use modusnap_locator::BackendLocation;
use modusnap_subprocess::VenvRunner;

use crate::logscan::{scan_log, LogFindings};
use crate::report::{
    derive_issues, DiagnosticsReport, ObjectInfoProbe, PipCheckProbe, ProbeMode, TorchProbe,
};

/// Cached sub-results stay valid this long for fast passes.
const FAST_TTL: Duration = Duration::from_secs(25);
/// Deep passes tolerate much less staleness.
const DEEP_TTL: Duration = Duration::from_secs(6);

const TORCH_PROBE_TIMEOUT: Duration = Duration::from_millis(3500);
const IMPORT_PROBE_TIMEOUT: Duration = Duration::from_secs(12);

/// Nodes every healthy engine ships; their presence validates the node
/// catalog.
const CANONICAL_NODES: &[&str] = &["KSampler", "CheckpointLoaderSimple"];

#[derive(Debug, Clone)]
struct Slot<T> {
    value: T,
    at: Instant,
}

impl<T: Clone> Slot<T> {
    fn fresh(&self, ttl: Duration) -> Option<T> {
        (self.at.elapsed() < ttl).then(|| self.value.clone())
    }
}

#[derive(Debug, Default)]
struct Caches {
    backend_up: Option<Slot<bool>>,
    manager_endpoint: Option<Slot<Option<String>>>,
    object_info: Option<Slot<Option<ObjectInfoProbe>>>,
    log_findings: Option<Slot<LogFindings>>,
    torch: Option<Slot<Option<TorchProbe>>>,
}

/// Runs fast and deep diagnostic passes with per-slot TTL caches.
#[derive(Debug)]
pub struct DiagnosticsEngine {
    client: EngineClient,
    location: BackendLocation,
    runner: VenvRunner,
    caches: Mutex<Caches>,
}

impl DiagnosticsEngine {
    pub fn new(location: BackendLocation, client: EngineClient) -> Self {
        let runner = VenvRunner::new(&location.venv_python, &location.backend_dir);
        Self {
            client,
            location,
            runner,
            caches: Mutex::new(Caches::default()),
        }
    }

    /// One diagnostics pass. Fast keeps within a ~2 s extra budget by
    /// reusing cached sub-results and skipping subprocess probes; deep runs
    /// everything.
    pub async fn run(&self, deep: bool) -> DiagnosticsReport {
        let ttl = if deep { DEEP_TTL } else { FAST_TTL };

        let backend_up = self.backend_up(ttl).await;
        let manager_endpoint = if backend_up {
            self.manager_endpoint(ttl).await
        } else {
            None
        };
        let venv_exists = self.location.venv_exists();
        let object_info = if backend_up {
            self.object_info(ttl, deep).await
        } else {
            None
        };
        let log_findings = self.log_findings(ttl).await;

        let (manager_pkg_found, manager_import_ok, pip_check, torch) = if deep && venv_exists {
            (
                self.probe_manager_pkg().await,
                self.probe_manager_import().await,
                self.probe_pip_check().await,
                self.probe_torch(ttl).await,
            )
        } else {
            (None, None, None, None)
        };

        let workflow_templates = if deep && backend_up {
            match self.client.workflow_templates().await {
                Ok(value) => value.as_object().map(serde_json::Map::len),
                Err(err) => {
                    debug!("workflow_templates probe failed: {err}");
                    None
                }
            }
        } else {
            None
        };

        let dependency_synced_at = fs_err::read_to_string(self.location.dependency_sync_marker())
            .ok()
            .map(|content| content.trim().to_string());

        let mut report = DiagnosticsReport {
            mode: if deep { ProbeMode::Deep } else { ProbeMode::Fast },
            generated_at: Timestamp::now(),
            backend_up,
            manager_endpoint,
            venv_exists,
            object_info,
            manager_pkg_found,
            manager_import_ok,
            pip_check,
            hardware_profile: self.location.hardware_profile().token,
            dependency_synced_at,
            workflow_templates,
            torch,
            log_findings,
            issues: vec![],
        };
        report.issues = derive_issues(&report);
        report
    }

    async fn backend_up(&self, ttl: Duration) -> bool {
        if let Some(cached) = self.caches.lock().await.backend_up.as_ref().and_then(|slot| slot.fresh(ttl)) {
            return cached;
        }
        let up = self.client.is_reachable().await;
        self.caches.lock().await.backend_up = Some(Slot { value: up, at: Instant::now() });
        up
    }

    async fn manager_endpoint(&self, ttl: Duration) -> Option<String> {
        if let Some(cached) = self
            .caches
            .lock()
            .await
            .manager_endpoint
            .as_ref()
            .and_then(|slot| slot.fresh(ttl))
        {
            return cached;
        }
        let endpoint = self.client.manager_endpoint().await.map(ToString::to_string);
        self.caches.lock().await.manager_endpoint = Some(Slot {
            value: endpoint.clone(),
            at: Instant::now(),
        });
        endpoint
    }

    async fn object_info(&self, ttl: Duration, deep: bool) -> Option<ObjectInfoProbe> {
        if let Some(cached) = self
            .caches
            .lock()
            .await
            .object_info
            .as_ref()
            .and_then(|slot| slot.fresh(ttl))
        {
            return cached;
        }
        let probe = match self.client.object_info(deep).await {
            Ok(value) => value.as_object().map(|classes| ObjectInfoProbe {
                node_classes: classes.len(),
                canonical_nodes_present: CANONICAL_NODES.iter().all(|node| {
                    classes
                        .get(*node)
                        .and_then(|class| class.as_object())
                        .is_some_and(|class| !class.is_empty())
                }),
            }),
            Err(err) => {
                debug!("object_info probe failed: {err}");
                None
            }
        };
        self.caches.lock().await.object_info = Some(Slot {
            value: probe,
            at: Instant::now(),
        });
        probe
    }

    async fn log_findings(&self, ttl: Duration) -> LogFindings {
        if let Some(cached) = self
            .caches
            .lock()
            .await
            .log_findings
            .as_ref()
            .and_then(|slot| slot.fresh(ttl))
        {
            return cached;
        }
        let findings = scan_log(&self.location.comfy_log);
        self.caches.lock().await.log_findings = Some(Slot {
            value: findings,
            at: Instant::now(),
        });
        findings
    }

    async fn probe_manager_pkg(&self) -> Option<bool> {
        let record = self
            .runner
            .probe(
                "import importlib.util; print(bool(importlib.util.find_spec('comfyui_manager')))",
                IMPORT_PROBE_TIMEOUT,
            )
            .await;
        record.ok.then(|| record.output.trim() == "True")
    }

    async fn probe_manager_import(&self) -> Option<bool> {
        let record = self
            .runner
            .probe(
                "import importlib; importlib.import_module('comfyui_manager'); print('ok')",
                IMPORT_PROBE_TIMEOUT,
            )
            .await;
        Some(record.ok && record.output.trim().ends_with("ok"))
    }

    async fn probe_pip_check(&self) -> Option<PipCheckProbe> {
        let record = self.runner.pip_check().await;
        Some(PipCheckProbe {
            healthy: record.ok,
            output: record.output,
        })
    }

    /// One-line JSON from the ML runtime, if it answers in time.
    async fn probe_torch(&self, ttl: Duration) -> Option<TorchProbe> {
        if let Some(cached) = self.caches.lock().await.torch.as_ref().and_then(|slot| slot.fresh(ttl)) {
            return cached;
        }
        let record = self
            .runner
            .probe(
                "import json, torch; print(json.dumps({'cuda': torch.cuda.is_available(), 'mps': hasattr(torch.backends, 'mps') and torch.backends.mps.is_available()}))",
                TORCH_PROBE_TIMEOUT,
            )
            .await;
        let probe = if record.ok {
            record
                .output
                .lines()
                .last()
                .and_then(|line| serde_json::from_str::<TorchProbe>(line.trim()).ok())
        } else {
            None
        };
        self.caches.lock().await.torch = Some(Slot {
            value: probe,
            at: Instant::now(),
        });
        probe
    }
}
