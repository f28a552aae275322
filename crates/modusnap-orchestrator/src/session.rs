use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use jiff::Timestamp;
use nanoid::nanoid;
use tracing::{debug, info, warn};

use modusnap_client::EngineClient;
use modusnap_heal::{build_compatibility_set, FixEngine, Selection};
use modusnap_locator::BackendLocation;
use modusnap_store::CompatSetStore;
use modusnap_subprocess::VenvRunner;
use modusnap_types::{
    CatalogItem, Decision, InstallSession, ItemStatus, SessionItem, SessionMode, SessionScope,
};

use crate::batch::{batch_payload, classify_for_submission, map_action};

/// Batches larger than this use the smaller chunk size.
const LARGE_BATCH: usize = 200;
const CHUNK_SIZE_LARGE_BATCH: usize = 20;
const CHUNK_SIZE_SMALL_BATCH: usize = 40;

/// Cooperative cancel, checked at every chunk boundary.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_canceled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Wall clocks and poll cadences, overridable for tests.
#[derive(Debug, Clone)]
pub struct SessionTuning {
    pub drain_poll: Duration,
    pub drain_timeout_floor: Duration,
    pub drain_timeout_per_chunk: Duration,
    pub ready_poll: Duration,
    pub ready_timeout: Duration,
}

impl Default for SessionTuning {
    fn default() -> Self {
        Self {
            drain_poll: Duration::from_secs(1),
            drain_timeout_floor: Duration::from_secs(5 * 60),
            drain_timeout_per_chunk: Duration::from_secs(45),
            ready_poll: Duration::from_secs(1),
            ready_timeout: Duration::from_secs(180),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionRequest {
    pub mode: SessionMode,
    pub scope: SessionScope,
    pub items: Vec<CatalogItem>,
}

pub(crate) fn chunk_size(total: usize) -> usize {
    if total > LARGE_BATCH {
        CHUNK_SIZE_LARGE_BATCH
    } else {
        CHUNK_SIZE_SMALL_BATCH
    }
}

/// Composes the primitives into one install/uninstall session.
#[derive(Debug)]
pub struct Orchestrator {
    location: BackendLocation,
    client: EngineClient,
    runner: VenvRunner,
    tuning: SessionTuning,
}

impl Orchestrator {
    pub fn new(location: BackendLocation, client: EngineClient) -> Self {
        let runner = VenvRunner::new(&location.venv_python, &location.backend_dir);
        Self {
            location,
            client,
            runner,
            tuning: SessionTuning::default(),
        }
    }

    #[must_use]
    pub fn with_tuning(mut self, tuning: SessionTuning) -> Self {
        self.tuning = tuning;
        self
    }

    pub fn client(&self) -> &EngineClient {
        &self.client
    }

    /// Run one session to completion. Never errors: failures are recorded
    /// in the session log and item states.
    pub async fn run_session(&self, request: SessionRequest, cancel: &CancelFlag) -> InstallSession {
        let profile = self.location.hardware_profile();
        let mut session = InstallSession {
            id: nanoid!(),
            mode: request.mode,
            scope: request.scope,
            started_at: Timestamp::now(),
            total: request.items.len(),
            completed: 0,
            remaining: request.items.len(),
            current_chunk: 0,
            total_chunks: 0,
            items: request
                .items
                .iter()
                .map(|item| SessionItem {
                    key: item.ui_key.clone(),
                    title: item.title.clone(),
                    selected: item.selected || request.scope == SessionScope::AllVisible,
                    status: ItemStatus::Pending,
                    details: None,
                })
                .collect(),
            logs: vec![],
            running: true,
            canceled: false,
        };

        let mut candidates: Vec<CatalogItem> = Vec::new();
        for item in request.items {
            if request.mode == SessionMode::Install && item.is_installed() {
                set_item(&mut session, &item.ui_key, ItemStatus::Skipped, Some("already installed"));
                continue;
            }
            candidates.push(item);
        }

        // Preflight: blocked items never reach a chunk.
        if request.mode == SessionMode::Install {
            let mut remaining = Vec::new();
            for item in candidates {
                let decision = modusnap_audit::classify(&item, &profile);
                if decision.decision == Decision::Blocked {
                    set_item(
                        &mut session,
                        &item.ui_key,
                        ItemStatus::Skipped,
                        Some("removed by compatibility preflight"),
                    );
                } else {
                    remaining.push(item);
                }
            }
            candidates = remaining;
        }

        if candidates.is_empty() {
            session.logs.push("session failed: no installable items remain".to_string());
            session.running = false;
            session.refresh_counts();
            return session;
        }

        if request.mode == SessionMode::Install {
            self.ensure_compatibility_set(&mut session, &candidates, &profile.token).await;
        }

        // Engine-level snapshot, best effort.
        match self.client.snapshot_save().await {
            Ok(_) => session.logs.push("engine snapshot saved".to_string()),
            Err(err) => session.logs.push(format!("engine snapshot failed: {err}")),
        }

        let size = chunk_size(candidates.len());
        let chunks: Vec<Vec<CatalogItem>> = candidates
            .chunks(size)
            .map(<[CatalogItem]>::to_vec)
            .collect();
        session.total_chunks = chunks.len();
        let action = map_action(match request.mode {
            SessionMode::Install => "install",
            SessionMode::Uninstall => "uninstall",
        })
        .to_string();

        for (index, chunk) in chunks.into_iter().enumerate() {
            if cancel.is_canceled() {
                session.canceled = true;
                session.logs.push("canceled".to_string());
                break;
            }
            session.current_chunk = index + 1;
            self.submit_chunk(&mut session, &action, index, chunk).await;
        }

        if !session.canceled {
            self.drain_and_finish(&mut session).await;
        }

        session.running = false;
        session.refresh_counts();
        session
    }

    /// Rebuild the compatibility set unless the cached one still guards
    /// this install.
    async fn ensure_compatibility_set(
        &self,
        session: &mut InstallSession,
        candidates: &[CatalogItem],
        profile_token: &str,
    ) {
        let store = CompatSetStore::new(&self.location.user_dir);
        if let Some(current) = store.current() {
            if current.is_fresh(Timestamp::now(), profile_token) {
                session.logs.push(format!("compatibility set {} is fresh", current.lock_id));
                return;
            }
        }

        let selection = Selection {
            pack_keys: candidates.iter().map(|item| item.ui_key.clone()).collect(),
            pack_ids: candidates.iter().filter_map(|item| item.id.clone()).collect(),
        };
        match build_compatibility_set(&self.location, &self.runner, Some(&self.client), selection, None)
            .await
        {
            Ok(outcome) => {
                session.logs.push(format!(
                    "compatibility set {} rebuilt (healthy: {}, auto-healed: {})",
                    outcome.compatibility_set.lock_id,
                    outcome.compatibility_set.pip_healthy,
                    outcome.auto_healed
                ));
            }
            Err(err) => {
                warn!("Compatibility set rebuild failed: {err}");
                session.logs.push(format!("compatibility set rebuild failed: {err}"));
            }
        }
    }

    async fn submit_chunk(
        &self,
        session: &mut InstallSession,
        action: &str,
        index: usize,
        chunk: Vec<CatalogItem>,
    ) {
        let chunk_keys: Vec<String> = chunk.iter().map(|item| item.ui_key.clone()).collect();
        let (accepted, dropped) = classify_for_submission(chunk);
        for drop in &dropped {
            set_item(session, &drop.key, ItemStatus::Failed, Some(&drop.reason));
        }
        if accepted.is_empty() {
            session.logs.push(format!("chunk {} had no submittable items", index + 1));
            return;
        }

        let batch_id = format!("{}-{}", session.id, index + 1);
        let payload = batch_payload(&batch_id, action, &accepted);
        match self.client.queue_batch(&payload).await {
            Ok(_) => {
                if let Err(err) = self.client.queue_start().await {
                    debug!("queue start after batch {batch_id} failed: {err}");
                }
                for item in &accepted {
                    set_item(session, &item.ui_key, ItemStatus::Queued, None);
                }
                session
                    .logs
                    .push(format!("chunk {} queued ({} items)", index + 1, accepted.len()));
            }
            Err(err) => {
                warn!("Batch submission failed for chunk {}: {err}", index + 1);
                for key in &chunk_keys {
                    if item_status(session, key) != Some(ItemStatus::Failed) {
                        set_item(session, key, ItemStatus::Failed, Some(&format!("submission failed: {err}")));
                    }
                }
                session.logs.push(format!("chunk {} failed to submit: {err}", index + 1));
            }
        }
        session.refresh_counts();
    }

    /// Drain wait, reboot-and-ready, post-install heal, catalog refresh.
    async fn drain_and_finish(&self, session: &mut InstallSession) {
        let drain_budget = self
            .tuning
            .drain_timeout_floor
            .max(self.tuning.drain_timeout_per_chunk * session.total_chunks as u32);
        if !self.wait_for_drain(drain_budget).await {
            session.logs.push("queue drain timed out".to_string());
            fail_queued(session, "queue drain timed out");
            return;
        }
        mark_queued_done(session);
        session.logs.push("queue drained".to_string());

        match self.client.reboot().await {
            Ok(()) => info!("Engine rebooting after install"),
            Err(err) => debug!("Reboot request failed: {err}"),
        }
        if self.wait_for_ready().await {
            session.logs.push("engine ready".to_string());
        } else {
            session.logs.push("engine readiness timed out".to_string());
            return;
        }

        // Late-surfacing dependency drift gets one heal pass.
        let fix = FixEngine::new(self.location.clone(), self.client.clone());
        match fix.apply(modusnap_types::IssueId::PipCheckFailed).await {
            Ok(outcome) => {
                session.logs.push(format!(
                    "post-install heal: healthy={}, {} conflicting packages removed",
                    outcome.ok,
                    outcome.removed.len()
                ));
            }
            Err(err) => session.logs.push(format!("post-install heal failed: {err}")),
        }

        if let Err(err) = self.client.catalog_list("cache", true).await {
            debug!("Catalog refresh failed: {err}");
        } else {
            session.logs.push("catalog refreshed".to_string());
        }
    }

    async fn wait_for_drain(&self, budget: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + budget;
        loop {
            if let Ok(status) = self.client.queue_status().await {
                if status.is_drained() {
                    return true;
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(self.tuning.drain_poll).await;
        }
    }

    async fn wait_for_ready(&self) -> bool {
        let deadline = tokio::time::Instant::now() + self.tuning.ready_timeout;
        loop {
            if self.client.is_reachable().await && self.client.manager_endpoint().await.is_some() {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(self.tuning.ready_poll).await;
        }
    }
}

fn set_item(session: &mut InstallSession, key: &str, status: ItemStatus, details: Option<&str>) {
    if let Some(item) = session.items.iter_mut().find(|item| item.key == key) {
        item.status = status;
        item.details = details.map(ToString::to_string);
    }
}

fn item_status(session: &InstallSession, key: &str) -> Option<ItemStatus> {
    session.items.iter().find(|item| item.key == key).map(|item| item.status)
}

fn mark_queued_done(session: &mut InstallSession) {
    for item in &mut session.items {
        if item.status == ItemStatus::Queued {
            item.status = ItemStatus::Done;
        }
    }
}

fn fail_queued(session: &mut InstallSession, reason: &str) {
    for item in &mut session.items {
        if item.status == ItemStatus::Queued {
            item.status = ItemStatus::Failed;
            item.details = Some(reason.to_string());
        }
    }
}


#[cfg(all(test, unix))]
mod tests {
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;

    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use modusnap_client::EngineClientBuilder;
    use modusnap_locator::locate;
    use modusnap_types::{CatalogItem, InstallType, ItemStatus, SessionMode, SessionScope};

    use super::{CancelFlag, Orchestrator, SessionRequest, SessionTuning};

    const FAKE_PYTHON: &str = r#"#!/bin/sh
case "$*" in
  *"pip check"*) echo "No broken requirements found." ;;
  *"pip list"*) echo '[]' ;;
  *) echo "ok" ;;
esac
exit 0
"#;

    fn seed(dir: &Path) {
        fs_err::write(dir.join("main.py"), "\n").unwrap();
        fs_err::write(dir.join("requirements.txt"), "torch\n").unwrap();
        fs_err::write(dir.join("manager_requirements.txt"), "rich\n").unwrap();
        let user = dir.join("user");
        fs_err::create_dir_all(&user).unwrap();
        fs_err::write(
            user.join("modusnap_hardware_profile"),
            "darwin-arm64-nvidia:false-rocm:false",
        )
        .unwrap();
        let bin = dir.join("venv").join("bin");
        fs_err::create_dir_all(&bin).unwrap();
        let python = bin.join("python");
        fs_err::write(&python, FAKE_PYTHON).unwrap();
        let mut perms = fs_err::metadata(&python).unwrap().permissions();
        perms.set_mode(0o755);
        fs_err::set_permissions(&python, perms).unwrap();
    }

    async fn mount_happy_engine(server: &MockServer) {
        for (route, body) in [
            ("/system_stats", json!({})),
            ("/v2/manager/version", json!("3.31")),
            (
                "/v2/manager/queue/status",
                json!({"total_count": 0, "done_count": 0, "in_progress_count": 0, "pending_count": 0, "is_processing": false}),
            ),
            ("/v2/manager/queue/start", json!({})),
            ("/v2/manager/reboot", json!({})),
            ("/v2/snapshot/save", json!({})),
            ("/v2/customnode/getlist", json!({})),
        ] {
            Mock::given(method("GET"))
                .and(path(route))
                .respond_with(ResponseTemplate::new(200).set_body_json(body))
                .mount(server)
                .await;
        }
    }

    fn fast_tuning() -> SessionTuning {
        SessionTuning {
            drain_poll: std::time::Duration::from_millis(10),
            drain_timeout_floor: std::time::Duration::from_millis(500),
            drain_timeout_per_chunk: std::time::Duration::from_millis(10),
            ready_poll: std::time::Duration::from_millis(10),
            ready_timeout: std::time::Duration::from_millis(500),
        }
    }

    fn pack(key: &str, description: &str) -> CatalogItem {
        CatalogItem {
            ui_key: key.to_string(),
            id: Some(format!("{key}-id")),
            title: key.to_string(),
            description: description.to_string(),
            install_type: InstallType::Cnr,
            selected: true,
            ..CatalogItem::default()
        }
    }

    async fn orchestrator(dir: &Path, server: &MockServer) -> Orchestrator {
        seed(dir);
        let location = locate(Some(dir)).unwrap();
        let client = EngineClientBuilder::new(server.uri()).retries(0).build().unwrap();
        Orchestrator::new(location, client).with_tuning(fast_tuning())
    }

    #[tokio::test]
    async fn blocked_items_never_reach_a_chunk() {
        let server = MockServer::start().await;
        mount_happy_engine(&server).await;
        Mock::given(method("POST"))
            .and(path("/v2/manager/queue/batch"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let orchestrator = orchestrator(dir.path(), &server).await;
        let session = orchestrator
            .run_session(
                SessionRequest {
                    mode: SessionMode::Install,
                    scope: SessionScope::Selected,
                    items: vec![
                        pack("blocked-pack", "cuda-only kernels"),
                        pack("good-pack", "pure python"),
                        {
                            let mut installed = pack("installed-pack", "pure python");
                            installed.state = Some("enabled".to_string());
                            installed
                        },
                    ],
                },
                &CancelFlag::new(),
            )
            .await;

        assert!(!session.running);
        assert!(!session.canceled);
        assert_eq!(session.total_chunks, 1);

        let by_key = |key: &str| session.items.iter().find(|item| item.key == key).unwrap();
        assert_eq!(by_key("blocked-pack").status, ItemStatus::Skipped);
        assert_eq!(
            by_key("blocked-pack").details.as_deref(),
            Some("removed by compatibility preflight")
        );
        assert_eq!(by_key("installed-pack").status, ItemStatus::Skipped);
        assert_eq!(by_key("good-pack").status, ItemStatus::Done);
        assert_eq!(session.completed, 3);
        server.verify().await;
    }

    #[tokio::test]
    async fn cancel_before_first_chunk_submits_nothing() {
        let server = MockServer::start().await;
        mount_happy_engine(&server).await;
        Mock::given(method("POST"))
            .and(path("/v2/manager/queue/batch"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let orchestrator = orchestrator(dir.path(), &server).await;
        let cancel = CancelFlag::new();
        cancel.cancel();

        let session = orchestrator
            .run_session(
                SessionRequest {
                    mode: SessionMode::Install,
                    scope: SessionScope::AllVisible,
                    items: vec![pack("p1", "pure python")],
                },
                &cancel,
            )
            .await;
        assert!(session.canceled);
        assert_eq!(session.logs.last().unwrap(), "canceled");
        server.verify().await;
    }

    #[tokio::test]
    async fn failed_submission_marks_the_chunk_and_continues() {
        let server = MockServer::start().await;
        mount_happy_engine(&server).await;
        Mock::given(method("POST"))
            .and(path("/v2/manager/queue/batch"))
            .respond_with(ResponseTemplate::new(500).set_body_string("queue on fire"))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let orchestrator = orchestrator(dir.path(), &server).await;
        let session = orchestrator
            .run_session(
                SessionRequest {
                    mode: SessionMode::Install,
                    scope: SessionScope::Selected,
                    items: vec![pack("p1", "pure python"), pack("p2", "pure python")],
                },
                &CancelFlag::new(),
            )
            .await;

        assert!(session
            .items
            .iter()
            .all(|item| item.status == ItemStatus::Failed));
        assert!(session
            .items
            .iter()
            .all(|item| item.details.as_deref().unwrap().contains("submission failed")));
    }

    #[tokio::test]
    async fn empty_candidate_set_fails_the_session() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = orchestrator(dir.path(), &server).await;
        let session = orchestrator
            .run_session(
                SessionRequest {
                    mode: SessionMode::Install,
                    scope: SessionScope::Selected,
                    items: vec![pack("blocked", "cuda-only")],
                },
                &CancelFlag::new(),
            )
            .await;
        assert!(!session.running);
        assert_eq!(session.total_chunks, 0);
        assert!(session.logs.iter().any(|log| log.contains("no installable items")));
    }
}
