use std::fmt::Write;

use anyhow::Result;
use nanoid::nanoid;
use owo_colors::OwoColorize;
use serde::Serialize;

use modusnap_heal::{build_compatibility_set, Selection};
use modusnap_orchestrator::{submit_batch, CancelFlag, Orchestrator, SessionRequest};
use modusnap_store::CompatSetStore;
use modusnap_subprocess::VenvRunner;
use modusnap_types::{CompatibilitySet, SessionMode, SessionScope};

use crate::commands::{emit, read_items, Context, ExitStatus};

pub(crate) async fn preflight(context: &Context, _mode: &str, items: &str) -> Result<ExitStatus> {
    let location = context.location()?;
    let items = read_items(items)?;
    let profile = location.hardware_profile();
    let pip_healthy = CompatSetStore::new(&location.user_dir)
        .current()
        .map(|set| set.pip_healthy);

    let report = modusnap_audit::preflight(&items, &profile, pip_healthy);
    let decisions: Vec<_> = items
        .iter()
        .map(|item| modusnap_audit::classify(item, &profile))
        .collect();
    modusnap_audit::write_audit_files(&location.user_dir, &decisions)?;
    emit(&report)
}

pub(crate) async fn batch(context: &Context, mode: &str, items: &str) -> Result<ExitStatus> {
    let items = read_items(items)?;
    let client = context.client()?;
    let batch_id = nanoid!();
    let outcome = submit_batch(&client, mode, &batch_id, items).await?;
    emit(&outcome)
}

pub(crate) async fn session(
    context: &Context,
    mode: SessionMode,
    scope: SessionScope,
    items: &str,
) -> Result<ExitStatus> {
    let location = context.location()?;
    let items = read_items(items)?;
    let _write = modusnap_locator::backend_lock(&location.backend_dir)
        .write_owned()
        .await;
    let orchestrator = Orchestrator::new(location, context.client()?);

    // Ctrl-C cancels cooperatively at the next chunk boundary.
    let cancel = CancelFlag::new();
    let watcher = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            watcher.cancel();
        }
    });

    let mut printer = context.printer;
    writeln!(printer, "Running {} session over {} items", mode_label(mode).cyan(), items.len())?;
    let session = orchestrator
        .run_session(SessionRequest { mode, scope, items }, &cancel)
        .await;
    for line in &session.logs {
        writeln!(printer, "  {line}")?;
    }

    let failed = session
        .items
        .iter()
        .any(|item| item.status == modusnap_types::ItemStatus::Failed);
    let status = emit(&session)?;
    Ok(if failed { ExitStatus::Failure } else { status })
}

fn mode_label(mode: SessionMode) -> &'static str {
    match mode {
        SessionMode::Install => "install",
        SessionMode::Uninstall => "uninstall",
    }
}

pub(crate) async fn queue_history(context: &Context, id: Option<&str>) -> Result<ExitStatus> {
    let client = context.client()?;
    match id {
        Some(id) => emit(&client.queue_history(id).await?),
        None => emit(&client.queue_history_list().await?),
    }
}

pub(crate) async fn mappings(context: &Context) -> Result<ExitStatus> {
    emit(&context.client()?.catalog_mappings().await?)
}

pub(crate) fn size_estimate(context: &Context, items: &str) -> Result<ExitStatus> {
    let _ = context.location()?;
    let items = read_items(items)?;
    emit(&modusnap_audit::size_estimate(&items))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CompatibilityView {
    current: Option<CompatibilitySet>,
    history: Vec<CompatibilitySet>,
}

pub(crate) fn compatibility_get(context: &Context) -> Result<ExitStatus> {
    let location = context.location()?;
    let store = CompatSetStore::new(&location.user_dir);
    emit(&CompatibilityView {
        current: store.current(),
        history: store.history(),
    })
}

pub(crate) async fn compatibility_post(context: &Context, items: &str) -> Result<ExitStatus> {
    let location = context.location()?;
    let items = read_items(items)?;
    let client = context.client()?;
    let _write = modusnap_locator::backend_lock(&location.backend_dir)
        .write_owned()
        .await;
    let runner = VenvRunner::new(&location.venv_python, &location.backend_dir);

    let profile = location.hardware_profile();
    let decisions: Vec<_> = items
        .iter()
        .map(|item| modusnap_audit::classify(item, &profile))
        .collect();
    let catalog_audit = modusnap_audit::summarize(&decisions);
    modusnap_audit::write_audit_files(&location.user_dir, &decisions)?;

    let selection = Selection {
        pack_keys: items.iter().map(|item| item.ui_key.clone()).collect(),
        pack_ids: items.iter().filter_map(|item| item.id.clone()).collect(),
    };
    let outcome =
        build_compatibility_set(&location, &runner, Some(&client), selection, Some(catalog_audit))
            .await?;
    emit(&outcome)
}
