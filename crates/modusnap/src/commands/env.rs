use std::fmt::Write;

use anyhow::Result;
use owo_colors::OwoColorize;
use serde::Serialize;

use modusnap_env::TxEngine;
use modusnap_types::{EnvTx, TxKind, TxStatus};

use crate::commands::{emit, Context, ExitStatus};

#[derive(Serialize)]
struct TxResponse {
    ok: bool,
    transaction: EnvTx,
}

fn engine(context: &Context) -> Result<TxEngine> {
    Ok(TxEngine::new(context.location()?, context.tier))
}

pub(crate) async fn status(context: &Context) -> Result<ExitStatus> {
    let location = context.location()?;
    // Status never waits on a writer.
    let _read = modusnap_locator::backend_lock(&location.backend_dir).try_read_owned();
    emit(&TxEngine::new(location, context.tier).status().await)
}

pub(crate) fn plan(
    context: &Context,
    kind: TxKind,
    packages: Vec<String>,
    policies: Vec<String>,
) -> Result<ExitStatus> {
    let transaction = engine(context)?.create_plan(kind, &packages, &policies)?;
    emit(&TxResponse {
        ok: true,
        transaction,
    })
}

pub(crate) async fn apply(context: &Context, id: &str) -> Result<ExitStatus> {
    let location = context.location()?;
    let _write = modusnap_locator::backend_lock(&location.backend_dir)
        .write_owned()
        .await;
    let engine = TxEngine::new(location, context.tier);
    let mut printer = context.printer;
    writeln!(printer, "Applying transaction {}", id.cyan())?;
    let transaction = engine.apply(id).await?;
    let ok = transaction.status == TxStatus::Succeeded;
    let status = emit(&TxResponse { ok, transaction })?;
    Ok(if ok { status } else { ExitStatus::Failure })
}

pub(crate) async fn rollback(context: &Context, id: &str) -> Result<ExitStatus> {
    let location = context.location()?;
    let _write = modusnap_locator::backend_lock(&location.backend_dir)
        .write_owned()
        .await;
    let engine = TxEngine::new(location, context.tier);
    let mut printer = context.printer;
    writeln!(printer, "Rolling back transaction {}", id.cyan())?;
    let transaction = engine.rollback(id).await?;
    let ok = transaction.status == TxStatus::RolledBack;
    let status = emit(&TxResponse { ok, transaction })?;
    Ok(if ok { status } else { ExitStatus::Failure })
}

pub(crate) fn list(context: &Context) -> Result<ExitStatus> {
    emit(&engine(context)?.list())
}

pub(crate) fn get(context: &Context, id: &str) -> Result<ExitStatus> {
    emit(&engine(context)?.get(id)?)
}
