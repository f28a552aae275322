use std::str::FromStr;

use anyhow::Result;

use modusnap_diagnostics::DiagnosticsEngine;
use modusnap_heal::FixEngine;
use modusnap_types::IssueId;

use crate::commands::{emit, Context, ExitStatus};

pub(crate) async fn status(context: &Context, deep: bool) -> Result<ExitStatus> {
    let location = context.location()?;
    // Diagnostics never wait on a writer.
    let _read = modusnap_locator::backend_lock(&location.backend_dir).try_read_owned();
    let engine = DiagnosticsEngine::new(location, context.client()?);
    emit(&engine.run(deep).await)
}

pub(crate) async fn fix(context: &Context, issue: &str) -> Result<ExitStatus> {
    let issue = IssueId::from_str(issue).map_err(anyhow::Error::msg)?;
    let location = context.location()?;
    let _write = modusnap_locator::backend_lock(&location.backend_dir)
        .write_owned()
        .await;
    let engine = FixEngine::new(location, context.client()?);
    let outcome = engine.apply(issue).await?;
    let ok = outcome.ok;
    let status = emit(&outcome)?;
    Ok(if ok { status } else { ExitStatus::Failure })
}
