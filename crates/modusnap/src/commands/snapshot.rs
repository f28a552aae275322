use anyhow::Result;

use crate::commands::{emit, Context, ExitStatus};

pub(crate) async fn list(context: &Context) -> Result<ExitStatus> {
    emit(&context.client()?.snapshot_list().await?)
}

pub(crate) async fn current(context: &Context) -> Result<ExitStatus> {
    emit(&context.client()?.snapshot_current().await?)
}

pub(crate) async fn save(context: &Context) -> Result<ExitStatus> {
    emit(&context.client()?.snapshot_save().await?)
}

pub(crate) async fn restore(context: &Context, target: &str) -> Result<ExitStatus> {
    emit(&context.client()?.snapshot_restore(target).await?)
}

pub(crate) async fn remove(context: &Context, target: &str) -> Result<ExitStatus> {
    emit(&context.client()?.snapshot_remove(target).await?)
}
