use anyhow::Result;

use modusnap_store::KeyStore;

use crate::commands::{emit, Context, ExitStatus};

fn store(context: &Context) -> Result<KeyStore> {
    Ok(KeyStore::new(&context.location()?.user_dir))
}

pub(crate) fn generate(context: &Context, label: &str) -> Result<ExitStatus> {
    emit(&store(context)?.generate(label)?)
}

pub(crate) fn list(context: &Context) -> Result<ExitStatus> {
    emit(&store(context)?.list())
}

pub(crate) fn revoke(context: &Context, id: &str) -> Result<ExitStatus> {
    let revoked = store(context)?.revoke(id)?;
    let status = emit(&serde_json::json!({ "revoked": revoked }))?;
    Ok(if revoked { status } else { ExitStatus::Failure })
}
