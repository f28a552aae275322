use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context as _, Result};
use serde::Serialize;

use modusnap_client::{EngineClient, EngineClientBuilder};
use modusnap_locator::{locate, BackendLocation};
use modusnap_types::{CatalogItem, PolicyTier};

use crate::printer::Printer;

pub(crate) mod backend;
pub(crate) mod diagnostics;
pub(crate) mod env;
pub(crate) mod keys;
pub(crate) mod manager;
pub(crate) mod snapshot;

#[derive(Copy, Clone)]
pub(crate) enum ExitStatus {
    /// The operation succeeded.
    Success,
    /// The operation failed in a way the caller can act on.
    Failure,
    /// The command failed with an unexpected error.
    Error,
}

impl From<ExitStatus> for ExitCode {
    fn from(status: ExitStatus) -> Self {
        match status {
            ExitStatus::Success => ExitCode::from(0),
            ExitStatus::Failure => ExitCode::from(1),
            ExitStatus::Error => ExitCode::from(2),
        }
    }
}

/// Everything a command needs that came from the global flags.
pub(crate) struct Context {
    pub(crate) backend_dir: Option<PathBuf>,
    pub(crate) engine_url: String,
    pub(crate) tier: PolicyTier,
    pub(crate) printer: Printer,
}

impl Context {
    pub(crate) fn location(&self) -> Result<BackendLocation> {
        Ok(locate(self.backend_dir.as_deref())?)
    }

    pub(crate) fn client(&self) -> Result<EngineClient> {
        Ok(EngineClientBuilder::new(self.engine_url.as_str()).build()?)
    }
}

/// Print the response-data shape as JSON on stdout.
pub(crate) fn emit<T: Serialize>(value: &T) -> Result<ExitStatus> {
    #[allow(clippy::print_stdout)]
    {
        println!("{}", serde_json::to_string_pretty(value)?);
    }
    Ok(ExitStatus::Success)
}

/// Read a JSON array of catalog items from a file, or stdin for `-`.
pub(crate) fn read_items(source: &str) -> Result<Vec<CatalogItem>> {
    let raw = if source == "-" {
        let mut buffer = String::new();
        std::io::stdin()
            .read_to_string(&mut buffer)
            .context("failed to read items from stdin")?;
        buffer
    } else {
        fs_err::read_to_string(source)?
    };
    serde_json::from_str(&raw).with_context(|| format!("invalid catalog items in `{source}`"))
}
