use std::path::Path;

use anyhow::Result;
use serde::Serialize;

use crate::commands::{emit, Context, ExitStatus};

const MIN_LINES: usize = 20;
const MAX_LINES: usize = 500;
/// Never read more than this much of a log file.
const MAX_TAIL_BYTES: usize = 256 * 1024;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BackendStatus {
    up: bool,
    dir: std::path::PathBuf,
}

pub(crate) async fn status(context: &Context) -> Result<ExitStatus> {
    let location = context.location()?;
    let up = modusnap_locator::is_backend_reachable(&context.engine_url).await;
    emit(&BackendStatus {
        up,
        dir: location.backend_dir,
    })
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BackendLogs {
    backend_up: bool,
    comfy_log_path: std::path::PathBuf,
    restart_log_path: std::path::PathBuf,
    comfy_log_tail: String,
    restart_log_tail: String,
}

pub(crate) async fn logs(context: &Context, lines: usize) -> Result<ExitStatus> {
    let location = context.location()?;
    let lines = lines.clamp(MIN_LINES, MAX_LINES);
    let backend_up = modusnap_locator::is_backend_reachable(&context.engine_url).await;
    emit(&BackendLogs {
        backend_up,
        comfy_log_tail: tail_lines(&location.comfy_log, lines),
        restart_log_tail: tail_lines(&location.restart_log, lines),
        comfy_log_path: location.comfy_log,
        restart_log_path: location.restart_log,
    })
}

pub(crate) async fn settings_get(context: &Context) -> Result<ExitStatus> {
    emit(&context.client()?.settings_get().await?)
}

pub(crate) async fn settings_set(context: &Context, body: &str) -> Result<ExitStatus> {
    let body: serde_json::Value = serde_json::from_str(body)?;
    emit(&context.client()?.settings_post(&body).await?)
}

/// The last `lines` lines of a file, reading at most the final 256 KB.
fn tail_lines(path: &Path, lines: usize) -> String {
    let Ok(bytes) = fs_err::read(path) else {
        return String::new();
    };
    let start = bytes.len().saturating_sub(MAX_TAIL_BYTES);
    let tail = String::from_utf8_lossy(&bytes[start..]);
    let collected: Vec<&str> = tail.lines().collect();
    let skip = collected.len().saturating_sub(lines);
    collected[skip..].join("\n")
}
