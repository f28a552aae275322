//! Bounded subprocess execution against the engine's virtualenv.
//!
//! Every invocation funnels through one place so that the wall-clock
//! timeout, the working directory, the pip environment, and the output
//! truncation policy are applied uniformly. Failures are recorded, not
//! thrown: callers get an [`ExecRecord`] either way and decide what a
//! non-zero exit means for them.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tracing::debug;

/// Wall clock for package installs.
pub const INSTALL_TIMEOUT: Duration = Duration::from_secs(15 * 60);
/// Wall clock for interpreter probes.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(12);

/// Combined output is trimmed to this many bytes, keeping the tail.
pub const MAX_OUTPUT_BYTES: usize = 12 * 1024;

/// Canonical result of one subprocess run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecRecord {
    /// `None` when the process never started or was killed on timeout.
    pub exit_status: Option<i32>,
    pub ok: bool,
    /// Combined stdout+stderr, truncated to [`MAX_OUTPUT_BYTES`].
    pub output: String,
}

impl ExecRecord {
    /// A record for a process that could not start at all.
    pub fn synthetic(output: impl Into<String>) -> Self {
        Self {
            exit_status: None,
            ok: false,
            output: output.into(),
        }
    }
}

/// Keep the tail of the output; the interesting part of a long pip log is
/// the end.
pub fn truncate_output(output: &str) -> String {
    if output.len() <= MAX_OUTPUT_BYTES {
        return output.to_string();
    }
    let mut start = output.len() - MAX_OUTPUT_BYTES;
    while !output.is_char_boundary(start) {
        start += 1;
    }
    format!("[... output truncated ...]\n{}", &output[start..])
}

/// Runs commands with the virtualenv interpreter, rooted at the backend
/// directory.
#[derive(Debug, Clone)]
pub struct VenvRunner {
    python: PathBuf,
    backend_dir: PathBuf,
}

impl VenvRunner {
    pub fn new(python: impl Into<PathBuf>, backend_dir: impl Into<PathBuf>) -> Self {
        Self {
            python: python.into(),
            backend_dir: backend_dir.into(),
        }
    }

    pub fn python(&self) -> &Path {
        &self.python
    }

    pub fn exists(&self) -> bool {
        self.python.is_file()
    }

    /// The human-readable form of an invocation, used in plans and steps.
    pub fn describe(args: &[&str]) -> String {
        let mut command = String::from("python");
        for arg in args {
            command.push(' ');
            command.push_str(arg);
        }
        command
    }

    /// Run the interpreter with the given arguments. Never errors; a
    /// process that cannot start yields a synthetic failed record.
    pub async fn run(&self, args: &[&str], timeout: Duration) -> ExecRecord {
        if !self.exists() {
            return ExecRecord::synthetic(format!(
                "virtualenv interpreter not found at {}",
                self.python.display()
            ));
        }

        debug!("Running {} {}", self.python.display(), args.join(" "));
        let mut command = tokio::process::Command::new(&self.python);
        command
            .args(args)
            .current_dir(&self.backend_dir)
            .env("PIP_DISABLE_PIP_VERSION_CHECK", "1")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        match tokio::time::timeout(timeout, command.output()).await {
            Ok(Ok(output)) => {
                let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
                let stderr = String::from_utf8_lossy(&output.stderr);
                if !stderr.is_empty() {
                    if !combined.is_empty() && !combined.ends_with('\n') {
                        combined.push('\n');
                    }
                    combined.push_str(&stderr);
                }
                ExecRecord {
                    exit_status: output.status.code(),
                    ok: output.status.success(),
                    output: truncate_output(&combined),
                }
            }
            Ok(Err(err)) => ExecRecord::synthetic(format!(
                "failed to start {}: {err}",
                self.python.display()
            )),
            Err(_) => ExecRecord::synthetic(format!(
                "timed out after {}s: python {}",
                timeout.as_secs(),
                args.join(" ")
            )),
        }
    }

    async fn pip(&self, args: &[&str], timeout: Duration) -> ExecRecord {
        let mut full = vec!["-m", "pip"];
        full.extend_from_slice(args);
        self.run(&full, timeout).await
    }

    pub async fn pip_install_requirements(&self, file: &Path) -> ExecRecord {
        let file = file.to_string_lossy();
        self.pip(&["install", "-r", &file], INSTALL_TIMEOUT).await
    }

    pub async fn pip_install(&self, specs: &[&str], no_deps: bool) -> ExecRecord {
        let mut args = vec!["install"];
        if no_deps {
            args.push("--no-deps");
        }
        args.extend_from_slice(specs);
        self.pip(&args, INSTALL_TIMEOUT).await
    }

    pub async fn pip_uninstall(&self, packages: &[&str]) -> ExecRecord {
        let mut args = vec!["uninstall", "-y"];
        args.extend_from_slice(packages);
        self.pip(&args, INSTALL_TIMEOUT).await
    }

    pub async fn pip_check(&self) -> ExecRecord {
        self.pip(&["check"], PROBE_TIMEOUT).await
    }

    pub async fn pip_freeze(&self) -> ExecRecord {
        self.pip(&["freeze"], PROBE_TIMEOUT).await
    }

    pub async fn pip_list_json(&self) -> ExecRecord {
        self.pip(&["list", "--format=json"], PROBE_TIMEOUT).await
    }

    /// Run an inline `-c` script, for runtime probes.
    pub async fn probe(&self, script: &str, timeout: Duration) -> ExecRecord {
        self.run(&["-c", script], timeout).await
    }
}

/// Start the workspace's start script detached, with output appended to the
/// restart log. The child is unreferenced after spawn.
pub fn spawn_detached(start_script: &Path, backend_dir: &Path, log: &Path) -> std::io::Result<u32> {
    if let Some(parent) = log.parent() {
        fs_err::create_dir_all(parent)?;
    }
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log)?;
    let log_err = log_file.try_clone()?;

    let script = start_script.to_string_lossy();
    let child = std::process::Command::new("bash")
        .arg("-lc")
        .arg(script.as_ref())
        .current_dir(backend_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::from(log_file))
        .stderr(Stdio::from(log_err))
        .spawn()?;
    let pid = child.id();
    debug!("Started detached backend process, pid {pid}");
    // Intentionally not waited on.
    drop(child);
    Ok(pid)
}
