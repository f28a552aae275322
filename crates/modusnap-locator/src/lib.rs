//! Resolves where the engine lives on disk and whether it is up.
//!
//! Every other component fails fast with the same structured error when no
//! valid backend location can be derived, so discovery lives in one place:
//! explicit override first, then a fixed list of candidate relative paths.

use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;
use tracing::debug;

use modusnap_types::{ErrorKind, HardwareProfile};

pub use crate::locks::backend_lock;

mod locks;

/// Environment override for the backend directory.
pub const ENV_BACKEND_DIR: &str = "MODUSNAP_BACKEND_DIR";
/// Environment override for the engine's base URL.
pub const ENV_ENGINE_URL: &str = "MODUSNAP_ENGINE_URL";
pub const DEFAULT_ENGINE_URL: &str = "http://localhost:8188";

/// Candidate directories checked, in order, relative to the working
/// directory, when no override is given.
const CANDIDATE_DIRS: &[&str] = &[
    ".",
    "ComfyUI",
    "comfy/ComfyUI",
    "../ComfyUI",
    "../comfy/ComfyUI",
];

/// A directory is a backend only if both marker files exist.
const MARKER_FILES: &[&str] = &["main.py", "requirements.txt"];

const REACHABILITY_TIMEOUT: Duration = Duration::from_millis(4500);

#[derive(Debug, Error)]
pub enum LocatorError {
    #[error(
        "backend directory not found (checked: {}); set MODUSNAP_BACKEND_DIR to the engine checkout containing main.py and requirements.txt",
        checked_list(.checked)
    )]
    BackendDirNotFound { checked: Vec<PathBuf> },
    #[error("`{0}` is not a backend directory (missing main.py or requirements.txt)")]
    InvalidBackendDir(PathBuf),
}

fn checked_list(checked: &[PathBuf]) -> String {
    checked
        .iter()
        .map(|path| path.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

impl LocatorError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::BackendDirNotFound
    }
}

/// Resolved paths for one engine checkout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendLocation {
    pub backend_dir: PathBuf,
    pub venv_python: PathBuf,
    pub user_dir: PathBuf,
    pub custom_nodes_dir: PathBuf,
    pub comfy_log: PathBuf,
    pub restart_log: PathBuf,
}

impl BackendLocation {
    /// Derive all paths from a validated backend directory.
    fn from_dir(backend_dir: PathBuf) -> Self {
        let venv_python = if cfg!(windows) {
            backend_dir.join("venv").join("Scripts").join("python.exe")
        } else {
            backend_dir.join("venv").join("bin").join("python")
        };
        let user_dir = backend_dir.join("user");
        Self {
            custom_nodes_dir: backend_dir.join("custom_nodes"),
            comfy_log: user_dir.join("comfyui.log"),
            restart_log: user_dir.join("modusnap_backend_restart.log"),
            venv_python,
            user_dir,
            backend_dir,
        }
    }

    pub fn venv_exists(&self) -> bool {
        self.venv_python.is_file()
    }

    pub fn requirements(&self) -> PathBuf {
        self.backend_dir.join("requirements.txt")
    }

    pub fn manager_requirements(&self) -> PathBuf {
        self.backend_dir.join("manager_requirements.txt")
    }

    /// The workspace start script used for detached restarts.
    pub fn start_script(&self) -> PathBuf {
        self.backend_dir.join("start.sh")
    }

    fn hardware_profile_marker(&self) -> PathBuf {
        self.user_dir.join("modusnap_hardware_profile")
    }

    /// Touched whenever the dependency state is brought in sync.
    pub fn dependency_sync_marker(&self) -> PathBuf {
        self.user_dir.join("modusnap_dependency_sync")
    }

    /// Read the hardware profile marker written by the engine bootstrap.
    /// Missing marker means `unknown`, with all flags false.
    pub fn hardware_profile(&self) -> HardwareProfile {
        match fs_err::read_to_string(self.hardware_profile_marker()) {
            Ok(token) => HardwareProfile::from_token(&token),
            Err(err) => {
                debug!("No hardware profile marker: {err}");
                HardwareProfile::unknown()
            }
        }
    }
}

fn is_backend_dir(dir: &Path) -> bool {
    MARKER_FILES.iter().all(|marker| dir.join(marker).is_file())
}

/// Resolve the backend location: explicit override, then the environment
/// variable, then the candidate list.
pub fn locate(override_dir: Option<&Path>) -> Result<BackendLocation, LocatorError> {
    if let Some(dir) = override_dir {
        return if is_backend_dir(dir) {
            Ok(BackendLocation::from_dir(dir.to_path_buf()))
        } else {
            Err(LocatorError::InvalidBackendDir(dir.to_path_buf()))
        };
    }

    if let Some(dir) = std::env::var_os(ENV_BACKEND_DIR) {
        let dir = PathBuf::from(dir);
        return if is_backend_dir(&dir) {
            Ok(BackendLocation::from_dir(dir))
        } else {
            Err(LocatorError::InvalidBackendDir(dir))
        };
    }

    let mut checked = Vec::new();
    for candidate in CANDIDATE_DIRS {
        let dir = PathBuf::from(candidate);
        if is_backend_dir(&dir) {
            debug!("Resolved backend directory to {}", dir.display());
            return Ok(BackendLocation::from_dir(dir));
        }
        checked.push(dir);
    }
    Err(LocatorError::BackendDirNotFound { checked })
}

/// The engine base URL, from the environment or the default.
pub fn engine_url() -> String {
    std::env::var(ENV_ENGINE_URL).unwrap_or_else(|_| DEFAULT_ENGINE_URL.to_string())
}

/// Whether the engine answers its readiness endpoint with a 2xx.
pub async fn is_backend_reachable(base_url: &str) -> bool {
    let client = match reqwest::Client::builder()
        .timeout(REACHABILITY_TIMEOUT)
        .build()
    {
        Ok(client) => client,
        Err(_) => return false,
    };
    let url = format!("{}/system_stats", base_url.trim_end_matches('/'));
    match client.get(&url).send().await {
        Ok(response) => response.status().is_success(),
        Err(err) => {
            debug!("Backend unreachable at {url}: {err}");
            false
        }
    }
}

/// Whether something is listening on `host:port`.
pub async fn is_port_listening(host: &str, port: u16, timeout: Duration) -> bool {
    matches!(
        tokio::time::timeout(timeout, tokio::net::TcpStream::connect((host, port))).await,
        Ok(Ok(_))
    )
}
