use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use modusnap_types::Snapshot;

use crate::error::StoreError;
use crate::persist::{read_json_lenient, write_json_atomic};

/// Snapshot metadata entries retained per hardware profile.
const MAX_HISTORY: usize = 50;

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SnapshotHistory {
    current: Option<String>,
    snapshots: Vec<Snapshot>,
}

/// Freeze snapshots: textual `pip freeze` listings plus per-profile
/// metadata with a `current` pointer.
#[derive(Debug, Clone)]
pub struct SnapshotService {
    dir: PathBuf,
}

impl SnapshotService {
    pub fn new(user_dir: &Path) -> Self {
        Self {
            dir: user_dir.join(crate::ENV_STATE_DIR).join("snapshots"),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Store a freeze listing under `<tag>.txt` and return its path.
    pub fn write_freeze(&self, tag: &str, freeze: &str) -> Result<PathBuf, StoreError> {
        fs_err::create_dir_all(&self.dir)?;
        let path = self.dir.join(format!("{tag}.txt"));
        let mut body = freeze.trim_end().to_string();
        body.push('\n');
        fs_err::write(&path, body)?;
        Ok(path)
    }

    pub fn read_freeze(&self, path: &Path) -> Result<String, StoreError> {
        if !path.is_file() {
            return Err(StoreError::UnknownSnapshot(path.display().to_string()));
        }
        Ok(fs_err::read_to_string(path)?)
    }

    fn history_path(&self, profile_token: &str) -> PathBuf {
        let sanitized: String = profile_token
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        self.dir.join(format!("history_{sanitized}.json"))
    }

    /// Record snapshot metadata and point `current` at it.
    pub fn record(&self, snapshot: Snapshot) -> Result<(), StoreError> {
        let path = self.history_path(&snapshot.hardware_profile);
        let mut history: SnapshotHistory = read_json_lenient(&path).unwrap_or_default();
        history.current = Some(snapshot.id.clone());
        history.snapshots.push(snapshot);
        if history.snapshots.len() > MAX_HISTORY {
            let excess = history.snapshots.len() - MAX_HISTORY;
            history.snapshots.drain(..excess);
        }
        write_json_atomic(&path, &history)
    }

    /// The snapshot `current` points at for the given profile.
    pub fn current(&self, profile_token: &str) -> Option<Snapshot> {
        let history: SnapshotHistory = read_json_lenient(&self.history_path(profile_token))?;
        let current = history.current?;
        history
            .snapshots
            .into_iter()
            .find(|snapshot| snapshot.id == current)
    }

    pub fn history(&self, profile_token: &str) -> Vec<Snapshot> {
        read_json_lenient::<SnapshotHistory>(&self.history_path(profile_token))
            .map(|history| history.snapshots)
            .unwrap_or_default()
    }
}
