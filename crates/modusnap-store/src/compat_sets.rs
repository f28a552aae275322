use std::path::{Path, PathBuf};

use modusnap_types::CompatibilitySet;

use crate::error::StoreError;
use crate::persist::{read_json_lenient, write_json_atomic};

/// History files retained under `compatibility_sets/`.
const MAX_HISTORY: usize = 50;

/// Persists the `current` compatibility set plus a bounded history.
#[derive(Debug, Clone)]
pub struct CompatSetStore {
    current_path: PathBuf,
    history_dir: PathBuf,
}

impl CompatSetStore {
    pub fn new(user_dir: &Path) -> Self {
        Self {
            current_path: user_dir.join("modusnap_compatible_hardware_set.json"),
            history_dir: user_dir.join("compatibility_sets"),
        }
    }

    pub fn current(&self) -> Option<CompatibilitySet> {
        read_json_lenient(&self.current_path)
    }

    /// Write `current` and a history entry, pruning history beyond the cap.
    pub fn save(&self, set: &CompatibilitySet) -> Result<(), StoreError> {
        write_json_atomic(&self.current_path, set)?;
        let history_path = self
            .history_dir
            .join(format!("compat_set_{}.json", set.lock_id));
        write_json_atomic(&history_path, set)?;
        self.prune()?;
        Ok(())
    }

    /// All history entries, newest first.
    pub fn history(&self) -> Vec<CompatibilitySet> {
        let mut sets: Vec<CompatibilitySet> = match fs_err::read_dir(&self.history_dir) {
            Ok(entries) => entries
                .filter_map(Result::ok)
                .filter(|entry| entry.path().extension().is_some_and(|ext| ext == "json"))
                .filter_map(|entry| read_json_lenient(&entry.path()))
                .collect(),
            Err(_) => Vec::new(),
        };
        sets.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        sets
    }

    fn prune(&self) -> Result<(), StoreError> {
        let sets = self.history();
        for stale in sets.iter().skip(MAX_HISTORY) {
            let path = self
                .history_dir
                .join(format!("compat_set_{}.json", stale.lock_id));
            if let Err(err) = fs_err::remove_file(&path) {
                tracing::warn!("Failed to prune {}: {err}", path.display());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use jiff::Timestamp;

    use modusnap_types::{CompatibilitySet, DependencyLock};

    use super::CompatSetStore;

    fn set(lock_id: &str, second: i64) -> CompatibilitySet {
        CompatibilitySet {
            lock_id: lock_id.to_string(),
            created_at: Timestamp::new(second, 0).unwrap(),
            hardware_profile: "unknown".to_string(),
            pip_healthy: true,
            pip_check_output: String::new(),
            selected_pack_keys: vec![],
            selected_pack_ids: vec![],
            dependency_lock: DependencyLock::default(),
            dependency_audit: None,
            catalog_audit: None,
        }
    }

    #[test]
    fn current_and_history() {
        let dir = tempfile::tempdir().unwrap();
        let store = CompatSetStore::new(dir.path());
        assert!(store.current().is_none());

        store.save(&set("l1", 100)).unwrap();
        store.save(&set("l2", 200)).unwrap();

        assert_eq!(store.current().unwrap().lock_id, "l2");
        let history = store.history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].lock_id, "l2");
    }

    #[test]
    fn history_is_pruned_to_cap() {
        let dir = tempfile::tempdir().unwrap();
        let store = CompatSetStore::new(dir.path());
        for i in 0..55 {
            store.save(&set(&format!("l{i}"), i)).unwrap();
        }
        let history = store.history();
        assert_eq!(history.len(), 50);
        // The newest survive.
        assert_eq!(history.first().unwrap().lock_id, "l54");
        assert_eq!(history.last().unwrap().lock_id, "l5");
    }
}
