use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};

use tokio::sync::RwLock;

/// The virtualenv is a write-exclusive resource. One lock per backend
/// directory, shared process-wide: mutating operations take the write
/// half, status and diagnostics use `try_read` so they never hold up a
/// writer.
static REGISTRY: OnceLock<Mutex<HashMap<PathBuf, Arc<RwLock<()>>>>> = OnceLock::new();

pub fn backend_lock(backend_dir: &Path) -> Arc<RwLock<()>> {
    let registry = REGISTRY.get_or_init(|| Mutex::new(HashMap::new()));
    let mut map = registry.lock().expect("backend lock registry poisoned");
    map.entry(backend_dir.to_path_buf()).or_default().clone()
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::backend_lock;

    #[tokio::test]
    async fn same_directory_shares_one_lock() {
        let a = backend_lock(Path::new("/tmp/engine"));
        let b = backend_lock(Path::new("/tmp/engine"));
        let _write = a.write_owned().await;
        // The second handle sees the writer.
        assert!(b.try_read().is_err());
    }

    #[tokio::test]
    async fn different_directories_do_not_contend() {
        let a = backend_lock(Path::new("/tmp/engine-a"));
        let b = backend_lock(Path::new("/tmp/engine-b"));
        let _write = a.write_owned().await;
        assert!(b.try_read().is_ok());
    }
}
