use std::io::Write;
use std::path::Path;

use serde::Serialize;

use crate::error::StoreError;

/// Serialize `value` next to `path` and swap it into place with a rename,
/// so readers never observe a partial file.
pub(crate) fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs_err::create_dir_all(dir)?;
    let mut file = tempfile::NamedTempFile::new_in(dir)?;
    serde_json::to_writer_pretty(&mut file, value)?;
    file.write_all(b"\n")?;
    file.persist(path).map_err(|err| StoreError::Io(err.error))?;
    Ok(())
}

/// Read a JSON file, treating a missing, truncated, or unparseable file as
/// `None`.
pub(crate) fn read_json_lenient<T: serde::de::DeserializeOwned>(path: &Path) -> Option<T> {
    let raw = fs_err::read_to_string(path).ok()?;
    match serde_json::from_str(&raw) {
        Ok(value) => Some(value),
        Err(err) => {
            tracing::warn!("Discarding unreadable state file {}: {err}", path.display());
            None
        }
    }
}
