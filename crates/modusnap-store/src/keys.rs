use std::path::{Path, PathBuf};

use jiff::Timestamp;
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::persist::{read_json_lenient, write_json_atomic};

/// Keys retained per backend.
const MAX_KEYS: usize = 100;
const KEY_PREFIX: &str = "msnp_";
const KEY_BYTES: usize = 24;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiKey {
    pub id: String,
    pub label: String,
    pub key: String,
    pub created_at: Timestamp,
    pub revoked: bool,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct KeyFile {
    keys: Vec<ApiKey>,
}

/// The static API keys the engine issues for the control-plane surface.
#[derive(Debug, Clone)]
pub struct KeyStore {
    path: PathBuf,
}

impl KeyStore {
    pub fn new(user_dir: &Path) -> Self {
        Self {
            path: user_dir.join("modusnap_api_keys.json"),
        }
    }

    fn load(&self) -> KeyFile {
        read_json_lenient(&self.path).unwrap_or_default()
    }

    /// Mint a new key. When the store is at capacity, revoked keys are
    /// evicted first; a store full of live keys refuses.
    pub fn generate(&self, label: &str) -> Result<ApiKey, StoreError> {
        let mut file = self.load();
        if file.keys.len() >= MAX_KEYS {
            if let Some(idx) = file.keys.iter().position(|key| key.revoked) {
                file.keys.remove(idx);
            } else {
                return Err(StoreError::KeyStoreFull(file.keys.len()));
            }
        }

        let mut bytes = [0u8; KEY_BYTES];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        let hex: String = bytes.iter().map(|b| format!("{b:02x}")).collect();

        let key = ApiKey {
            id: nanoid::nanoid!(),
            label: label.to_string(),
            key: format!("{KEY_PREFIX}{hex}"),
            created_at: Timestamp::now(),
            revoked: false,
        };
        file.keys.push(key.clone());
        write_json_atomic(&self.path, &file)?;
        Ok(key)
    }

    pub fn list(&self) -> Vec<ApiKey> {
        self.load().keys
    }

    /// Returns false when the id is unknown.
    pub fn revoke(&self, id: &str) -> Result<bool, StoreError> {
        let mut file = self.load();
        let Some(key) = file.keys.iter_mut().find(|key| key.id == id) else {
            return Ok(false);
        };
        key.revoked = true;
        write_json_atomic(&self.path, &file)?;
        Ok(true)
    }

    /// Whether the presented key matches a live stored key.
    pub fn verify(&self, presented: &str) -> bool {
        self.load()
            .keys
            .iter()
            .any(|key| !key.revoked && key.key == presented)
    }
}
