use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use modusnap_types::EnvTx;

use crate::error::StoreError;
use crate::persist::{read_json_lenient, write_json_atomic};

/// Most-recent transactions retained on disk.
const MAX_TRANSACTIONS: usize = 200;

#[derive(Debug, Default, Serialize, Deserialize)]
struct TxFile {
    transactions: Vec<EnvTx>,
}

/// The persistent, bounded log of environment transactions.
#[derive(Debug, Clone)]
pub struct TxStore {
    path: PathBuf,
}

impl TxStore {
    pub fn new(user_dir: &Path) -> Self {
        Self {
            path: user_dir.join(crate::ENV_STATE_DIR).join("transactions.json"),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> TxFile {
        read_json_lenient(&self.path).unwrap_or_default()
    }

    fn save(&self, mut file: TxFile) -> Result<(), StoreError> {
        if file.transactions.len() > MAX_TRANSACTIONS {
            let excess = file.transactions.len() - MAX_TRANSACTIONS;
            file.transactions.drain(..excess);
        }
        write_json_atomic(&self.path, &file)
    }

    /// Append a freshly planned transaction.
    pub fn create(&self, tx: EnvTx) -> Result<(), StoreError> {
        let mut file = self.load();
        file.transactions.push(tx);
        self.save(file)
    }

    /// Replace an existing transaction by id.
    pub fn update(&self, tx: &EnvTx) -> Result<(), StoreError> {
        let mut file = self.load();
        let slot = file
            .transactions
            .iter_mut()
            .find(|existing| existing.id == tx.id)
            .ok_or_else(|| StoreError::UnknownTransaction(tx.id.clone()))?;
        *slot = tx.clone();
        self.save(file)
    }

    pub fn get(&self, id: &str) -> Option<EnvTx> {
        self.load()
            .transactions
            .into_iter()
            .find(|tx| tx.id == id)
    }

    /// All retained transactions, oldest first.
    pub fn list(&self) -> Vec<EnvTx> {
        self.load().transactions
    }

    pub fn latest(&self) -> Option<EnvTx> {
        self.load().transactions.pop()
    }

    pub fn count(&self) -> usize {
        self.load().transactions.len()
    }
}
