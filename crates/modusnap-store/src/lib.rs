//! Durable control-plane state, all of it under `<backend>/user/`.
//!
//! Every mutation is write-new-then-rename; reads tolerate truncated or
//! unparseable files by starting from empty. Nothing here holds locks:
//! stores are single-writer by the concurrency rules of the callers.

pub use crate::compat_sets::CompatSetStore;
pub use crate::error::StoreError;
pub use crate::keys::{ApiKey, KeyStore};
pub use crate::snapshots::SnapshotService;
pub use crate::tx_store::TxStore;

mod compat_sets;
mod error;
mod keys;
mod persist;
mod snapshots;
mod tx_store;

/// Directory under the user dir that holds transactions and freeze files.
pub(crate) const ENV_STATE_DIR: &str = "modusnap_manager_env";
