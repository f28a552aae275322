//! Transactional mutation of the engine's virtualenv: plan, apply with
//! snapshot-before/after and per-step persistence, verify with `pip check`,
//! roll back from the freeze snapshot.

pub use crate::engine::{EnvStatus, TxEngine};
pub use crate::error::EnvError;
pub use crate::sanitize::sanitize_packages;

mod engine;
mod error;
mod sanitize;
