//! Long-running install/uninstall sessions: preflight, compatibility-set
//! refresh, chunked submission to the engine's queue, drain wait, reboot
//! cycling, and the post-install heal pass.

pub use crate::batch::{map_action, submit_batch, BatchOutcome, SkippedItem};
pub use crate::error::OrchestratorError;
pub use crate::session::{CancelFlag, Orchestrator, SessionRequest, SessionTuning};

mod batch;
mod error;
mod session;
