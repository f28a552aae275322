//! Drives a dirty environment back to a green `pip check`.
//!
//! Three layers: the AutoHeal loop (canned recipes + extracted-spec
//! installs, bounded by a fixed point), the prune pass (remove conflicting
//! parents outside the protected set, reinstall the baselines), and the fix
//! engine that dispatches typed diagnostic issues onto repair plans.

pub use crate::autoheal::{auto_heal, AutoHealOutcome};
pub use crate::compat::{build_compatibility_set, CompatPipelineOutcome, Selection};
pub use crate::error::HealError;
pub use crate::fix::{FixEngine, FixOutcome, RestartDescriptor, RestartMethod};

mod autoheal;
mod compat;
mod error;
mod extract;
mod fix;
mod recipes;
mod step;
