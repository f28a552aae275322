//! A typed client for the engine's HTTP surface.
//!
//! All engine calls go through here so that per-endpoint timeouts, the
//! JSON-with-raw-text-fallback parse, and the mapping onto the error
//! taxonomy happen exactly once.

pub use crate::client::{EngineClient, EngineClientBuilder, QueueStatus, MANAGER_PROBE_PATHS};
pub use crate::error::ClientError;

mod client;
mod error;
