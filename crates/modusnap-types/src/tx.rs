use jiff::Timestamp;
use serde::{Deserialize, Serialize};

/// What a transaction does to the environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxKind {
    Repair,
    Install,
    Rollback,
}

/// Lifecycle state of an environment transaction.
///
/// Transitions are `planned → running → {succeeded | failed}`; a rollback
/// transaction ends in `rolled_back` instead of `succeeded`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxStatus {
    Planned,
    Running,
    Succeeded,
    Failed,
    RolledBack,
}

impl TxStatus {
    /// Whether `apply` may be invoked in this state.
    pub fn is_applicable(self) -> bool {
        matches!(self, Self::Planned | Self::Failed)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::RolledBack)
    }
}

/// One executed command inside a transaction. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvStep {
    pub id: String,
    pub command: String,
    pub started_at: Timestamp,
    pub finished_at: Timestamp,
    /// `None` when the process could not start or was killed on timeout.
    pub exit_status: Option<i32>,
    pub ok: bool,
    /// Combined stdout+stderr, truncated to at most 12 KB.
    pub output: String,
}

/// A durable record of one environment mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvTx {
    pub id: String,
    pub kind: TxKind,
    pub status: TxStatus,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    /// Sanitized package specifiers requested by the caller.
    pub requested_packages: Vec<String>,
    /// Human-readable plan, informational only.
    pub plan_commands: Vec<String>,
    /// Append-only.
    pub steps: Vec<EnvStep>,
    pub snapshot_before: Option<std::path::PathBuf>,
    pub snapshot_after: Option<std::path::PathBuf>,
    /// Outcome of the final `pip check` verification.
    pub pip_healthy: Option<bool>,
    pub pip_check_output: Option<String>,
    /// Id of the transaction this one undoes, if any.
    pub rollback_of: Option<String>,
    pub error: Option<String>,
}

impl EnvTx {
    pub fn summary(&self) -> EnvTxSummary {
        EnvTxSummary {
            id: self.id.clone(),
            kind: self.kind,
            status: self.status,
            created_at: self.created_at,
            updated_at: self.updated_at,
            steps: self.steps.len(),
            pip_healthy: self.pip_healthy,
            error: self.error.clone(),
        }
    }
}

/// The shape returned by `env.list`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvTxSummary {
    pub id: String,
    pub kind: TxKind,
    pub status: TxStatus,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub steps: usize,
    pub pip_healthy: Option<bool>,
    pub error: Option<String>,
}
