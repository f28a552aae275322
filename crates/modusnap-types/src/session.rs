use jiff::Timestamp;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionMode {
    Install,
    Uninstall,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionScope {
    Selected,
    AllVisible,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Pending,
    Queued,
    Done,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionItem {
    pub key: String,
    pub title: String,
    pub selected: bool,
    pub status: ItemStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// A long-running install/uninstall session over the engine's queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallSession {
    pub id: String,
    pub mode: SessionMode,
    pub scope: SessionScope,
    pub started_at: Timestamp,
    pub total: usize,
    pub completed: usize,
    pub remaining: usize,
    pub current_chunk: usize,
    pub total_chunks: usize,
    pub items: Vec<SessionItem>,
    pub logs: Vec<String>,
    pub running: bool,
    pub canceled: bool,
}

impl InstallSession {
    /// Recompute the derived counters from the item states.
    pub fn refresh_counts(&mut self) {
        self.completed = self
            .items
            .iter()
            .filter(|item| {
                matches!(
                    item.status,
                    ItemStatus::Done | ItemStatus::Failed | ItemStatus::Skipped
                )
            })
            .count();
        self.remaining = self.total.saturating_sub(self.completed);
    }
}
