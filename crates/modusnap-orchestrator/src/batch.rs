use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use modusnap_client::EngineClient;
use modusnap_types::{CatalogItem, InstallType};

use crate::error::OrchestratorError;

/// Map the caller's verb onto the engine's queue action.
pub fn map_action(mode: &str) -> &str {
    match mode {
        "enable" | "switch" | "try-install" => "install",
        "try-update" => "update",
        other => other,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkippedItem {
    pub key: String,
    pub reason: String,
}

/// Response of `manager.batch`: the engine's reply plus what we refused to
/// send.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchOutcome {
    pub response: Value,
    pub queue_start_status: String,
    pub skipped: Vec<SkippedItem>,
}

/// Normalize items for submission. Registry items without an id are
/// rewritten to git clones when a URL can be recovered; clones without a
/// repository are dropped with a reason.
pub(crate) fn classify_for_submission(items: Vec<CatalogItem>) -> (Vec<CatalogItem>, Vec<SkippedItem>) {
    let mut accepted = Vec::new();
    let mut skipped = Vec::new();
    for mut item in items {
        match item.install_type {
            InstallType::Cnr if item.id.is_none() => {
                if let Some(url) = item.recoverable_git_url() {
                    debug!("Rewriting {} to git-clone via {url}", item.ui_key);
                    item.install_type = InstallType::GitClone;
                    item.repository = Some(url);
                    accepted.push(item);
                } else {
                    skipped.push(SkippedItem {
                        key: item.ui_key,
                        reason: "registry item has no id and no recoverable repository url"
                            .to_string(),
                    });
                }
            }
            InstallType::GitClone => {
                if item.repository.is_none() {
                    if let Some(url) = item.recoverable_git_url() {
                        item.repository = Some(url);
                        accepted.push(item);
                    } else {
                        skipped.push(SkippedItem {
                            key: item.ui_key,
                            reason: "git-clone item has no repository url".to_string(),
                        });
                    }
                } else {
                    accepted.push(item);
                }
            }
            _ => accepted.push(item),
        }
    }
    (accepted, skipped)
}

/// Build the `{batch_id, <action>: items}` payload.
pub(crate) fn batch_payload(batch_id: &str, action: &str, items: &[CatalogItem]) -> Value {
    json!({
        "batch_id": batch_id,
        action: items,
    })
}

/// The `manager.batch` operation: one normalized submission plus the
/// queue-start kick.
pub async fn submit_batch(
    client: &EngineClient,
    mode: &str,
    batch_id: &str,
    items: Vec<CatalogItem>,
) -> Result<BatchOutcome, OrchestratorError> {
    if items.is_empty() {
        return Err(OrchestratorError::InvalidArg("no items to submit".to_string()));
    }
    let action = map_action(mode);
    let (accepted, skipped) = classify_for_submission(items);
    if accepted.is_empty() {
        return Err(OrchestratorError::InvalidArg(
            "no submittable items after normalization".to_string(),
        ));
    }

    let payload = batch_payload(batch_id, action, &accepted);
    let response = client.queue_batch(&payload).await?;
    let queue_start_status = match client.queue_start().await {
        Ok(_) => "ok".to_string(),
        Err(err) => err.to_string(),
    };
    Ok(BatchOutcome {
        response,
        queue_start_status,
        skipped,
    })
}

#[cfg(test)]
mod tests {
    use modusnap_types::{CatalogItem, InstallType};

    use super::{batch_payload, classify_for_submission, map_action};

    #[test]
    fn action_mapping() {
        assert_eq!(map_action("enable"), "install");
        assert_eq!(map_action("switch"), "install");
        assert_eq!(map_action("try-install"), "install");
        assert_eq!(map_action("try-update"), "update");
        assert_eq!(map_action("uninstall"), "uninstall");
        assert_eq!(map_action("disable"), "disable");
    }

    #[test]
    fn cnr_without_id_is_rewritten_when_a_url_exists() {
        let item = CatalogItem {
            ui_key: "k".to_string(),
            install_type: InstallType::Cnr,
            reference: Some("https://github.com/acme/pack".to_string()),
            ..CatalogItem::default()
        };
        let (accepted, skipped) = classify_for_submission(vec![item]);
        assert!(skipped.is_empty());
        assert_eq!(accepted[0].install_type, InstallType::GitClone);
        assert_eq!(accepted[0].repository.as_deref(), Some("https://github.com/acme/pack"));
    }

    #[test]
    fn cnr_without_id_or_url_is_dropped() {
        let item = CatalogItem {
            ui_key: "k".to_string(),
            install_type: InstallType::Cnr,
            ..CatalogItem::default()
        };
        let (accepted, skipped) = classify_for_submission(vec![item]);
        assert!(accepted.is_empty());
        assert_eq!(skipped[0].key, "k");
        assert!(skipped[0].reason.contains("no recoverable repository url"));
    }

    #[test]
    fn git_clone_requires_a_repository() {
        let item = CatalogItem {
            ui_key: "k".to_string(),
            install_type: InstallType::GitClone,
            ..CatalogItem::default()
        };
        let (accepted, skipped) = classify_for_submission(vec![item]);
        assert!(accepted.is_empty());
        assert!(skipped[0].reason.contains("no repository url"));
    }

    #[test]
    fn unknown_items_pass_through() {
        let item = CatalogItem {
            ui_key: "k".to_string(),
            install_type: InstallType::Unknown,
            ..CatalogItem::default()
        };
        let (accepted, skipped) = classify_for_submission(vec![item]);
        assert_eq!(accepted.len(), 1);
        assert!(skipped.is_empty());
    }

    #[test]
    fn payload_uses_the_action_as_the_key() {
        let item = CatalogItem {
            ui_key: "k".to_string(),
            id: Some("acme-pack".to_string()),
            install_type: InstallType::Cnr,
            ..CatalogItem::default()
        };
        let payload = batch_payload("session-1", "install", &[item]);
        assert_eq!(payload["batch_id"], "session-1");
        assert!(payload["install"].is_array());
        assert_eq!(payload["install"][0]["id"], "acme-pack");
    }
}
