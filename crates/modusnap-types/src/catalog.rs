use serde::{Deserialize, Serialize};

/// How a pack is installed into the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum InstallType {
    /// Registry install; requires an `id`.
    #[serde(rename = "cnr")]
    Cnr,
    /// Clone from a repository URL.
    #[serde(rename = "git-clone")]
    GitClone,
    #[serde(other, rename = "unknown")]
    #[default]
    Unknown,
}

/// Item states that mean "already present in the engine"; such items are
/// filtered out of install sessions before preflight.
pub const INSTALLED_STATES: &[&str] = &[
    "enabled",
    "disabled",
    "updatable",
    "try-update",
    "uninstall",
    "import-fail",
    "invalid-installation",
];

/// A catalog entry as handed to the control plane by the caller.
///
/// Catalog payloads arrive with uneven field sets depending on the source
/// channel, so everything beyond `ui_key` and `title` is optional and
/// alternative key spellings are normalized at deserialization.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogItem {
    /// Caller-provided key, preserved through preflight and install reports.
    #[serde(alias = "ui_key", alias = "key")]
    pub ui_key: String,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub title: String,
    #[serde(default, alias = "install_type")]
    pub install_type: InstallType,
    #[serde(default, alias = "repo", alias = "repo_url")]
    pub repository: Option<String>,
    #[serde(default)]
    pub reference: Option<String>,
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default, alias = "selected_version", alias = "version")]
    pub selected_version: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub author: String,
    /// Engine-reported state, if the item is known to the engine.
    #[serde(default)]
    pub state: Option<String>,
    /// Approximate on-disk size in KB, when the catalog knows it.
    #[serde(default, alias = "size_kb")]
    pub size: Option<u64>,
    #[serde(default)]
    pub selected: bool,
}

impl CatalogItem {
    /// Whether the engine already has this item in some installed state.
    pub fn is_installed(&self) -> bool {
        self.state
            .as_deref()
            .is_some_and(|state| INSTALLED_STATES.contains(&state))
    }

    /// The lowercased text blob the compatibility rules match against.
    pub fn audit_blob(&self) -> String {
        let mut blob = String::new();
        for part in [
            self.id.as_deref().unwrap_or_default(),
            &self.title,
            &self.author,
            &self.description,
            self.repository.as_deref().unwrap_or_default(),
            self.reference.as_deref().unwrap_or_default(),
        ] {
            blob.push_str(part);
            blob.push(' ');
        }
        for file in &self.files {
            blob.push_str(file);
            blob.push(' ');
        }
        blob.to_lowercase()
    }

    /// Recover a git URL from the looser fields, for cnr items missing an id.
    pub fn recoverable_git_url(&self) -> Option<String> {
        [
            self.repository.as_deref(),
            self.reference.as_deref(),
            self.files.first().map(String::as_str),
        ]
        .into_iter()
        .flatten()
        .find(|candidate| candidate.starts_with("http://") || candidate.starts_with("https://"))
        .map(ToString::to_string)
    }
}
