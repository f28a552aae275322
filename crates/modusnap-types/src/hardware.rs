use serde::{Deserialize, Serialize};

/// The host hardware profile, parsed from the marker token written by the
/// engine bootstrap (e.g. `linux-x86_64-nvidia:true-rocm:false`).
///
/// A missing or unreadable marker yields [`HardwareProfile::unknown`], which
/// carries no accelerator flags and never blocks anything on its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HardwareProfile {
    pub token: String,
    pub os: String,
    pub arch: String,
    pub has_nvidia: bool,
    pub has_rocm: bool,
}

impl HardwareProfile {
    pub const UNKNOWN_TOKEN: &'static str = "unknown";

    /// The profile used when no marker file exists.
    pub fn unknown() -> Self {
        Self {
            token: Self::UNKNOWN_TOKEN.to_string(),
            os: String::new(),
            arch: String::new(),
            has_nvidia: false,
            has_rocm: false,
        }
    }

    /// Parse a marker token of the form `{os}-{arch}-nvidia:{bool}-rocm:{bool}`.
    ///
    /// Tokens that don't follow the format degrade to a profile with the raw
    /// token preserved and all flags false.
    pub fn from_token(token: &str) -> Self {
        let token = token.trim();
        if token.is_empty() || token == Self::UNKNOWN_TOKEN {
            return Self::unknown();
        }

        let mut os = String::new();
        let mut arch = String::new();
        let mut has_nvidia = false;
        let mut has_rocm = false;

        let mut leading = Vec::new();
        for part in token.split('-') {
            if let Some(value) = part.strip_prefix("nvidia:") {
                has_nvidia = value == "true";
            } else if let Some(value) = part.strip_prefix("rocm:") {
                has_rocm = value == "true";
            } else {
                leading.push(part);
            }
        }
        if let Some(first) = leading.first() {
            os = (*first).to_string();
        }
        if leading.len() > 1 {
            arch = leading[1..].join("-");
        }

        Self {
            token: token.to_string(),
            os,
            arch,
            has_nvidia,
            has_rocm,
        }
    }

    pub fn is_unknown(&self) -> bool {
        self.token == Self::UNKNOWN_TOKEN
    }

    /// Apple Silicon hosts get their own warning rules.
    pub fn is_darwin_arm64(&self) -> bool {
        self.os == "darwin" && (self.arch == "arm64" || self.arch == "aarch64")
    }
}
