use serde::{Deserialize, Serialize};

/// Subscription tier of the backend. Each tier admits a fixed set of pack
/// license policies; anything unrecognized is always denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyTier {
    #[default]
    Free,
    Pro,
    Enterprise,
}

impl PolicyTier {
    fn allowed_policies(self) -> &'static [&'static str] {
        match self {
            Self::Free => &["open"],
            Self::Pro => &["open", "non-commercial"],
            Self::Enterprise => &["open", "non-commercial", "commercial"],
        }
    }
}

impl std::str::FromStr for PolicyTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "free" => Ok(Self::Free),
            "pro" => Ok(Self::Pro),
            "enterprise" => Ok(Self::Enterprise),
            other => Err(format!("unknown tier: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyDecision {
    pub allowed: bool,
    pub violations: Vec<String>,
}

/// Evaluate the requested pack policies against a tier.
///
/// Duplicates in the input produce a single violation entry.
pub fn evaluate_policy(tier: PolicyTier, policies: &[String]) -> PolicyDecision {
    let allowed = tier.allowed_policies();
    let mut violations = Vec::new();
    for policy in policies {
        if !allowed.contains(&policy.as_str()) && !violations.contains(policy) {
            violations.push(policy.clone());
        }
    }
    PolicyDecision {
        allowed: violations.is_empty(),
        violations,
    }
}
