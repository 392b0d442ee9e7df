use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Globally configured trust level. Read-only for the duration of a decision.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrustLevelPolicy {
    /// Unsigned code runs without asking
    AllowUnsigned,
    /// Ask before running unsigned code
    #[default]
    AskUnsigned,
    /// Unsigned code never runs unless a rule or remembered answer says so
    DenyUnsigned,
    /// Nothing runs
    DenyAll,
}

impl TrustLevelPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrustLevelPolicy::AllowUnsigned => "ALLOW_UNSIGNED",
            TrustLevelPolicy::AskUnsigned => "ASK_UNSIGNED",
            TrustLevelPolicy::DenyUnsigned => "DENY_UNSIGNED",
            TrustLevelPolicy::DenyAll => "DENY_ALL",
        }
    }
}

impl FromStr for TrustLevelPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().replace('-', "_").as_str() {
            "ALLOW_UNSIGNED" => Ok(TrustLevelPolicy::AllowUnsigned),
            "ASK_UNSIGNED" => Ok(TrustLevelPolicy::AskUnsigned),
            "DENY_UNSIGNED" => Ok(TrustLevelPolicy::DenyUnsigned),
            "DENY_ALL" => Ok(TrustLevelPolicy::DenyAll),
            other => Err(format!("unknown trust level: {other}")),
        }
    }
}

impl fmt::Display for TrustLevelPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
