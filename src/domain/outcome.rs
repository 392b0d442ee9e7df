use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Trust outcome for a launch attempt, ordered by privilege. `Deny` is
/// the least privileged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum Outcome {
    /// Launch refused
    Deny = 0,
    /// Launch with the sandbox grant set
    Sandbox = 1,
    /// Launch with the grant set the signing state and policy allow
    Allow = 2,
}

impl Outcome {
    /// Returns the less privileged of two outcomes.
    #[inline]
    pub fn min(self, other: Self) -> Self {
        std::cmp::min(self, other)
    }

    #[inline]
    pub fn is_denied(&self) -> bool {
        *self == Outcome::Deny
    }

    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Deny => "DENY",
            Outcome::Sandbox => "SANDBOX",
            Outcome::Allow => "ALLOW",
        }
    }
}

impl FromStr for Outcome {
    type Err = String;

    /// Accepts the current names plus the legacy `YES`/`NO` answers.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "ALLOW" | "YES" => Ok(Outcome::Allow),
            "SANDBOX" => Ok(Outcome::Sandbox),
            "DENY" | "NO" => Ok(Outcome::Deny),
            other => Err(format!("unknown outcome: {other}")),
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How long a remembered answer lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Durability {
    /// Current process only
    Once,
    /// Persisted to disk
    Always,
}

impl fmt::Display for Durability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Durability::Once => write!(f, "once"),
            Durability::Always => write!(f, "always"),
        }
    }
}

/// Which origins a remembered answer covers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RememberScope {
    /// Exactly this application's origin
    Application,
    /// Everything under the origin's directory
    #[default]
    Codebase,
}
