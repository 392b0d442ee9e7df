pub mod hot_reload;
pub mod loader;
pub mod parser;
pub mod rule;

pub use hot_reload::RuleSetWatcher;
pub use loader::{RuleSetCell, RuleSetLoader};
pub use parser::{load_rules, parse_document, parse_package};
pub use rule::{CertificateHash, DeploymentRule, LocationPattern, RuleAction};

use thiserror::Error;

use crate::domain::ApplicationIdentity;

/// Errors raised while reading or parsing a rule package.
#[derive(Error, Debug)]
pub enum RuleSetError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Rule package error: {0}")]
    Package(String),

    #[error("Rule package does not contain {0}")]
    MissingDocument(&'static str),

    #[error("XML parsing error: {0}")]
    Xml(String),

    #[error("Rule document has no root element")]
    MissingRoot,

    #[error("Unexpected root element <{0}>")]
    UnexpectedRoot(String),

    #[error("Rule document contains no rules")]
    NoRules,

    #[error("Invalid location pattern: {0:?}")]
    InvalidLocation(String),

    #[error("Rule {index}: {reason}")]
    InvalidRule { index: usize, reason: String },
}

/// Ordered deployment rules from one rule package.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    pub rules: Vec<DeploymentRule>,
    /// `version` attribute of the `<ruleset>` root, if any
    pub version: Option<String>,
    /// Hex SHA-256 of the package bytes
    pub digest: Option<String>,
}

impl RuleSet {
    /// Rule set with no rules; every evaluation defers to policy.
    pub fn empty() -> Self {
        RuleSet::default()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// First rule in document order that matches the identity.
    pub fn evaluate(&self, identity: &ApplicationIdentity) -> Option<&DeploymentRule> {
        evaluate(&self.rules, identity)
    }
}

/// First rule in order that matches. Pure; the same inputs always give the same rule.
pub fn evaluate<'a>(
    rules: &'a [DeploymentRule],
    identity: &ApplicationIdentity,
) -> Option<&'a DeploymentRule> {
    rules.iter().find(|rule| rule.matches(identity))
}
