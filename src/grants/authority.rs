use serde::Deserialize;
use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::domain::ApplicationIdentity;
use crate::rules::LocationPattern;

use super::{Capability, CapabilityGrantSet};

/// Errors raised while loading or consulting a custom trust authority.
#[derive(Error, Debug)]
pub enum AuthorityError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid origin pattern in grant policy: {0}")]
    InvalidOrigin(String),

    #[error("Grant policy has no entry for {0}")]
    NoMatch(String),

    #[error("Custom trust authority unavailable: {0}")]
    Unavailable(String),
}

/// Site-specific grant policy that replaces the built-in grant sets for
/// allowed applications.
pub trait CustomAuthority: Send + Sync {
    fn name(&self) -> &str;

    /// Grant set for an allowed application, or an error when the
    /// authority cannot answer for it.
    fn resolve(&self, identity: &ApplicationIdentity) -> Result<CapabilityGrantSet, AuthorityError>;
}

#[derive(Debug, Deserialize)]
struct GrantPolicyDocument {
    #[serde(default)]
    grants: Vec<GrantPolicyEntry>,
}

#[derive(Debug, Deserialize)]
struct GrantPolicyEntry {
    origin: String,
    #[serde(default)]
    unrestricted: bool,
    #[serde(default)]
    capabilities: Vec<Capability>,
}

/// Grant policy loaded from a YAML file of origin globs and capability lists.
///
/// ```yaml
/// grants:
///   - origin: "https://*.corp.example.com/"
///     capabilities:
///       - kind: network_connect
///         host: "db.corp.example.com:5432"
///       - kind: clipboard
/// ```
///
/// Entries are tried in order; the first whose origin matches wins.
pub struct PolicyFileAuthority {
    name: String,
    entries: Vec<(LocationPattern, CapabilityGrantSet)>,
}

impl PolicyFileAuthority {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, AuthorityError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        Self::from_yaml(path.display().to_string(), &content)
    }

    pub fn from_yaml(name: impl Into<String>, yaml: &str) -> Result<Self, AuthorityError> {
        let document: GrantPolicyDocument = serde_yaml::from_str(yaml)?;

        let entries = document
            .grants
            .into_iter()
            .map(|entry| {
                let pattern = LocationPattern::new(&entry.origin)
                    .map_err(|_| AuthorityError::InvalidOrigin(entry.origin.clone()))?;
                let grants = if entry.unrestricted {
                    CapabilityGrantSet::unrestricted()
                } else {
                    CapabilityGrantSet::from_capabilities(entry.capabilities)
                };
                Ok((pattern, grants))
            })
            .collect::<Result<Vec<_>, AuthorityError>>()?;

        Ok(PolicyFileAuthority {
            name: name.into(),
            entries,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl CustomAuthority for PolicyFileAuthority {
    fn name(&self) -> &str {
        &self.name
    }

    fn resolve(
        &self,
        identity: &ApplicationIdentity,
    ) -> Result<CapabilityGrantSet, AuthorityError> {
        self.entries
            .iter()
            .find(|(pattern, _)| pattern.matches(identity.origin()))
            .map(|(_, grants)| grants.clone())
            .ok_or_else(|| AuthorityError::NoMatch(identity.origin_str().to_string()))
    }
}

/// Stands in for an authority that was configured but could not be loaded,
/// so allowed applications fall back to the sandbox set.
pub struct UnavailableAuthority {
    reason: String,
}

impl UnavailableAuthority {
    pub fn new(reason: impl Into<String>) -> Self {
        UnavailableAuthority {
            reason: reason.into(),
        }
    }
}

impl CustomAuthority for UnavailableAuthority {
    fn name(&self) -> &str {
        "unavailable"
    }

    fn resolve(
        &self,
        _identity: &ApplicationIdentity,
    ) -> Result<CapabilityGrantSet, AuthorityError> {
        Err(AuthorityError::Unavailable(self.reason.clone()))
    }
}

/// Load the configured authority. A path that cannot be loaded yields an
/// [`UnavailableAuthority`] rather than no authority at all.
pub fn load_authority(path: &Path) -> Box<dyn CustomAuthority> {
    match PolicyFileAuthority::load(path) {
        Ok(authority) => {
            tracing::info!(
                path = %path.display(),
                entries = authority.len(),
                "Loaded custom grant policy"
            );
            Box::new(authority)
        }
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "Custom grant policy unusable, allowed applications will be sandboxed"
            );
            Box::new(UnavailableAuthority::new(e.to_string()))
        }
    }
}
