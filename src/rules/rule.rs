use regex::Regex;
use serde::{Serialize, Serializer};
use std::fmt;
use url::Url;

use crate::domain::ApplicationIdentity;

use super::RuleSetError;

/// What a matching rule tells the engine to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleAction {
    /// Launch is allowed
    Run,
    /// Launch is refused
    Block,
    /// Defer to the trust level and remembered answers
    Default,
}

impl RuleAction {
    pub fn from_permission(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "run" => Some(RuleAction::Run),
            "block" => Some(RuleAction::Block),
            "default" => Some(RuleAction::Default),
            _ => None,
        }
    }
}

impl fmt::Display for RuleAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleAction::Run => write!(f, "run"),
            RuleAction::Block => write!(f, "block"),
            RuleAction::Default => write!(f, "default"),
        }
    }
}

/// SHA-256 certificate fingerprint, stored as uppercase hex without separators.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct CertificateHash(String);

impl CertificateHash {
    /// Accepts `AB:CD:...`, `abcd...` and whitespace-separated forms.
    pub fn parse(raw: &str) -> Result<Self, String> {
        let normalized: String = raw
            .chars()
            .filter(|c| *c != ':' && !c.is_whitespace())
            .collect::<String>()
            .to_uppercase();

        if normalized.len() != 64 || !normalized.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(format!("not a SHA-256 fingerprint: {raw}"));
        }

        Ok(CertificateHash(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[inline]
    pub fn matches(&self, fingerprint: &str) -> bool {
        self.0.eq_ignore_ascii_case(fingerprint)
    }
}

/// Location glob compiled to an anchored regex.
///
/// The pattern is `[scheme://]host[:port][/path]`. Scheme and host compare
/// case-insensitively. `*` matches any sequence within its component. A
/// missing port or path matches any, and a path ending in `/` matches
/// everything below it.
#[derive(Debug, Clone)]
pub struct LocationPattern {
    raw: String,
    regex: Regex,
}

impl LocationPattern {
    pub fn new(raw: &str) -> Result<Self, RuleSetError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(RuleSetError::InvalidLocation(raw.to_string()));
        }

        let (scheme, rest) = match trimmed.find("://") {
            Some(idx) => (Some(&trimmed[..idx]), &trimmed[idx + 3..]),
            None => (None, trimmed),
        };

        let (authority, path) = match rest.find('/') {
            Some(idx) => (&rest[..idx], Some(&rest[idx..])),
            None => (rest, None),
        };

        let (host, port) = split_port(authority);
        if host.is_empty() {
            return Err(RuleSetError::InvalidLocation(raw.to_string()));
        }

        let mut pattern = String::from("^");
        match scheme {
            Some(scheme) => {
                pattern.push_str("(?i:");
                pattern.push_str(&glob_to_regex(scheme, "[^:/]*"));
                pattern.push_str(")://");
            }
            None => pattern.push_str("[A-Za-z][A-Za-z0-9+.-]*://"),
        }

        pattern.push_str("(?i:");
        pattern.push_str(&glob_to_regex(host, "[^:/]*"));
        pattern.push(')');

        match port {
            Some(port) => {
                pattern.push(':');
                pattern.push_str(&glob_to_regex(port, "[0-9]*"));
            }
            None => pattern.push_str("(?::[0-9]+)?"),
        }

        match path {
            None => pattern.push_str("(?:/.*)?"),
            Some(path) if path.ends_with('/') => {
                pattern.push_str(&glob_to_regex(path, ".*"));
                pattern.push_str(".*");
            }
            Some(path) => pattern.push_str(&glob_to_regex(path, ".*")),
        }
        pattern.push('$');

        let regex = Regex::new(&pattern)
            .map_err(|_| RuleSetError::InvalidLocation(raw.to_string()))?;

        Ok(LocationPattern {
            raw: trimmed.to_string(),
            regex,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Match against an origin, with the port made explicit so that
    /// `https://host:443/` and `https://host/` compare the same.
    pub fn matches(&self, origin: &Url) -> bool {
        match (origin.host_str(), origin.port_or_known_default()) {
            (Some(host), Some(port)) => {
                let canonical = format!("{}://{}:{}{}", origin.scheme(), host, port, origin.path());
                self.regex.is_match(&canonical)
            }
            _ => self.regex.is_match(origin.as_str()),
        }
    }
}

impl PartialEq for LocationPattern {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl Serialize for LocationPattern {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.raw)
    }
}

fn split_port(authority: &str) -> (&str, Option<&str>) {
    match authority.rfind(':') {
        Some(idx) => {
            let port = &authority[idx + 1..];
            if !port.is_empty() && port.chars().all(|c| c.is_ascii_digit() || c == '*') {
                (&authority[..idx], Some(port))
            } else {
                (authority, None)
            }
        }
        None => (authority, None),
    }
}

/// `*` becomes `wildcard`; everything else is matched literally.
fn glob_to_regex(glob: &str, wildcard: &str) -> String {
    glob.split('*')
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(wildcard)
}

/// One entry of an enterprise rule set.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeploymentRule {
    /// Position in the document, starting at 1
    pub index: usize,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<LocationPattern>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub certificate_hash: Option<CertificateHash>,

    pub action: RuleAction,

    /// Shown to the user when the rule blocks a launch
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl DeploymentRule {
    /// A rule with no matcher at all.
    pub fn is_catch_all(&self) -> bool {
        self.location.is_none() && self.certificate_hash.is_none()
    }

    /// True when either matcher accepts the identity, or when the rule has none.
    pub fn matches(&self, identity: &ApplicationIdentity) -> bool {
        if self.is_catch_all() {
            return true;
        }

        let by_certificate = self
            .certificate_hash
            .as_ref()
            .map(|hash| identity.fingerprints().any(|fp| hash.matches(&fp)))
            .unwrap_or(false);

        by_certificate
            || self
                .location
                .as_ref()
                .map(|location| location.matches(identity.origin()))
                .unwrap_or(false)
    }

    /// Human readable reason for a block decision.
    pub fn block_reason(&self) -> String {
        match (&self.message, &self.title) {
            (Some(message), _) => message.clone(),
            (None, Some(title)) => format!("Blocked by deployment rule \"{title}\""),
            (None, None) => format!("Blocked by deployment rule #{}", self.index),
        }
    }
}
