use regex::Regex;
use serde::{Serialize, Serializer};
use std::fmt;

use crate::domain::{ApplicationIdentity, RememberScope};

use super::StoreError;

/// Origin-matching regex of a remembered answer. Matches the whole origin string.
#[derive(Debug, Clone)]
pub struct OriginPattern {
    source: String,
    regex: Regex,
}

impl OriginPattern {
    /// Compile a stored pattern.
    pub fn new(source: impl Into<String>) -> Result<Self, StoreError> {
        let source = source.into();
        let regex = Regex::new(&format!("^(?:{})$", source))
            .map_err(|e| StoreError::Pattern(e.to_string()))?;
        Ok(OriginPattern { source, regex })
    }

    /// Pattern matching exactly `literal`.
    pub fn quote(literal: &str) -> Result<Self, StoreError> {
        Self::new(regex::escape(literal))
    }

    /// Pattern matching `literal` and anything that follows it.
    pub fn quote_and_star(literal: &str) -> Result<Self, StoreError> {
        Self::new(format!("{}.*", regex::escape(literal)))
    }

    /// Pattern covering an identity's origin for the given scope.
    pub fn for_identity(
        identity: &ApplicationIdentity,
        scope: RememberScope,
    ) -> Result<Self, StoreError> {
        match scope {
            RememberScope::Application => Self::quote(identity.origin_str()),
            RememberScope::Codebase => Self::quote_and_star(&identity.origin_directory()),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    #[inline]
    pub fn matches(&self, origin: &str) -> bool {
        self.regex.is_match(origin)
    }
}

impl PartialEq for OriginPattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl Eq for OriginPattern {}

impl fmt::Display for OriginPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl Serialize for OriginPattern {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.source)
    }
}
