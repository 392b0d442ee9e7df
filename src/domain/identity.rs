use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use smallvec::SmallVec;
use std::fmt;
use url::Url;

/// Signing state of the application's code, as computed by the verifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SigningStatus {
    Unsigned,
    FullySigned,
    PartiallySigned,
}

impl SigningStatus {
    #[inline]
    pub fn is_fully_signed(&self) -> bool {
        *self == SigningStatus::FullySigned
    }
}

impl fmt::Display for SigningStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SigningStatus::Unsigned => write!(f, "UNSIGNED"),
            SigningStatus::FullySigned => write!(f, "FULLY_SIGNED"),
            SigningStatus::PartiallySigned => write!(f, "PARTIALLY_SIGNED"),
        }
    }
}

/// Permission level the application asks for in its descriptor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestedPermissions {
    Sandbox,
    ElevatedRuntime,
    #[default]
    All,
}

/// A DER-encoded certificate from the signer's chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Certificate(#[serde(with = "hex::serde")] Vec<u8>);

impl Certificate {
    pub fn from_der(der: impl Into<Vec<u8>>) -> Self {
        Certificate(der.into())
    }

    pub fn der(&self) -> &[u8] {
        &self.0
    }

    /// Uppercase hex SHA-256 fingerprint of the DER bytes, no separators.
    pub fn sha256_fingerprint(&self) -> String {
        hex::encode_upper(Sha256::digest(&self.0))
    }
}

/// Identity of one launch attempt. Built once by the launch pipeline and
/// never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationIdentity {
    /// Codebase the code was fetched from
    #[serde(deserialize_with = "deserialize_origin")]
    origin: Url,

    /// Human readable application title
    pub title: String,

    /// Signing state computed upstream
    pub signing: SigningStatus,

    /// Signer certificate chain, leaf first
    #[serde(default)]
    pub certificates: SmallVec<[Certificate; 4]>,

    /// Hosts (`host` or `host:port`) of the application's declared resources
    #[serde(default)]
    pub resource_hosts: Vec<String>,

    /// Permission level requested by the application descriptor
    #[serde(default)]
    pub requested: RequestedPermissions,
}

impl ApplicationIdentity {
    /// Create an identity; the origin is normalized (query and fragment stripped).
    pub fn new(origin: Url, title: impl Into<String>, signing: SigningStatus) -> Self {
        ApplicationIdentity {
            origin: normalize_origin(origin),
            title: title.into(),
            signing,
            certificates: SmallVec::new(),
            resource_hosts: Vec::new(),
            requested: RequestedPermissions::default(),
        }
    }

    /// Parse the origin and create an identity.
    pub fn parse(
        origin: &str,
        title: impl Into<String>,
        signing: SigningStatus,
    ) -> Result<Self, url::ParseError> {
        Ok(Self::new(Url::parse(origin)?, title, signing))
    }

    pub fn with_certificates(mut self, chain: impl IntoIterator<Item = Certificate>) -> Self {
        self.certificates = chain.into_iter().collect();
        self
    }

    pub fn with_resource_hosts(mut self, hosts: impl IntoIterator<Item = String>) -> Self {
        self.resource_hosts = hosts.into_iter().collect();
        self
    }

    pub fn with_requested(mut self, requested: RequestedPermissions) -> Self {
        self.requested = requested;
        self
    }

    pub fn origin(&self) -> &Url {
        &self.origin
    }

    /// Normalized origin as a string.
    pub fn origin_str(&self) -> &str {
        self.origin.as_str()
    }

    /// The origin with its final path segment removed, e.g.
    /// `http://host/apps/a.jnlp` becomes `http://host/apps/`.
    pub fn origin_directory(&self) -> String {
        if self.origin.cannot_be_a_base() {
            return self.origin.to_string();
        }
        let path = self.origin.path();
        let directory = match path.rfind('/') {
            Some(idx) => path[..=idx].to_string(),
            None => "/".to_string(),
        };
        let mut url = self.origin.clone();
        url.set_path(&directory);
        url.to_string()
    }

    /// Origin host, lowercased by URL parsing.
    pub fn host(&self) -> Option<&str> {
        self.origin.host_str()
    }

    /// `host:port` for the origin, using the scheme's default port when implicit.
    pub fn host_and_port(&self) -> Option<String> {
        let host = self.origin.host_str()?;
        match self.origin.port_or_known_default() {
            Some(port) => Some(format!("{}:{}", host, port)),
            None => Some(host.to_string()),
        }
    }

    /// SHA-256 fingerprints of every certificate on the chain.
    pub fn fingerprints(&self) -> impl Iterator<Item = String> + '_ {
        self.certificates.iter().map(Certificate::sha256_fingerprint)
    }
}

impl fmt::Display for ApplicationIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.title, self.origin)
    }
}

fn deserialize_origin<'de, D>(deserializer: D) -> Result<Url, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Url::deserialize(deserializer).map(normalize_origin)
}

fn normalize_origin(mut origin: Url) -> Url {
    origin.set_query(None);
    origin.set_fragment(None);
    origin
}
