use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::{ApplicationIdentity, Outcome};

/// What is being decided. Part of every remembered-answer key, so answers
/// to unrelated questions never collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DecisionKind {
    /// Unsigned code asks to run
    RunUnsignedApplication,
    /// Some of the code is signed, some is not
    AcceptPartialSignature,
    /// A required manifest attribute is absent
    GrantMissingManifestAttribute,
    /// Library code is loaded from a codebase outside the allowable list
    AllowLibraryCodebase,
    /// Signed by a publisher that does not chain to a trusted root
    TrustUnverifiedPublisher,
}

const ALLOW_SANDBOX_DENY: &[Outcome] = &[Outcome::Allow, Outcome::Sandbox, Outcome::Deny];
const ALLOW_DENY: &[Outcome] = &[Outcome::Allow, Outcome::Deny];

impl DecisionKind {
    pub const ALL: [DecisionKind; 5] = [
        DecisionKind::RunUnsignedApplication,
        DecisionKind::AcceptPartialSignature,
        DecisionKind::GrantMissingManifestAttribute,
        DecisionKind::AllowLibraryCodebase,
        DecisionKind::TrustUnverifiedPublisher,
    ];

    /// Stable key used in the store file.
    pub fn key(&self) -> &'static str {
        match self {
            DecisionKind::RunUnsignedApplication => "run-unsigned-application",
            DecisionKind::AcceptPartialSignature => "accept-partial-signature",
            DecisionKind::GrantMissingManifestAttribute => "grant-missing-manifest-attribute",
            DecisionKind::AllowLibraryCodebase => "allow-library-codebase",
            DecisionKind::TrustUnverifiedPublisher => "trust-unverified-publisher",
        }
    }

    /// Answers a renderer may give for this kind.
    pub fn allowed_answers(&self) -> &'static [Outcome] {
        match self {
            DecisionKind::RunUnsignedApplication
            | DecisionKind::AcceptPartialSignature
            | DecisionKind::TrustUnverifiedPublisher => ALLOW_SANDBOX_DENY,
            DecisionKind::GrantMissingManifestAttribute | DecisionKind::AllowLibraryCodebase => {
                ALLOW_DENY
            }
        }
    }

    pub fn accepts(&self, answer: Outcome) -> bool {
        self.allowed_answers().contains(&answer)
    }

    /// Answer given when the user cannot or may not be asked.
    pub fn default_negative(&self) -> Outcome {
        Outcome::Deny
    }

    /// Answer given when every prompt is pre-approved.
    pub fn default_positive(&self) -> Outcome {
        Outcome::Allow
    }

    pub fn title(&self) -> &'static str {
        match self {
            DecisionKind::RunUnsignedApplication => "Unsigned application",
            DecisionKind::AcceptPartialSignature => "Partially signed application",
            DecisionKind::GrantMissingManifestAttribute => "Missing security attribute",
            DecisionKind::AllowLibraryCodebase => "Untrusted library location",
            DecisionKind::TrustUnverifiedPublisher => "Unverified publisher",
        }
    }

    /// Prompt text for this kind, filled in for one application.
    pub fn message(&self, identity: &ApplicationIdentity) -> String {
        let title = &identity.title;
        let origin = identity.origin_str();
        match self {
            DecisionKind::RunUnsignedApplication => format!(
                "The application \"{title}\" from {origin} is not signed. Do you want to run it?"
            ),
            DecisionKind::AcceptPartialSignature => format!(
                "The application \"{title}\" from {origin} contains both signed and unsigned code. \
                 It can run with restricted access or not at all."
            ),
            DecisionKind::GrantMissingManifestAttribute => format!(
                "The application \"{title}\" from {origin} does not declare a required security \
                 attribute in its manifest. Do you want to run it anyway?"
            ),
            DecisionKind::AllowLibraryCodebase => format!(
                "The application \"{title}\" from {origin} loads code from a location it does not \
                 list as allowable. Do you want to allow it?"
            ),
            DecisionKind::TrustUnverifiedPublisher => format!(
                "The publisher of \"{title}\" from {origin} could not be verified. \
                 Do you want to trust this publisher?"
            ),
        }
    }
}

impl FromStr for DecisionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DecisionKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.key() == s)
            .ok_or_else(|| format!("unknown decision kind: {s}"))
    }
}

impl fmt::Display for DecisionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}
