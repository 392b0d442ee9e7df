use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::domain::{ApplicationIdentity, DecisionKind, Durability, Outcome, RememberScope};

/// Identifies one caller's decision request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(Uuid);

impl CorrelationId {
    pub fn new() -> Self {
        CorrelationId(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for CorrelationId {
    fn from(id: Uuid) -> Self {
        CorrelationId(id)
    }
}

impl FromStr for CorrelationId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(CorrelationId)
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Requests for the same kind and origin share one prompt.
pub(crate) type CoalesceKey = (DecisionKind, String);

/// A question for the decision renderer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionRequest {
    pub correlation_id: CorrelationId,
    pub kind: DecisionKind,
    pub identity: ApplicationIdentity,
    /// Prompt text for the renderer
    pub message: String,
    /// Answers the renderer may give
    pub allowed_answers: Vec<Outcome>,
    pub submitted_at: DateTime<Utc>,
}

impl DecisionRequest {
    pub fn new(kind: DecisionKind, identity: ApplicationIdentity) -> Self {
        Self::with_id(CorrelationId::new(), kind, identity)
    }

    pub fn with_id(
        correlation_id: CorrelationId,
        kind: DecisionKind,
        identity: ApplicationIdentity,
    ) -> Self {
        DecisionRequest {
            correlation_id,
            kind,
            message: kind.message(&identity),
            allowed_answers: kind.allowed_answers().to_vec(),
            identity,
            submitted_at: Utc::now(),
        }
    }

    pub(crate) fn coalesce_key(&self) -> CoalesceKey {
        (self.kind, self.identity.origin_str().to_string())
    }
}

/// The renderer's answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionResponse {
    pub correlation_id: CorrelationId,
    pub outcome: Outcome,
    /// Set when the user asked to remember the answer
    #[serde(default)]
    pub remember: Option<Durability>,
    #[serde(default)]
    pub scope: RememberScope,
}

impl DecisionResponse {
    pub fn new(correlation_id: CorrelationId, outcome: Outcome) -> Self {
        DecisionResponse {
            correlation_id,
            outcome,
            remember: None,
            scope: RememberScope::default(),
        }
    }

    pub fn remembered(mut self, durability: Durability) -> Self {
        self.remember = Some(durability);
        self
    }

    pub fn with_scope(mut self, scope: RememberScope) -> Self {
        self.scope = scope;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::SigningStatus;

    #[test]
    fn test_request_carries_prompt() {
        let identity = ApplicationIdentity::parse(
            "http://example.com/app.jnlp?x=1",
            "Clock",
            SigningStatus::Unsigned,
        )
        .unwrap();
        let request = DecisionRequest::new(DecisionKind::GrantMissingManifestAttribute, identity);

        assert!(request.message.contains("Clock"));
        assert_eq!(request.allowed_answers, vec![Outcome::Allow, Outcome::Deny]);
        assert_eq!(
            request.coalesce_key(),
            (DecisionKind::GrantMissingManifestAttribute, "http://example.com/app.jnlp".to_string())
        );
    }

    #[test]
    fn test_response_json() {
        let id = CorrelationId::new();
        let json =
            format!(r#"{{"correlation_id":"{id}","outcome":"SANDBOX","remember":"always"}}"#);

        let response: DecisionResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(
            response,
            DecisionResponse::new(id, Outcome::Sandbox).remembered(Durability::Always)
        );
        assert_eq!(response.scope, RememberScope::Codebase);
    }

    #[test]
    fn test_correlation_id_parse() {
        let id = CorrelationId::new();
        assert_eq!(id.to_string().parse::<CorrelationId>().unwrap(), id);
        assert!("not-a-uuid".parse::<CorrelationId>().is_err());
    }
}
