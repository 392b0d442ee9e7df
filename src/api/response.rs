use serde::Serialize;

use crate::arbiter::CorrelationId;
use crate::engine::Verdict;

/// Response to a launch decision.
#[derive(Debug, Serialize)]
pub struct DecideResponse {
    pub correlation_id: CorrelationId,

    #[serde(flatten)]
    pub verdict: Verdict,
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub renderer_registered: bool,
    pub pending_requests: usize,
}

/// Readiness check response.
#[derive(Debug, Serialize)]
pub struct ReadyResponse {
    pub ready: bool,
    pub rules: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rules_version: Option<String>,
}

/// Error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, code: impl Into<String>) -> Self {
        ErrorResponse {
            error: error.into(),
            code: code.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        ErrorResponse::new(message, "NOT_FOUND")
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        ErrorResponse::new(message, "INTERNAL_ERROR")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ApplicationIdentity, DecisionKind, SigningStatus, TrustLevelPolicy};
    use crate::engine::TrustEngine;
    use crate::rules::RuleSetCell;
    use crate::storage::MemoryDecisionStore;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_decide_response_serialization() {
        let engine = TrustEngine::new(
            Arc::new(RuleSetCell::empty()),
            Arc::new(MemoryDecisionStore::new()),
            Default::default(),
        );
        let identity =
            ApplicationIdentity::parse("http://example.com/", "Clock", SigningStatus::Unsigned)
                .unwrap();
        let verdict = engine
            .decide(&identity, DecisionKind::RunUnsignedApplication, TrustLevelPolicy::DenyAll)
            .await;

        let resp = DecideResponse {
            correlation_id: CorrelationId::new(),
            verdict,
        };
        let json = serde_json::to_value(&resp).unwrap();

        assert_eq!(json["outcome"], "DENY");
        assert_eq!(json["source"], "policy");
        assert!(json["reason"].as_str().unwrap().contains("forbids"));
        assert!(json.get("warnings").is_none());
    }

    #[test]
    fn test_error_response() {
        let resp = ErrorResponse::not_found("gone");
        assert_eq!(resp.code, "NOT_FOUND");
        assert_eq!(resp.error, "gone");
    }
}
