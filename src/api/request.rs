use serde::Deserialize;

use crate::arbiter::CorrelationId;
use crate::domain::{ApplicationIdentity, DecisionKind, TrustLevelPolicy};

/// Request for a launch decision.
#[derive(Debug, Deserialize)]
pub struct DecideRequest {
    pub identity: ApplicationIdentity,

    /// Question being decided
    #[serde(default = "default_kind")]
    pub kind: DecisionKind,

    /// Overrides the configured trust level
    #[serde(default)]
    pub policy: Option<TrustLevelPolicy>,

    /// Lets the caller cancel the prompt while it is pending
    #[serde(default)]
    pub correlation_id: Option<CorrelationId>,
}

fn default_kind() -> DecisionKind {
    DecisionKind::RunUnsignedApplication
}

/// Renderer failure report.
#[derive(Debug, Deserialize)]
pub struct FailRequest {
    pub correlation_id: CorrelationId,
    pub reason: String,
}

/// Remembered answer to remove.
#[derive(Debug, Deserialize)]
pub struct ForgetRequest {
    pub kind: DecisionKind,
    /// Exact pattern source as listed by `GET /v1/remembered`
    pub pattern: String,
}
