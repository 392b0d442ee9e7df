pub mod api;
pub mod arbiter;
pub mod config;
pub mod domain;
pub mod engine;
pub mod grants;
pub mod observability;
pub mod rules;
pub mod storage;

pub use arbiter::{DecisionArbiter, DecisionRequest, DecisionResponse};
pub use config::{Config, TrustSettings};
pub use domain::{ApplicationIdentity, DecisionKind, Outcome, TrustLevelPolicy};
pub use engine::{TrustEngine, Verdict};
pub use grants::CapabilityGrantSet;
pub use rules::RuleSet;
pub use storage::DecisionStore;
