pub mod identity;
pub mod kind;
pub mod outcome;
pub mod policy;

pub use identity::{ApplicationIdentity, Certificate, RequestedPermissions, SigningStatus};
pub use kind::DecisionKind;
pub use outcome::{Durability, Outcome, RememberScope};
pub use policy::TrustLevelPolicy;
