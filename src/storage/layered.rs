use std::sync::Arc;

use crate::domain::{ApplicationIdentity, DecisionKind, Durability, Outcome, RememberScope};

use super::entry::RememberedEntry;
use super::traits::{DecisionStore, StoreWarning};
use super::StoreError;

/// User store consulted first, then an optional read-only system store.
/// Writes only ever go to the user store.
pub struct LayeredDecisionStore {
    user: Arc<dyn DecisionStore>,
    system: Option<Arc<dyn DecisionStore>>,
}

impl LayeredDecisionStore {
    pub fn new(user: Arc<dyn DecisionStore>, system: Option<Arc<dyn DecisionStore>>) -> Self {
        LayeredDecisionStore { user, system }
    }
}

impl DecisionStore for LayeredDecisionStore {
    fn lookup(&self, kind: DecisionKind, identity: &ApplicationIdentity) -> Option<Outcome> {
        self.user
            .lookup(kind, identity)
            .or_else(|| self.system.as_ref().and_then(|s| s.lookup(kind, identity)))
    }

    fn remember_scoped(
        &self,
        kind: DecisionKind,
        identity: &ApplicationIdentity,
        outcome: Outcome,
        durability: Durability,
        scope: RememberScope,
    ) -> Result<(), StoreError> {
        self.user.remember_scoped(kind, identity, outcome, durability, scope)
    }

    fn forget(&self, kind: DecisionKind, pattern: &str) -> Result<bool, StoreError> {
        self.user.forget(kind, pattern)
    }

    fn entries(&self) -> Vec<RememberedEntry> {
        let mut entries = self.user.entries();
        if let Some(system) = &self.system {
            entries.extend(system.entries());
        }
        entries
    }

    fn take_warnings(&self) -> Vec<StoreWarning> {
        let mut warnings = self.user.take_warnings();
        if let Some(system) = &self.system {
            warnings.extend(system.take_warnings());
        }
        warnings
    }
}
