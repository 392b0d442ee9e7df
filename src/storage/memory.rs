use chrono::Utc;
use parking_lot::Mutex;

use crate::domain::{ApplicationIdentity, DecisionKind, Durability, Outcome, RememberScope};

use super::entry::{self, RememberedEntry, StoreLine};
use super::pattern::OriginPattern;
use super::traits::{DecisionStore, StoreWarning};
use super::StoreError;

/// In-memory decision store for tests and unattended deployments without a
/// writable home directory.
#[derive(Default)]
pub struct MemoryDecisionStore {
    always: Mutex<Vec<StoreLine>>,
    once: Mutex<Vec<StoreLine>>,
    fail_writes: Mutex<bool>,
    warnings: Mutex<Vec<StoreWarning>>,
}

impl MemoryDecisionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a remembered answer directly (for testing).
    pub fn insert(&self, kind: DecisionKind, pattern: OriginPattern, outcome: Outcome) {
        entry::upsert(&mut self.always.lock(), &pattern, kind, outcome, Utc::now());
    }

    /// Make `Always` writes fail like a full disk (for testing).
    pub fn set_fail_writes(&self, fail: bool) {
        *self.fail_writes.lock() = fail;
    }

    /// Queue a warning to be drained by the next decision (for testing).
    pub fn push_warning(&self, warning: StoreWarning) {
        self.warnings.lock().push(warning);
    }
}

impl DecisionStore for MemoryDecisionStore {
    fn lookup(&self, kind: DecisionKind, identity: &ApplicationIdentity) -> Option<Outcome> {
        let origin = identity.origin_str();
        entry::find(&self.always.lock(), kind, origin)
            .or_else(|| entry::find(&self.once.lock(), kind, origin))
    }

    fn remember_scoped(
        &self,
        kind: DecisionKind,
        identity: &ApplicationIdentity,
        outcome: Outcome,
        durability: Durability,
        scope: RememberScope,
    ) -> Result<(), StoreError> {
        let pattern = OriginPattern::for_identity(identity, scope)?;
        let now = Utc::now();

        match durability {
            Durability::Always if *self.fail_writes.lock() => {
                entry::upsert(&mut self.once.lock(), &pattern, kind, outcome, now);
                Err(StoreError::Write {
                    path: "memory".into(),
                    source: std::io::Error::new(std::io::ErrorKind::Other, "writes disabled"),
                })
            }
            Durability::Always => {
                entry::upsert(&mut self.always.lock(), &pattern, kind, outcome, now);
                Ok(())
            }
            Durability::Once => {
                entry::upsert(&mut self.once.lock(), &pattern, kind, outcome, now);
                Ok(())
            }
        }
    }

    fn forget(&self, kind: DecisionKind, pattern: &str) -> Result<bool, StoreError> {
        let from_always = entry::remove(&mut self.always.lock(), kind, pattern);
        let from_once = entry::remove(&mut self.once.lock(), kind, pattern);
        Ok(from_always || from_once)
    }

    fn entries(&self) -> Vec<RememberedEntry> {
        let always = self.always.lock();
        let once = self.once.lock();

        always
            .iter()
            .flat_map(|line| line.entries(Durability::Always))
            .chain(once.iter().flat_map(|line| line.entries(Durability::Once)))
            .collect()
    }

    fn take_warnings(&self) -> Vec<StoreWarning> {
        std::mem::take(&mut *self.warnings.lock())
    }
}
