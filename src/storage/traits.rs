use std::path::PathBuf;
use thiserror::Error;

use crate::domain::{ApplicationIdentity, DecisionKind, Durability, Outcome, RememberScope};

use super::entry::RememberedEntry;
use super::StoreError;

/// Non-fatal store condition, handed to the caller instead of an error.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreWarning {
    #[error("store {path:?} could not be read: {reason}")]
    Unreadable { path: PathBuf, reason: String },

    #[error("store {path:?} has version {found:?}, expected {expected}; treated as empty")]
    VersionMismatch {
        path: PathBuf,
        found: Option<String>,
        expected: &'static str,
        backup: Option<PathBuf>,
    },

    #[error("store {path:?}: skipped {count} malformed line(s)")]
    SkippedLines { path: PathBuf, count: usize },

    #[error("store {path:?}: remembered answer kept for this session only: {reason}")]
    WriteFailed { path: PathBuf, reason: String },
}

/// Remembered answers keyed by decision kind and origin pattern.
pub trait DecisionStore: Send + Sync {
    /// First remembered answer for `kind` whose pattern matches the identity's origin.
    fn lookup(&self, kind: DecisionKind, identity: &ApplicationIdentity) -> Option<Outcome>;

    /// Remember an answer for the origins covered by `scope`.
    ///
    /// `Always` answers are on disk when this returns `Ok`. On a write
    /// failure the answer is still honored for this process.
    fn remember_scoped(
        &self,
        kind: DecisionKind,
        identity: &ApplicationIdentity,
        outcome: Outcome,
        durability: Durability,
        scope: RememberScope,
    ) -> Result<(), StoreError>;

    /// Remember an answer for the identity's codebase.
    fn remember(
        &self,
        kind: DecisionKind,
        identity: &ApplicationIdentity,
        outcome: Outcome,
        durability: Durability,
    ) -> Result<(), StoreError> {
        self.remember_scoped(kind, identity, outcome, durability, RememberScope::default())
    }

    /// Drop the remembered answer for `kind` under exactly `pattern`.
    fn forget(&self, kind: DecisionKind, pattern: &str) -> Result<bool, StoreError>;

    /// Every remembered answer, persisted ones first in file order.
    fn entries(&self) -> Vec<RememberedEntry>;

    /// Drain warnings raised since the last call.
    fn take_warnings(&self) -> Vec<StoreWarning>;
}
