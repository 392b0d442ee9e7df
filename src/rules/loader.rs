use parking_lot::{Mutex, RwLock};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use super::parser::{self, parse_package};
use super::{RuleSet, RuleSetError};

/// Reads the rule package from disk.
#[derive(Debug, Clone)]
pub struct RuleSetLoader {
    path: PathBuf,
}

impl RuleSetLoader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        RuleSetLoader { path: path.into() }
    }

    /// Read and parse the package.
    pub fn load(&self) -> Result<RuleSet, RuleSetError> {
        let bytes = fs::read(&self.path)?;
        parse_package(&bytes)
    }

    /// Digest of the package bytes without parsing them.
    pub fn read_digest(&self) -> Result<String, RuleSetError> {
        let bytes = fs::read(&self.path)?;
        Ok(parser::digest(&bytes))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Rule set loaded on first use and cached for the process.
///
/// A package that fails to load is logged once and cached as an empty
/// rule set, so the fast path stays off until a reload succeeds.
pub struct RuleSetCell {
    loader: Option<RuleSetLoader>,
    current: RwLock<Option<Arc<RuleSet>>>,
    load_error: RwLock<Option<String>>,
    load_lock: Mutex<()>,
}

impl RuleSetCell {
    /// Cell that loads from `loader` on first access.
    pub fn lazy(loader: RuleSetLoader) -> Self {
        RuleSetCell {
            loader: Some(loader),
            current: RwLock::new(None),
            load_error: RwLock::new(None),
            load_lock: Mutex::new(()),
        }
    }

    /// Cell holding a rule set that is already parsed.
    pub fn fixed(ruleset: RuleSet) -> Self {
        RuleSetCell {
            loader: None,
            current: RwLock::new(Some(Arc::new(ruleset))),
            load_error: RwLock::new(None),
            load_lock: Mutex::new(()),
        }
    }

    /// No rule package configured.
    pub fn empty() -> Self {
        Self::fixed(RuleSet::empty())
    }

    /// Current rule set, loading it on first call.
    pub fn snapshot(&self) -> Arc<RuleSet> {
        if let Some(ruleset) = self.current.read().clone() {
            return ruleset;
        }

        let _guard = self.load_lock.lock();

        // Another caller may have loaded while we waited
        if let Some(ruleset) = self.current.read().clone() {
            return ruleset;
        }

        let ruleset = match &self.loader {
            Some(loader) => match loader.load() {
                Ok(ruleset) => {
                    info!(
                        path = %loader.path().display(),
                        rules = ruleset.len(),
                        version = ?ruleset.version,
                        "Loaded deployment rules"
                    );
                    *self.load_error.write() = None;
                    ruleset
                }
                Err(e) => {
                    warn!(
                        path = %loader.path().display(),
                        error = %e,
                        "Deployment rules unusable, continuing without them"
                    );
                    *self.load_error.write() = Some(e.to_string());
                    RuleSet::empty()
                }
            },
            None => RuleSet::empty(),
        };

        let ruleset = Arc::new(ruleset);
        *self.current.write() = Some(ruleset.clone());
        ruleset
    }

    /// Swap in a freshly loaded rule set.
    pub fn replace(&self, ruleset: RuleSet) {
        *self.load_error.write() = None;
        *self.current.write() = Some(Arc::new(ruleset));
    }

    /// Why the last load failed, if it did.
    pub fn load_error(&self) -> Option<String> {
        self.load_error.read().clone()
    }

    pub fn loader(&self) -> Option<&RuleSetLoader> {
        self.loader.as_ref()
    }
}
