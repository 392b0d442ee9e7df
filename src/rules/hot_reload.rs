use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::interval;
use tracing::{info, warn};

use crate::observability::metrics::record_ruleset_reload;

use super::loader::{RuleSetCell, RuleSetLoader};
use super::{RuleSet, RuleSetError};

/// Polls the rule package and swaps it into the cell when its digest changes.
pub struct RuleSetWatcher {
    cell: Arc<RuleSetCell>,
    loader: RuleSetLoader,
    check_interval: Duration,
    last_digest: Option<String>,
}

impl RuleSetWatcher {
    pub fn new(cell: Arc<RuleSetCell>, loader: RuleSetLoader, check_interval: Duration) -> Self {
        RuleSetWatcher {
            cell,
            loader,
            check_interval,
            last_digest: None,
        }
    }

    /// Start polling.
    ///
    /// The receiver sees every rule set that replaced the previous one.
    pub fn start(mut self) -> (watch::Receiver<Arc<RuleSet>>, tokio::task::JoinHandle<()>) {
        let initial = self.cell.snapshot();
        self.last_digest = match &initial.digest {
            Some(digest) => Some(digest.clone()),
            None => self.loader.read_digest().ok(),
        };

        let (tx, rx) = watch::channel(initial);

        let handle = tokio::spawn(async move {
            let mut interval = interval(self.check_interval);

            loop {
                interval.tick().await;

                match self.check_for_updates(&tx) {
                    Ok(true) => {
                        record_ruleset_reload("success");
                        info!("Deployment rules reloaded");
                    }
                    Ok(false) => {}
                    Err(e) => {
                        record_ruleset_reload("failure");
                        warn!(error = %e, "Deployment rules changed but could not be loaded");
                    }
                }
            }
        });

        (rx, handle)
    }

    /// Reload when the package digest changed. A package that fails to
    /// parse leaves the previous rule set in place.
    fn check_for_updates(
        &mut self,
        tx: &watch::Sender<Arc<RuleSet>>,
    ) -> Result<bool, RuleSetError> {
        let digest = self.loader.read_digest()?;
        if self.last_digest.as_ref() == Some(&digest) {
            return Ok(false);
        }

        // Remember the digest either way so a broken package is reported once
        self.last_digest = Some(digest);
        let ruleset = self.loader.load()?;

        info!(
            rules = ruleset.len(),
            version = ?ruleset.version,
            "Deployment rules changed"
        );

        self.cell.replace(ruleset);
        let _ = tx.send(self.cell.snapshot());

        Ok(true)
    }
}
