pub mod entry;
pub mod file;
pub mod layered;
pub mod memory;
pub mod pattern;
pub mod traits;

pub use entry::{RememberedEntry, StoreLine, STORE_VERSION};
pub use file::FileDecisionStore;
pub use layered::LayeredDecisionStore;
pub use memory::MemoryDecisionStore;
pub use pattern::OriginPattern;
pub use traits::{DecisionStore, StoreWarning};

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by decision stores.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to persist remembered answer to {path:?}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid origin pattern: {0}")]
    Pattern(String),

    #[error("Store is read-only")]
    ReadOnly,
}
