pub mod metrics;
pub mod tracing;

pub use metrics::{install_recorder, TimingGuard};
pub use tracing::init_tracing;
