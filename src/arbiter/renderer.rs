use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::request::{DecisionRequest, DecisionResponse};
use super::RendererHandle;

/// Something that can answer decision requests: a user interface bridge,
/// or an automated answerer for unattended runs.
#[async_trait]
pub trait DecisionRenderer: Send + Sync {
    fn name(&self) -> &str;

    /// Answer one request. An error fails the request for its callers.
    async fn render(&self, request: &DecisionRequest) -> Result<DecisionResponse, String>;
}

/// Drive `renderer` from the arbiter's queue until the queue closes.
/// The handle is dropped when the task ends, failing anything still live.
pub fn spawn_renderer<R>(mut handle: RendererHandle, renderer: R) -> JoinHandle<()>
where
    R: DecisionRenderer + 'static,
{
    tokio::spawn(async move {
        info!(renderer = renderer.name(), "Decision renderer started");

        while let Some(request) = handle.next_request().await {
            let id = request.correlation_id;
            let result = match renderer.render(&request).await {
                Ok(response) => handle.respond(response),
                Err(reason) => handle.fail(&id, reason),
            };
            if let Err(e) = result {
                warn!(
                    renderer = renderer.name(),
                    correlation_id = %id,
                    error = %e,
                    "Renderer answer rejected"
                );
            }
        }

        info!(renderer = renderer.name(), "Decision renderer stopped");
    })
}

/// Answers every request with the kind's default, never remembering.
#[derive(Debug, Clone, Copy)]
pub struct AutomatedRenderer {
    positive: bool,
}

impl AutomatedRenderer {
    /// Grant whatever a positive answer grants for each kind.
    pub fn trust_all() -> Self {
        AutomatedRenderer { positive: true }
    }

    /// Refuse every request.
    pub fn trust_none() -> Self {
        AutomatedRenderer { positive: false }
    }
}

#[async_trait]
impl DecisionRenderer for AutomatedRenderer {
    fn name(&self) -> &str {
        if self.positive {
            "trust-all"
        } else {
            "trust-none"
        }
    }

    async fn render(&self, request: &DecisionRequest) -> Result<DecisionResponse, String> {
        let outcome = if self.positive {
            request.kind.default_positive()
        } else {
            request.kind.default_negative()
        };
        Ok(DecisionResponse::new(request.correlation_id, outcome))
    }
}
