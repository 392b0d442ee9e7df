pub mod renderer;
pub mod request;
pub mod state;

pub use renderer::{spawn_renderer, AutomatedRenderer, DecisionRenderer};
pub use request::{CorrelationId, DecisionRequest, DecisionResponse};
pub use state::{PendingSummary, RequestState};

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::domain::{DecisionKind, Outcome};
use crate::observability::metrics::record_prompt;

use state::{Admission, RequestLedger};

/// Default bound on requests queued for the renderer.
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// Errors surfaced by the decision arbiter.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ArbiterError {
    #[error("No decision renderer available")]
    RendererUnavailable,

    #[error("A decision renderer is already registered")]
    RendererAlreadyRegistered,

    #[error("No response from the decision renderer within {0:?}")]
    Timeout(Duration),

    #[error("Decision request was cancelled")]
    Cancelled,

    #[error("Decision renderer went away before answering")]
    RendererGone,

    #[error("Decision renderer failed: {0}")]
    Failed(String),

    #[error("No live decision request {0}")]
    UnknownCorrelation(CorrelationId),

    #[error("{outcome} is not a valid answer for {kind}")]
    InvalidAnswer { kind: DecisionKind, outcome: Outcome },

    #[error("Decision request {0} has not been handed to the renderer")]
    NotDispatched(CorrelationId),

    #[error("Correlation id {0} is already in use")]
    DuplicateCorrelation(CorrelationId),
}

struct RendererSlot {
    tx: mpsc::Sender<DecisionRequest>,
    generation: u64,
}

#[derive(Default)]
struct ArbiterState {
    ledger: RequestLedger,
    renderer: Option<RendererSlot>,
    generations: u64,
}

struct Inner {
    state: Mutex<ArbiterState>,
    timeout: Option<Duration>,
    queue_capacity: usize,
}

/// Serializes decision requests from many callers onto one renderer.
///
/// Callers block in [`submit`](Self::submit) until the renderer answers,
/// fails, goes away, or the optional timeout fires. Requests with the same
/// kind and origin share one prompt. Without a registered renderer,
/// `submit` fails immediately.
#[derive(Clone)]
pub struct DecisionArbiter {
    inner: Arc<Inner>,
}

impl DecisionArbiter {
    pub fn new(timeout: Option<Duration>, queue_capacity: usize) -> Self {
        DecisionArbiter {
            inner: Arc::new(Inner {
                state: Mutex::new(ArbiterState::default()),
                timeout,
                queue_capacity: queue_capacity.max(1),
            }),
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.inner.timeout
    }

    /// Ask the renderer for a decision and wait for it.
    pub async fn submit(
        &self,
        request: DecisionRequest,
    ) -> Result<DecisionResponse, ArbiterError> {
        let caller = request.correlation_id;
        let (tx, rx) = oneshot::channel();

        let dispatch = {
            let mut state = self.inner.state.lock();
            let sender = match state.renderer.as_ref() {
                Some(slot) => slot.tx.clone(),
                None => {
                    record_prompt("unavailable");
                    return Err(ArbiterError::RendererUnavailable);
                }
            };
            match state.ledger.admit(&request, tx) {
                Ok(Admission::New) => Some(sender),
                Ok(Admission::Coalesced(existing)) => {
                    debug!(
                        caller = %caller,
                        request = %existing,
                        kind = %request.kind,
                        "Joined pending decision request"
                    );
                    record_prompt("coalesced");
                    None
                }
                Err(e) => {
                    // No guard for this caller: the id belongs to someone else
                    warn!(correlation_id = %caller, "Rejected reused correlation id");
                    record_prompt("duplicate");
                    return Err(e);
                }
            }
        };

        let _waiter = WaiterGuard {
            inner: &self.inner,
            caller,
        };

        let wait = async {
            if let Some(sender) = dispatch {
                debug!(
                    correlation_id = %caller,
                    kind = %request.kind,
                    origin = %request.identity.origin_str(),
                    "Queued decision request"
                );
                if sender.send(request).await.is_err() {
                    let _ = self
                        .inner
                        .state
                        .lock()
                        .ledger
                        .fail(&caller, ArbiterError::RendererGone);
                }
            }
            rx.await
        };

        let received = match self.inner.timeout {
            Some(limit) => match tokio::time::timeout(limit, wait).await {
                Ok(received) => received,
                Err(_) => {
                    warn!(
                        correlation_id = %caller,
                        timeout = ?limit,
                        "Decision request timed out"
                    );
                    record_prompt("timeout");
                    return Err(ArbiterError::Timeout(limit));
                }
            },
            None => wait.await,
        };

        match received {
            Ok(result) => result,
            Err(_) => Err(ArbiterError::Failed(
                "request dropped without an answer".to_string(),
            )),
        }
    }

    /// Retire one caller's request. The caller's `submit` resolves with
    /// [`ArbiterError::Cancelled`]. Callers coalesced onto the same prompt
    /// keep waiting.
    pub fn cancel(&self, id: &CorrelationId) -> Result<(), ArbiterError> {
        let left = self
            .inner
            .state
            .lock()
            .ledger
            .leave(id, Some(ArbiterError::Cancelled));
        if !left {
            return Err(ArbiterError::UnknownCorrelation(*id));
        }
        info!(correlation_id = %id, "Decision request cancelled");
        record_prompt("cancelled");
        Ok(())
    }

    /// Claim the renderer seam. Only one renderer may be registered at a time.
    pub fn register_renderer(&self) -> Result<RendererHandle, ArbiterError> {
        let mut state = self.inner.state.lock();
        if state.renderer.is_some() {
            return Err(ArbiterError::RendererAlreadyRegistered);
        }

        let (tx, rx) = mpsc::channel(self.inner.queue_capacity);
        state.generations += 1;
        let generation = state.generations;
        state.renderer = Some(RendererSlot { tx, generation });

        info!(generation, "Decision renderer registered");
        Ok(RendererHandle {
            inner: self.inner.clone(),
            rx,
            generation,
        })
    }

    pub fn is_renderer_registered(&self) -> bool {
        self.inner.state.lock().renderer.is_some()
    }

    pub fn pending_count(&self) -> usize {
        self.inner.state.lock().ledger.len()
    }

    /// Live requests, oldest first.
    pub fn pending(&self) -> Vec<PendingSummary> {
        self.inner.state.lock().ledger.snapshot()
    }
}

impl Default for DecisionArbiter {
    fn default() -> Self {
        Self::new(None, DEFAULT_QUEUE_CAPACITY)
    }
}

/// Removes a caller from the ledger however its `submit` ends.
struct WaiterGuard<'a> {
    inner: &'a Inner,
    caller: CorrelationId,
}

impl Drop for WaiterGuard<'_> {
    fn drop(&mut self) {
        self.inner.state.lock().ledger.leave(&self.caller, None);
    }
}

/// The registered renderer's side of the arbiter.
///
/// Dropping the handle fails every live request with
/// [`ArbiterError::RendererGone`] and frees the seam for a new renderer.
pub struct RendererHandle {
    inner: Arc<Inner>,
    rx: mpsc::Receiver<DecisionRequest>,
    generation: u64,
}

impl RendererHandle {
    /// Next live request, in submission order. Requests retired while
    /// queued are skipped.
    pub async fn next_request(&mut self) -> Option<DecisionRequest> {
        while let Some(request) = self.rx.recv().await {
            let id = request.correlation_id;
            if self.inner.state.lock().ledger.mark_dispatched(&id) {
                debug!(correlation_id = %id, kind = %request.kind, "Dispatched decision request");
                return Some(request);
            }
            debug!(correlation_id = %id, "Skipping retired decision request");
        }
        None
    }

    /// Deliver an answer to every caller waiting on the request.
    pub fn respond(&self, response: DecisionResponse) -> Result<(), ArbiterError> {
        self.responder().respond(response)
    }

    /// Fail a request. Every waiting caller resolves with [`ArbiterError::Failed`].
    pub fn fail(&self, id: &CorrelationId, reason: impl Into<String>) -> Result<(), ArbiterError> {
        self.responder().fail(id, reason)
    }

    /// Answering side only, usable while another task waits in
    /// [`next_request`](Self::next_request).
    pub fn responder(&self) -> Responder {
        Responder {
            inner: self.inner.clone(),
        }
    }
}

/// Answers requests on behalf of the registered renderer. Answers for
/// requests that are no longer live are rejected.
#[derive(Clone)]
pub struct Responder {
    inner: Arc<Inner>,
}

impl Responder {
    pub fn respond(&self, response: DecisionResponse) -> Result<(), ArbiterError> {
        let id = response.correlation_id;
        let outcome = response.outcome;
        let notified = match self.inner.state.lock().ledger.answer(response) {
            Ok(notified) => notified,
            Err(e) => {
                warn!(correlation_id = %id, error = %e, "Discarded decision answer");
                return Err(e);
            }
        };

        info!(correlation_id = %id, outcome = %outcome, waiters = notified, "Decision answered");
        record_prompt("answered");
        Ok(())
    }

    pub fn fail(&self, id: &CorrelationId, reason: impl Into<String>) -> Result<(), ArbiterError> {
        let reason = reason.into();
        self.inner
            .state
            .lock()
            .ledger
            .fail(id, ArbiterError::Failed(reason.clone()))?;

        warn!(correlation_id = %id, reason = %reason, "Decision renderer failed request");
        record_prompt("failed");
        Ok(())
    }
}

impl Drop for RendererHandle {
    fn drop(&mut self) {
        let mut state = self.inner.state.lock();
        let current = state.renderer.as_ref().map(|slot| slot.generation);
        if current != Some(self.generation) {
            return;
        }

        state.renderer = None;
        let failed = state.ledger.fail_all(ArbiterError::RendererGone);
        if failed > 0 {
            warn!(
                generation = self.generation,
                failed,
                "Decision renderer went away with requests in flight"
            );
        } else {
            info!(generation = self.generation, "Decision renderer unregistered");
        }
    }
}
