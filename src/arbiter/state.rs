use ahash::AHashMap;
use serde::Serialize;
use std::time::Instant;
use tokio::sync::oneshot;

use super::request::{CoalesceKey, CorrelationId, DecisionRequest, DecisionResponse};
use super::ArbiterError;

/// Lifecycle of one request.
///
/// `Pending -> Dispatched -> Answered`, or `Failed` from either live state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestState {
    /// Queued for the renderer
    Pending,
    /// Handed to the renderer, awaiting an answer
    Dispatched,
    Answered,
    Failed,
}

impl RequestState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RequestState::Answered | RequestState::Failed)
    }

    pub fn can_transition_to(&self, next: RequestState) -> bool {
        matches!(
            (self, next),
            (RequestState::Pending, RequestState::Dispatched)
                | (RequestState::Dispatched, RequestState::Answered)
                | (RequestState::Pending | RequestState::Dispatched, RequestState::Failed)
        )
    }
}

pub(crate) type Waiter = oneshot::Sender<Result<DecisionResponse, ArbiterError>>;

struct PendingRequest {
    request: DecisionRequest,
    state: RequestState,
    /// Callers blocked on this request, keyed by their own correlation id
    waiters: Vec<(CorrelationId, Waiter)>,
    admitted: Instant,
}

/// Point-in-time view of a live request.
#[derive(Debug, Clone, Serialize)]
pub struct PendingSummary {
    pub correlation_id: CorrelationId,
    pub kind: crate::domain::DecisionKind,
    pub origin: String,
    pub state: RequestState,
    pub waiters: usize,
    pub age_ms: u64,
}

/// Whether a submitted request produced a new prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Admission {
    New,
    Coalesced(CorrelationId),
}

/// Live requests and the callers waiting on them. Requests leave the
/// ledger as soon as they reach a terminal state or lose their last waiter.
#[derive(Default)]
pub(crate) struct RequestLedger {
    requests: AHashMap<CorrelationId, PendingRequest>,
    by_key: AHashMap<CoalesceKey, CorrelationId>,
    waiter_index: AHashMap<CorrelationId, CorrelationId>,
}

impl RequestLedger {
    /// Register a caller. A live request for the same key absorbs the caller.
    ///
    /// A correlation id already held by a live caller or request is rejected
    /// and the ledger is left untouched.
    pub fn admit(
        &mut self,
        request: &DecisionRequest,
        waiter: Waiter,
    ) -> Result<Admission, ArbiterError> {
        let caller = request.correlation_id;
        if self.waiter_index.contains_key(&caller) || self.requests.contains_key(&caller) {
            return Err(ArbiterError::DuplicateCorrelation(caller));
        }

        let key = request.coalesce_key();
        if let Some(existing) = self.by_key.get(&key).copied() {
            if let Some(pending) = self.requests.get_mut(&existing) {
                pending.waiters.push((caller, waiter));
                self.waiter_index.insert(caller, existing);
                return Ok(Admission::Coalesced(existing));
            }
        }

        self.by_key.insert(key, caller);
        self.waiter_index.insert(caller, caller);
        self.requests.insert(
            caller,
            PendingRequest {
                request: request.clone(),
                state: RequestState::Pending,
                waiters: vec![(caller, waiter)],
                admitted: Instant::now(),
            },
        );
        Ok(Admission::New)
    }

    /// Mark a request as handed to the renderer. False when it was retired.
    pub fn mark_dispatched(&mut self, id: &CorrelationId) -> bool {
        match self.requests.get_mut(id) {
            Some(pending) if pending.state.can_transition_to(RequestState::Dispatched) => {
                pending.state = RequestState::Dispatched;
                true
            }
            _ => false,
        }
    }

    /// Deliver an answer to every waiter. Returns how many were notified.
    pub fn answer(&mut self, response: DecisionResponse) -> Result<usize, ArbiterError> {
        let id = response.correlation_id;
        let pending = self
            .requests
            .get(&id)
            .ok_or(ArbiterError::UnknownCorrelation(id))?;

        if !pending.request.kind.accepts(response.outcome) {
            return Err(ArbiterError::InvalidAnswer {
                kind: pending.request.kind,
                outcome: response.outcome,
            });
        }
        if !pending.state.can_transition_to(RequestState::Answered) {
            return Err(ArbiterError::NotDispatched(id));
        }

        let pending = self.retire(&id).ok_or(ArbiterError::UnknownCorrelation(id))?;
        Ok(notify(pending, RequestState::Answered, Ok(response)))
    }

    /// Fail a request for every waiter.
    pub fn fail(&mut self, id: &CorrelationId, error: ArbiterError) -> Result<usize, ArbiterError> {
        let pending = self
            .requests
            .get(id)
            .ok_or(ArbiterError::UnknownCorrelation(*id))?;
        if !pending.state.can_transition_to(RequestState::Failed) {
            return Err(ArbiterError::UnknownCorrelation(*id));
        }

        let pending = self.retire(id).ok_or(ArbiterError::UnknownCorrelation(*id))?;
        Ok(notify(pending, RequestState::Failed, Err(error)))
    }

    /// Fail every live request. Returns how many requests were failed.
    pub fn fail_all(&mut self, error: ArbiterError) -> usize {
        let ids: Vec<CorrelationId> = self.requests.keys().copied().collect();
        for id in &ids {
            if let Some(pending) = self.retire(id) {
                notify(pending, RequestState::Failed, Err(error.clone()));
            }
        }
        ids.len()
    }

    /// Remove one caller. When `notify_with` is set the caller is told why.
    /// The request is retired once its last caller leaves. Returns false
    /// when the caller was not waiting.
    pub fn leave(&mut self, caller: &CorrelationId, notify_with: Option<ArbiterError>) -> bool {
        let Some(request_id) = self.waiter_index.remove(caller) else {
            return false;
        };
        let Some(pending) = self.requests.get_mut(&request_id) else {
            return false;
        };

        if let Some(idx) = pending.waiters.iter().position(|(id, _)| id == caller) {
            let (_, waiter) = pending.waiters.swap_remove(idx);
            if let Some(error) = notify_with {
                let _ = waiter.send(Err(error));
            }
        }

        if pending.waiters.is_empty() {
            self.retire(&request_id);
        }
        true
    }

    #[cfg(test)]
    pub fn contains(&self, id: &CorrelationId) -> bool {
        self.requests.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn snapshot(&self) -> Vec<PendingSummary> {
        let mut summaries: Vec<PendingSummary> = self
            .requests
            .values()
            .map(|pending| PendingSummary {
                correlation_id: pending.request.correlation_id,
                kind: pending.request.kind,
                origin: pending.request.identity.origin_str().to_string(),
                state: pending.state,
                waiters: pending.waiters.len(),
                age_ms: pending.admitted.elapsed().as_millis() as u64,
            })
            .collect();
        summaries.sort_by(|a, b| b.age_ms.cmp(&a.age_ms));
        summaries
    }

    fn retire(&mut self, id: &CorrelationId) -> Option<PendingRequest> {
        let pending = self.requests.remove(id)?;
        let key = pending.request.coalesce_key();
        if self.by_key.get(&key) == Some(id) {
            self.by_key.remove(&key);
        }
        for (caller, _) in &pending.waiters {
            self.waiter_index.remove(caller);
        }
        Some(pending)
    }
}

fn notify(
    mut pending: PendingRequest,
    terminal: RequestState,
    result: Result<DecisionResponse, ArbiterError>,
) -> usize {
    pending.state = terminal;
    let count = pending.waiters.len();
    for (_, waiter) in pending.waiters.drain(..) {
        let _ = waiter.send(result.clone());
    }
    count
}
