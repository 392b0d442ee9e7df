use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tower_http::trace::TraceLayer;
use tracing::{debug, warn};

use crate::arbiter::{ArbiterError, CorrelationId, DecisionResponse, RendererHandle, Responder};
use crate::config::TrustSettings;
use crate::engine::TrustEngine;
use crate::storage::StoreError;

use super::request::{DecideRequest, FailRequest, ForgetRequest};
use super::response::{DecideResponse, ErrorResponse, HealthResponse, ReadyResponse};

/// Renderer seam exposed over HTTP: a user interface long-polls for
/// requests and posts its answers back.
pub struct RemoteRenderer {
    handle: Mutex<RendererHandle>,
    responder: Responder,
    poll: Duration,
}

impl RemoteRenderer {
    pub fn new(handle: RendererHandle, poll: Duration) -> Self {
        RemoteRenderer {
            responder: handle.responder(),
            handle: Mutex::new(handle),
            poll,
        }
    }
}

/// Shared application state.
pub struct AppState {
    pub engine: Arc<TrustEngine>,

    /// Trust level and prompt settings
    pub settings: TrustSettings,

    /// Present when the renderer is a remote user interface
    pub renderer: Option<RemoteRenderer>,

    /// Prometheus recorder handle, when installed
    pub metrics: Option<PrometheusHandle>,

    /// Application start time
    pub start_time: Instant,

    /// Application version
    pub version: String,
}

/// Create the application router.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/trust/decide", post(handle_decide))
        .route("/v1/renderer/next", get(handle_renderer_next))
        .route("/v1/renderer/respond", post(handle_renderer_respond))
        .route("/v1/renderer/fail", post(handle_renderer_fail))
        .route("/v1/decisions/pending", get(handle_pending))
        .route("/v1/decisions/:id", delete(handle_cancel))
        .route("/v1/remembered", get(handle_list_remembered).delete(handle_forget))
        .route("/health", get(handle_health))
        .route("/ready", get(handle_ready))
        .route("/metrics", get(handle_metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Decide one launch. Blocks while the renderer is asked.
async fn handle_decide(
    State(state): State<Arc<AppState>>,
    Json(req): Json<DecideRequest>,
) -> impl IntoResponse {
    let correlation_id = req.correlation_id.unwrap_or_default();
    let policy = req.policy.unwrap_or(state.settings.trust_level);

    let verdict = state
        .engine
        .decide_as(correlation_id, &req.identity, req.kind, policy)
        .await;

    Json(DecideResponse { correlation_id, verdict })
}

/// Long poll for the next request. `204` when nothing arrived in time.
async fn handle_renderer_next(State(state): State<Arc<AppState>>) -> Response {
    let Some(remote) = state.renderer.as_ref() else {
        return no_remote_renderer();
    };

    let Ok(mut handle) = remote.handle.try_lock() else {
        return (
            StatusCode::CONFLICT,
            Json(ErrorResponse::new("Another renderer poll is in progress", "POLL_IN_PROGRESS")),
        )
            .into_response();
    };

    match tokio::time::timeout(remote.poll, handle.next_request()).await {
        Ok(Some(request)) => (StatusCode::OK, Json(request)).into_response(),
        Ok(None) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ErrorResponse::new("Renderer queue closed", "RENDERER_CLOSED")),
        )
            .into_response(),
        Err(_) => {
            debug!("Renderer poll idle");
            StatusCode::NO_CONTENT.into_response()
        }
    }
}

async fn handle_renderer_respond(
    State(state): State<Arc<AppState>>,
    Json(response): Json<DecisionResponse>,
) -> Response {
    let Some(remote) = state.renderer.as_ref() else {
        return no_remote_renderer();
    };

    match remote.responder.respond(response) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => arbiter_error(e),
    }
}

async fn handle_renderer_fail(
    State(state): State<Arc<AppState>>,
    Json(req): Json<FailRequest>,
) -> Response {
    let Some(remote) = state.renderer.as_ref() else {
        return no_remote_renderer();
    };

    match remote.responder.fail(&req.correlation_id, req.reason) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => arbiter_error(e),
    }
}

async fn handle_pending(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.engine.arbiter().pending())
}

/// Retire a caller's pending prompt.
async fn handle_cancel(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Response {
    let id: CorrelationId = match id.parse() {
        Ok(id) => id,
        Err(_) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse::new(format!("Invalid correlation id: {id}"), "BAD_REQUEST")),
            )
                .into_response()
        }
    };

    match state.engine.arbiter().cancel(&id) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => arbiter_error(e),
    }
}

async fn handle_list_remembered(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.engine.store().entries())
}

async fn handle_forget(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ForgetRequest>,
) -> Response {
    match state.engine.store().forget(req.kind, &req.pattern) {
        Ok(true) => StatusCode::NO_CONTENT.into_response(),
        Ok(false) => (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse::not_found(format!(
                "No remembered {} answer for {}",
                req.kind, req.pattern
            ))),
        )
            .into_response(),
        Err(StoreError::ReadOnly) => (
            StatusCode::CONFLICT,
            Json(ErrorResponse::new("Decision store is read-only", "READ_ONLY")),
        )
            .into_response(),
        Err(e) => {
            warn!(
                kind = %req.kind,
                pattern = %req.pattern,
                error = %e,
                "Failed to forget remembered answer"
            );
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::internal_error(e.to_string())),
            )
                .into_response()
        }
    }
}

/// Health check endpoint.
async fn handle_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let arbiter = state.engine.arbiter();

    Json(HealthResponse {
        status: "healthy".to_string(),
        version: state.version.clone(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        renderer_registered: arbiter.is_renderer_registered(),
        pending_requests: arbiter.pending_count(),
    })
}

/// Readiness check endpoint. Not ready while a configured rule package is unusable.
async fn handle_ready(State(state): State<Arc<AppState>>) -> Response {
    let rules = state.engine.rules();
    let ruleset = rules.snapshot();

    if let Some(error) = rules.load_error() {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ErrorResponse::new(
                format!("Deployment rules unusable: {error}"),
                "NOT_READY",
            )),
        )
            .into_response();
    }

    (
        StatusCode::OK,
        Json(ReadyResponse {
            ready: true,
            rules: ruleset.len(),
            rules_version: ruleset.version.clone(),
        }),
    )
        .into_response()
}

/// Metrics endpoint (Prometheus format).
async fn handle_metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let body = state
        .metrics
        .as_ref()
        .map(|handle| handle.render())
        .unwrap_or_default();

    (
        StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
}

fn no_remote_renderer() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorResponse::new(
            "Decision renderer is not remote",
            "NO_REMOTE_RENDERER",
        )),
    )
        .into_response()
}

fn arbiter_error(error: ArbiterError) -> Response {
    let (status, code) = match &error {
        ArbiterError::UnknownCorrelation(_) => (StatusCode::NOT_FOUND, "UNKNOWN_CORRELATION"),
        ArbiterError::InvalidAnswer { .. } => (StatusCode::UNPROCESSABLE_ENTITY, "INVALID_ANSWER"),
        ArbiterError::NotDispatched(_) => (StatusCode::CONFLICT, "NOT_DISPATCHED"),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, "ARBITER_ERROR"),
    };
    (status, Json(ErrorResponse::new(error.to_string(), code))).into_response()
}
