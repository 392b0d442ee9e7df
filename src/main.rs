use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use clap::Parser;
use tokio::signal;
use tracing::{info, warn};

use trustgate::api::{create_router, AppState, RemoteRenderer};
use trustgate::arbiter::{spawn_renderer, AutomatedRenderer, DecisionArbiter};
use trustgate::config::{Config, RendererMode, TrustSettings};
use trustgate::engine::TrustEngine;
use trustgate::grants::{load_authority, GrantBuilder};
use trustgate::observability::{init_tracing, install_recorder};
use trustgate::rules::{RuleSetCell, RuleSetLoader, RuleSetWatcher};
use trustgate::storage::{DecisionStore, FileDecisionStore, LayeredDecisionStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse configuration
    let config = Config::parse();

    // Initialize tracing
    init_tracing(&config.log_level, &config.log_format);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting trustgate decision service"
    );

    let metrics = match install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!(error = %e, "Failed to install metrics recorder, continuing without metrics");
            None
        }
    };

    let settings = TrustSettings::load(config.settings_path.as_deref())?;
    info!(
        trust_level = %settings.trust_level,
        prompt_user = settings.prompt_user,
        "Loaded trust settings"
    );

    // Deployment rules, watched for changes when configured
    let (rules, rules_handle) = match &config.ruleset_path {
        Some(path) => {
            let loader = RuleSetLoader::new(path);
            let cell = Arc::new(RuleSetCell::lazy(loader.clone()));
            let watcher =
                RuleSetWatcher::new(cell.clone(), loader, config.ruleset_reload_interval());
            let (_ruleset_rx, handle) = watcher.start();
            (cell, Some(handle))
        }
        None => {
            info!("No deployment rule package configured");
            (Arc::new(RuleSetCell::empty()), None)
        }
    };

    // Remembered answers: user store over an optional read-only global store
    let user_store: Arc<dyn DecisionStore> = Arc::new(FileDecisionStore::open(&config.store_path));
    let store: Arc<dyn DecisionStore> = match &config.global_store_path {
        Some(path) => {
            info!(path = %path.display(), "Global decision store enabled");
            let global: Arc<dyn DecisionStore> = Arc::new(FileDecisionStore::open_read_only(path));
            Arc::new(LayeredDecisionStore::new(user_store, Some(global)))
        }
        None => user_store,
    };

    let arbiter = DecisionArbiter::new(config.decision_timeout(), config.queue_capacity);

    let mut engine = TrustEngine::new(rules, store, arbiter.clone())
        .with_grant_builder(GrantBuilder::new().with_window_banner(settings.grant_window_banner));
    if let Some(path) = &config.grant_policy_path {
        engine = engine.with_authority(Arc::from(load_authority(path)));
    }

    // Decision renderer
    let mode = if settings.prompt_user {
        config.renderer
    } else {
        info!("Prompting disabled by settings, answering every request negatively");
        RendererMode::TrustNone
    };

    let mut remote = None;
    let renderer_handle = match mode {
        RendererMode::Remote => {
            remote = Some(RemoteRenderer::new(
                arbiter.register_renderer()?,
                config.renderer_poll(),
            ));
            None
        }
        RendererMode::TrustAll => Some(spawn_renderer(
            arbiter.register_renderer()?,
            AutomatedRenderer::trust_all(),
        )),
        RendererMode::TrustNone => Some(spawn_renderer(
            arbiter.register_renderer()?,
            AutomatedRenderer::trust_none(),
        )),
        RendererMode::None => {
            warn!("No decision renderer, every prompt will be denied");
            None
        }
    };

    // Create application state
    let state = Arc::new(AppState {
        engine: Arc::new(engine),
        settings,
        renderer: remote,
        metrics,
        start_time: Instant::now(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    });

    // Create router
    let app = create_router(state);

    // Parse listen address
    let addr: SocketAddr = config.listen_addr.parse()?;

    info!(addr = %addr, renderer = ?mode, "Starting HTTP server");

    // Create TCP listener
    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Run server with graceful shutdown
    if config.graceful_shutdown {
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;
    } else {
        axum::serve(listener, app).await?;
    }

    // Cleanup
    info!("Shutting down...");
    if let Some(handle) = rules_handle {
        handle.abort();
    }
    if let Some(handle) = renderer_handle {
        handle.abort();
    }

    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Received shutdown signal");
}
