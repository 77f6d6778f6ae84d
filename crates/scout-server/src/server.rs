use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use scout_engine::event_bus::EventBus;
use scout_settings::ServerSettings;
use scout_store::{Database, DocumentRepo, WorkspaceRepo};
use scout_telemetry::TelemetryGuard;

use crate::event_bridge;
use crate::handlers;
use crate::orchestrator::ResearchOrchestrator;

/// How long `shutdown` waits for open connections to finish.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Server configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub keep_alive: Duration,
    pub sweep_interval: Duration,
    pub closed_session_ttl: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::from_settings(&ServerSettings::default())
    }
}

impl ServerConfig {
    pub fn from_settings(settings: &ServerSettings) -> Self {
        Self {
            host: settings.host.clone(),
            port: settings.port,
            keep_alive: Duration::from_secs(settings.stream_keepalive_secs.max(1)),
            sweep_interval: Duration::from_secs(settings.sweep_interval_secs.max(1)),
            closed_session_ttl: Duration::from_secs(settings.closed_session_ttl_secs),
        }
    }
}

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub workspaces: WorkspaceRepo,
    pub documents: DocumentRepo,
    pub bus: Arc<EventBus>,
    pub orchestrator: Arc<dyn ResearchOrchestrator>,
    pub telemetry: Option<Arc<TelemetryGuard>>,
    pub keep_alive: Duration,
}

impl AppState {
    pub fn new(
        db: &Database,
        bus: Arc<EventBus>,
        orchestrator: Arc<dyn ResearchOrchestrator>,
    ) -> Self {
        Self {
            workspaces: WorkspaceRepo::new(db.clone()),
            documents: DocumentRepo::new(db.clone()),
            bus,
            orchestrator,
            telemetry: None,
            keep_alive: ServerConfig::default().keep_alive,
        }
    }

    pub fn with_telemetry(mut self, telemetry: Arc<TelemetryGuard>) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    pub fn with_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/api/workspace", post(handlers::create_workspace))
        .route("/api/workspace/{id}", get(handlers::get_workspace))
        .route("/api/workspace/{id}/documents", get(handlers::list_documents))
        .route("/api/workspaces", get(handlers::list_workspaces))
        .route("/api/orchestrator/start", post(handlers::start_orchestration))
        .route("/api/orchestrator/{id}/abort", post(handlers::abort_orchestration))
        .route("/api/orchestrator/{id}/state", get(handlers::orchestration_state))
        .route("/api/stream/{session_id}", get(event_bridge::stream_handler))
        .route("/api/knowledge/search", get(handlers::search_knowledge))
        .route("/api/logs", get(handlers::telemetry_logs))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Bind, start serving, and start the closed-session sweep. Returns a
/// handle to shut both down.
pub async fn start(config: ServerConfig, state: AppState) -> Result<ServerHandle, std::io::Error> {
    let sweep = start_sweep_task(
        Arc::clone(&state.bus),
        config.sweep_interval,
        config.closed_session_ttl,
    );

    let router = build_router(state.with_keep_alive(config.keep_alive));
    let listener = tokio::net::TcpListener::bind((config.host.as_str(), config.port)).await?;
    let local_addr = listener.local_addr()?;

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    let server = tokio::spawn(async move {
        let result = axum::serve(listener, router)
            .with_graceful_shutdown(async move { signal.cancelled().await })
            .await;
        if let Err(e) = result {
            tracing::error!(error = %e, "server stopped with error");
        }
    });

    tracing::info!(addr = %local_addr, "Scout server started");

    Ok(ServerHandle {
        addr: local_addr,
        port: local_addr.port(),
        shutdown,
        server,
        sweep,
    })
}

/// Periodically drop queues that were closed but never drained.
pub fn start_sweep_task(
    bus: Arc<EventBus>,
    interval: Duration,
    ttl: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let removed = bus.sweep_closed(ttl);
            if removed > 0 {
                tracing::info!(removed, "swept undrained sessions");
            }
        }
    })
}

/// Handle returned by `start()`. Keeps background tasks alive.
pub struct ServerHandle {
    pub addr: SocketAddr,
    pub port: u16,
    shutdown: CancellationToken,
    server: tokio::task::JoinHandle<()>,
    sweep: tokio::task::JoinHandle<()>,
}

impl ServerHandle {
    /// Stop accepting connections and wait briefly for open ones.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        self.sweep.abort();
        if tokio::time::timeout(SHUTDOWN_GRACE, self.server).await.is_err() {
            tracing::warn!("open connections outlived shutdown grace period");
        }
    }
}
