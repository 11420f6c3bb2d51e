use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{Router, routing::get};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::api::{self, AppState};
use crate::config::ServiceConfig;
use crate::store::{DbHandle, Store};
use crate::ws;

/// How often stale presence rows are swept.
const PRESENCE_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Build the full application router: REST API plus the realtime socket.
pub fn build_router(state: Arc<AppState>, dev_mode: bool) -> Router {
    let mut app = api::api_router()
        .route("/ws", get(ws::ws_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state);
    if dev_mode {
        app = app.layer(CorsLayer::permissive());
    }
    app
}

/// Open (creating if needed) the database at `config.db_path`.
pub fn open_store(config: &ServiceConfig) -> Result<Store> {
    if let Some(parent) = config.db_path.parent() {
        std::fs::create_dir_all(parent).context("Failed to create database directory")?;
    }
    Store::new(&config.db_path).context("Failed to initialize tasklane database")
}

/// Drop presence rows whose heartbeat is older than the configured timeout.
fn spawn_presence_sweeper(db: DbHandle, timeout_ms: i64) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(PRESENCE_SWEEP_INTERVAL);
        loop {
            ticker.tick().await;
            match db.call(move |store| store.cleanup_stale_presence(timeout_ms)).await {
                Ok(0) => {}
                Ok(removed) => tracing::debug!(removed, "swept stale presence"),
                Err(e) => tracing::warn!(error = %e, "presence sweep failed"),
            }
        }
    })
}

/// Start the HTTP server and run until Ctrl+C.
pub async fn start_server(config: ServiceConfig, dev_mode: bool) -> Result<()> {
    let db = DbHandle::new(open_store(&config)?);
    let sweeper = spawn_presence_sweeper(db.clone(), config.realtime.presence_timeout_ms());

    let host = if dev_mode { "0.0.0.0" } else { "127.0.0.1" };
    let addr = format!("{}:{}", host, config.port);
    let state = Arc::new(AppState::new(db, config));
    let app = build_router(state.clone(), dev_mode);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    let local_addr = listener.local_addr()?;
    tracing::info!(
        %local_addr,
        backend = state.backend.base_url(),
        transport = %state.config.realtime.transport,
        bypass_auth = state.config.auth.bypass,
        "tasklane listening"
    );

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error");
    sweeper.abort();
    served?;

    tracing::info!("server shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}
