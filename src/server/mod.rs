//! HTTP interface.

pub mod error;
pub mod handlers;
pub mod responses;

use std::net::SocketAddr;
use std::time::Duration;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::engine::Engine;
use crate::error::{Error, Result};
use handlers::AppState;

/// How long shutdown waits for in-flight runs before giving up on them.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Build the router with all endpoints.
pub fn router(engine: Engine) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/tasks", post(handlers::create_task).get(handlers::list_tasks))
        .route("/tasks/:task_id", get(handlers::get_task))
        .route("/workflows", get(handlers::list_workflows))
        .route("/dead-letters", get(handlers::list_dead_letters))
        .route(
            "/pubsub/push",
            post(handlers::pubsub_push).layer(DefaultBodyLimit::disable()),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { engine })
}

/// Serve until Ctrl-C or SIGTERM, then wait (bounded) for in-flight runs.
pub async fn serve(engine: Engine, addr: SocketAddr) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "orchestrator listening");

    axum::serve(listener, router(engine.clone()))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| Error::Other(format!("server error: {e}")))?;

    let in_flight = engine.active_runs();
    if in_flight > 0 {
        info!(in_flight, "waiting for workflow runs to finish");
        if tokio::time::timeout(DRAIN_TIMEOUT, engine.wait_for_runs())
            .await
            .is_err()
        {
            warn!(
                remaining = engine.active_runs(),
                "runs still in flight at shutdown; they will be failed on next start"
            );
        }
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("failed to listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(e) => {
                error!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}
