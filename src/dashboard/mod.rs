//! Dashboard — Axum web server for monitoring and manual control.
//!
//! Serves a REST API and a self-contained HTML dashboard.
//! CORS enabled for local development.

pub mod routes;

use anyhow::Result;
use axum::{
    http::{header, HeaderValue, Method},
    response::Html,
    routing::{get, post},
    Router,
};
use tokio::sync::broadcast;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::notify::Notification;
use routes::AppState;

/// The embedded dashboard HTML (compiled into the binary).
const DASHBOARD_HTML: &str = include_str!("templates/index.html");

/// Start the dashboard web server.
///
/// This spawns a background task, it doesn't block.
pub fn spawn_dashboard(state: AppState, port: u16) -> Result<()> {
    let app = build_router(state);

    tokio::spawn(async move {
        let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
        info!(port, "Dashboard server starting on http://localhost:{port}");

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .expect("Failed to bind dashboard port");

        axum::serve(listener, app)
            .await
            .expect("Dashboard server error");
    });

    Ok(())
}

/// Forward bot notifications into the dashboard's activity feed.
///
/// Lagged receivers skip ahead; missing a feed entry is preferable to
/// stalling the publisher.
pub fn spawn_feed(state: AppState, mut rx: broadcast::Receiver<Notification>) {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(notification) => state.record(notification).await,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    info!(skipped, "Activity feed lagged, skipping entries");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

/// Build the Axum router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin("*".parse::<HeaderValue>().unwrap())
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        // API routes
        .route("/api/state", get(routes::get_state))
        .route("/api/teams", get(routes::get_teams))
        .route("/api/bets", get(routes::get_bets))
        .route("/api/stats", get(routes::get_stats))
        .route("/api/run-cycle", post(routes::post_run_cycle))
        .route("/api/reconcile", post(routes::post_reconcile))
        .route("/api/teams/:id/reset", post(routes::post_reset_team))
        .route("/api/bets/:id/settle", post(routes::post_settle_bet))
        .route("/health", get(routes::health))
        // Dashboard HTML
        .route("/", get(serve_dashboard))
        .layer(cors)
        .with_state(state)
}

/// Serve the embedded HTML dashboard.
async fn serve_dashboard() -> Html<&'static str> {
    Html(DASHBOARD_HTML)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
