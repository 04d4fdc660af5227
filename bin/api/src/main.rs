//! Star Shop API Server — receives Telegram webhooks and reports bot health.

use axum::{
    Json, Router,
    body::Bytes,
    extract::{State, rejection::BytesRejection},
    http::StatusCode,
    routing::get,
};
use serde::Serialize;
use starshop_bot::{Dispatcher, ReferralProcessor, UpdateProcessor};
use starshop_core::{Settings, telemetry};
use starshop_storage::{DEFAULT_USAGE_WINDOW, PoolStatus, Store, models::UsageStats};
use std::{net::SocketAddr, sync::Arc};

/// Shared application state.
struct AppState<P> {
    store: Arc<Store>,
    dispatcher: Dispatcher<P>,
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    telemetry::init();
    let settings = Settings::from_env()?;

    tracing::info!(
        database = %settings.database_path,
        pool_size = settings.pool_size,
        "Starting Star Shop API Server"
    );

    let store = Arc::new(Store::open(&settings.database_path, settings.pool_size).await?);

    let processor = ReferralProcessor::new(Arc::clone(&store));
    let dispatcher = Dispatcher::new(processor, settings.webhook_timeout());
    let state = Arc::new(AppState { store, dispatcher });

    let app = router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], settings.api_port));
    tracing::info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn router<P: UpdateProcessor>(state: Arc<AppState<P>>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/api/webhook", get(webhook_info).post(webhook::<P>))
        .route("/api/stats", get(stats::<P>))
        .with_state(state)
}

// ─── Response Types ─────────────────────────────────────────────────────────

#[derive(Serialize)]
struct StatusResponse {
    status: &'static str,
}

#[derive(Serialize)]
struct StatsResponse {
    unique_users: i64,
    usage: UsageStats,
    pool: PoolStatus,
}

// ─── Handlers ───────────────────────────────────────────────────────────────

/// GET / — liveness.
async fn index() -> Json<StatusResponse> {
    Json(StatusResponse {
        status: "Bot is running",
    })
}

/// GET /api/webhook — health check for the webhook route.
async fn webhook_info() -> Json<StatusResponse> {
    Json(StatusResponse { status: "ok" })
}

/// POST /api/webhook — one Telegram update. Always 200 so Telegram never retries.
async fn webhook<P: UpdateProcessor>(
    State(state): State<Arc<AppState<P>>>,
    body: Result<Bytes, BytesRejection>,
) -> StatusCode {
    let body = match body {
        Ok(body) => body,
        Err(rejection) => {
            tracing::warn!(
                status = %rejection.status(),
                error = %rejection.body_text(),
                "Unreadable webhook body"
            );
            return StatusCode::OK;
        }
    };

    let outcome = state.dispatcher.dispatch(&body).await;
    tracing::debug!(?outcome, "Webhook acknowledged");
    StatusCode::OK
}

/// GET /api/stats — user count and pool usage over the last hour.
async fn stats<P: UpdateProcessor>(State(state): State<Arc<AppState<P>>>) -> Json<StatsResponse> {
    Json(StatsResponse {
        unique_users: state.store.get_unique_users_count().await,
        usage: state.store.usage_stats(DEFAULT_USAGE_WINDOW).await,
        pool: state.store.pool_status(),
    })
}
