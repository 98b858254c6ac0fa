mod error;
mod extractors;
mod handlers;
mod pagination;
mod routes;
pub mod security;
mod state;

pub use error::{ApiError, ApiResult};
pub use extractors::SESSION_COOKIE;
pub use pagination::{Page, PageWindow};
pub use state::AppState;

use crate::services::auth;
use anyhow::Result;
use axum::middleware;
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const CLEANUP_INTERVAL: Duration = Duration::from_secs(3600);

/// The full HTTP API with its middleware stack.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(routes::blog_routes())
        .merge(routes::account_routes())
        .merge(routes::media_routes(state.max_upload_bytes))
        .merge(routes::health_routes())
        .layer(middleware::from_fn(security::apply_security_headers))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
                .layer(CompressionLayer::new())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

/// Hourly purge of expired sessions and stale limiter entries.
pub fn spawn_cleanup(state: Arc<AppState>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(CLEANUP_INTERVAL);
        loop {
            interval.tick().await;
            match auth::cleanup_expired_sessions(&state.db) {
                Ok(0) => {}
                Ok(removed) => tracing::info!(removed, "expired sessions purged"),
                Err(e) => tracing::error!("session cleanup failed: {}", e),
            }
            state.cleanup_limiters();
        }
    })
}

pub async fn serve(state: AppState, addr: &str) -> Result<()> {
    let state = Arc::new(state);
    spawn_cleanup(state.clone());

    let app = router(state);

    let listener = TcpListener::bind(addr).await?;
    tracing::info!("listening on http://{}", listener.local_addr()?);
    let app = app.into_make_service_with_connect_info::<SocketAddr>();
    axum::serve(listener, app).await?;

    Ok(())
}
