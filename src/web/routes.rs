use super::handlers;
use super::state::AppState;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post, put};
use axum::Router;
use std::sync::Arc;

pub fn blog_routes() -> Router<Arc<AppState>> {
    // GET resolves the segment as a slug, PUT as an id
    Router::new()
        .route(
            "/blogs/",
            get(handlers::blogs::list).post(handlers::blogs::create),
        )
        .route(
            "/blogs/:key/",
            get(handlers::blogs::detail).put(handlers::blogs::update),
        )
        .route("/blogs/:key/delete/", post(handlers::blogs::delete))
}

pub fn account_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/register/", post(handlers::accounts::register))
        .route("/verify-email/", get(handlers::accounts::verify_email))
        .route(
            "/resend-verification/",
            post(handlers::accounts::resend_verification),
        )
        .route("/login/", post(handlers::accounts::login))
        .route("/logout/", post(handlers::accounts::logout))
        .route("/users/:username/", get(handlers::accounts::public_profile))
        .route("/whoami/", get(handlers::accounts::whoami))
        .route("/profile/", put(handlers::accounts::update_profile))
}

pub fn media_routes(max_upload_bytes: usize) -> Router<Arc<AppState>> {
    // multipart framing needs a little room above the file itself
    let body_limit = max_upload_bytes.saturating_add(64 * 1024);
    Router::new()
        .route(
            "/media/",
            post(handlers::media::upload).layer(DefaultBodyLimit::max(body_limit)),
        )
        .route("/media/:filename", get(handlers::media::serve))
}

pub fn health_routes() -> Router<Arc<AppState>> {
    Router::new().route("/health", get(handlers::health))
}
