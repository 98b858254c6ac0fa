use crate::models::User;
use crate::services::auth;
use crate::web::error::ApiError;
use crate::web::state::AppState;
use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::request::Parts;
use axum::http::{header, HeaderMap};
use axum_extra::extract::CookieJar;
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;

pub const SESSION_COOKIE: &str = "session";

/// Session token from `Authorization: Bearer` or, failing that, the session cookie.
pub fn session_token(headers: &HeaderMap) -> Option<String> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string);

    bearer.or_else(|| {
        CookieJar::from_headers(headers)
            .get(SESSION_COOKIE)
            .map(|c| c.value().to_string())
    })
}

/// The authenticated caller. Rejects with 401 when there is no valid session.
pub struct CurrentUser {
    pub user: User,
    pub token: String,
}

impl FromRequestParts<Arc<AppState>> for CurrentUser {
    type Rejection = ApiError;

    fn from_request_parts<'life0, 'life1, 'async_trait>(
        parts: &'life0 mut Parts,
        state: &'life1 Arc<AppState>,
    ) -> Pin<Box<dyn Future<Output = Result<Self, Self::Rejection>> + Send + 'async_trait>>
    where
        'life0: 'async_trait,
        'life1: 'async_trait,
        Self: 'async_trait,
    {
        let state = state.clone();
        let token = session_token(&parts.headers);
        Box::pin(async move {
            let token = token.ok_or(ApiError::Unauthorized)?;
            let user = auth::validate_session(&state.db, &token)?.ok_or(ApiError::Unauthorized)?;
            Ok(CurrentUser { user, token })
        })
    }
}

/// The caller when a valid session is presented, anonymous otherwise.
pub struct OptionalUser(pub Option<User>);

impl FromRequestParts<Arc<AppState>> for OptionalUser {
    type Rejection = ApiError;

    fn from_request_parts<'life0, 'life1, 'async_trait>(
        parts: &'life0 mut Parts,
        state: &'life1 Arc<AppState>,
    ) -> Pin<Box<dyn Future<Output = Result<Self, Self::Rejection>> + Send + 'async_trait>>
    where
        'life0: 'async_trait,
        'life1: 'async_trait,
        Self: 'async_trait,
    {
        let state = state.clone();
        let token = session_token(&parts.headers);
        Box::pin(async move {
            let user = match token {
                Some(t) => auth::validate_session(&state.db, &t)?,
                None => None,
            };
            Ok(OptionalUser(user))
        })
    }
}

/// Best-effort client address used as the rate limiting key.
pub struct ClientIp(pub String);

impl ClientIp {
    fn from_parts(parts: &Parts) -> Self {
        if let Some(ConnectInfo(addr)) = parts.extensions.get::<ConnectInfo<SocketAddr>>() {
            return Self(addr.ip().to_string());
        }
        let forwarded = parts
            .headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty());
        Self(forwarded.unwrap_or("unknown").to_string())
    }
}

impl<S> FromRequestParts<S> for ClientIp
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    fn from_request_parts<'life0, 'life1, 'async_trait>(
        parts: &'life0 mut Parts,
        _state: &'life1 S,
    ) -> Pin<Box<dyn Future<Output = Result<Self, Self::Rejection>> + Send + 'async_trait>>
    where
        'life0: 'async_trait,
        'life1: 'async_trait,
        Self: 'async_trait,
    {
        let ip = Self::from_parts(parts);
        Box::pin(async move { Ok(ip) })
    }
}
