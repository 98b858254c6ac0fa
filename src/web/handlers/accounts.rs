use super::json_body;
use crate::models::{AccountState, Profile, PublicProfile, RegisterUser, UpdateProfile};
use crate::services::verification::VerifyOutcome;
use crate::services::{auth, blog, users};
use crate::web::error::{ApiError, ApiResult};
use crate::web::extractors::{ClientIp, CurrentUser, OptionalUser, SESSION_COOKIE};
use crate::web::state::AppState;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

const REGISTERED_MESSAGE: &str =
    "Registration successful. Check your email to verify your account.";
const RESEND_MESSAGE: &str =
    "If an account with that email is awaiting verification, a new link has been sent.";

/// POST /register/
pub async fn register(
    State(state): State<Arc<AppState>>,
    ClientIp(ip): ClientIp,
    OptionalUser(caller): OptionalUser,
    payload: Result<Json<RegisterUser>, JsonRejection>,
) -> ApiResult<Response> {
    if caller.is_none() {
        state
            .registration_limiter
            .hit(&ip)
            .map_err(ApiError::RateLimited)?;
    }

    let input = json_body(payload)?;
    let user = users::register_user(&state.db, &input)?;

    // the account stands even when the mail transport fails
    if let Err(err) = state.verifier.send_verification(&user).await {
        tracing::error!(user_id = user.id, "verification email not sent: {:?}", err);
    }

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "message": REGISTERED_MESSAGE,
            "id": user.id,
            "username": user.username,
            "email": user.email,
        })),
    )
        .into_response())
}

#[derive(Deserialize)]
pub struct VerifyQuery {
    token: Option<String>,
}

/// GET /verify-email/?token=
pub async fn verify_email(
    State(state): State<Arc<AppState>>,
    Query(query): Query<VerifyQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    let outcome = state
        .verifier
        .verify(&state.db, query.token.as_deref(), Utc::now())?;
    let message = match outcome {
        VerifyOutcome::Activated(_) => "Email verified successfully. You can now log in.",
        VerifyOutcome::AlreadyActive(_) => "Account already activated.",
    };
    Ok(Json(json!({ "message": message })))
}

#[derive(Deserialize)]
pub struct ResendRequest {
    #[serde(default)]
    email: String,
}

/// POST /resend-verification/
///
/// Answers the same way whether or not the address belongs to a pending
/// account, so it cannot be used to probe for registered emails.
pub async fn resend_verification(
    State(state): State<Arc<AppState>>,
    ClientIp(ip): ClientIp,
    payload: Result<Json<ResendRequest>, JsonRejection>,
) -> ApiResult<Json<serde_json::Value>> {
    state
        .resend_limiter
        .hit(&ip)
        .map_err(ApiError::RateLimited)?;

    let request = json_body(payload)?;
    if request.email.trim().is_empty() {
        let mut errors = crate::services::validation::FieldErrors::new();
        errors.add("email", "This field may not be blank.");
        return Err(errors.into());
    }

    match users::get_user_by_email(&state.db, &request.email)? {
        Some(user) if user.state() == AccountState::PendingVerification => {
            if let Err(err) = state.verifier.send_verification(&user).await {
                tracing::error!(user_id = user.id, "verification email not resent: {:?}", err);
            }
        }
        Some(_) => tracing::debug!("resend requested for an active account"),
        None => tracing::debug!("resend requested for an unknown address"),
    }

    Ok(Json(json!({ "message": RESEND_MESSAGE })))
}

#[derive(Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
}

/// POST /login/
pub async fn login(
    State(state): State<Arc<AppState>>,
    ClientIp(ip): ClientIp,
    jar: CookieJar,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> ApiResult<Response> {
    state
        .login_limiter
        .check(&ip)
        .map_err(ApiError::RateLimited)?;

    let request = json_body(payload)?;
    let Some(user) = auth::authenticate(&state.db, &request.username, &request.password)? else {
        state.login_limiter.record_attempt(&ip);
        tracing::warn!(username = %request.username, "failed login");
        return Err(ApiError::InvalidCredentials);
    };
    state.login_limiter.clear(&ip);

    let session = auth::create_session(&state.db, user.id, state.session_lifetime)?;
    let max_age = time::Duration::seconds(
        i64::try_from(state.session_lifetime.as_secs()).unwrap_or(i64::MAX),
    );
    let cookie = Cookie::build((SESSION_COOKIE, session.token.clone()))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .max_age(max_age)
        .build();

    tracing::info!(user_id = user.id, "logged in");
    Ok((
        jar.add(cookie),
        Json(json!({
            "token": session.token,
            "expires_at": session.expires_at,
        })),
    )
        .into_response())
}

/// POST /logout/
pub async fn logout(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    jar: CookieJar,
) -> ApiResult<Response> {
    auth::delete_session(&state.db, &current.token)?;

    let cookie = Cookie::build((SESSION_COOKIE, ""))
        .path("/")
        .max_age(time::Duration::ZERO)
        .build();

    Ok((jar.remove(cookie), StatusCode::NO_CONTENT).into_response())
}

/// GET /users/:username/
pub async fn public_profile(
    State(state): State<Arc<AppState>>,
    Path(username): Path<String>,
) -> ApiResult<Json<PublicProfile>> {
    let user = users::get_user_by_username(&state.db, &username)?
        .ok_or_else(|| ApiError::not_found("User not found"))?;
    let posts = blog::list_blogs_by_author(
        &state.db,
        user.id,
        state.config.content.author_posts_limit,
    )?;

    Ok(Json(PublicProfile {
        profile: Profile::from(&user),
        author_posts: blog::to_views(&state.db, posts)?,
    }))
}

/// GET /whoami/
pub async fn whoami(current: CurrentUser) -> Json<serde_json::Value> {
    Json(json!({ "username": current.user.username }))
}

/// PUT /profile/
pub async fn update_profile(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    payload: Result<Json<UpdateProfile>, JsonRejection>,
) -> ApiResult<Json<Profile>> {
    let input = json_body(payload)?;
    let user = users::update_profile(&state.db, current.user.id, input)?;
    Ok(Json(Profile::from(&user)))
}
