use crate::services::media::UploadError;
use crate::services::validation::FieldErrors;
use crate::services::verification::VerifyError;
use crate::services::ServiceError;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("validation failed: {0}")]
    Validation(FieldErrors),
    #[error("{0}")]
    BadRequest(String),
    #[error("authentication credentials were not provided")]
    Unauthorized,
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error("invalid page")]
    PageNotFound,
    #[error("rate limited for {0:?}")]
    RateLimited(Duration),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            Self::Validation(errors) => (StatusCode::BAD_REQUEST, Json(errors)).into_response(),
            Self::BadRequest(message) => {
                (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
            }
            Self::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                Json(json!({ "detail": "Authentication credentials were not provided." })),
            )
                .into_response(),
            Self::InvalidCredentials => (
                StatusCode::UNAUTHORIZED,
                Json(json!({ "detail": "No active account found with the given credentials" })),
            )
                .into_response(),
            Self::Forbidden(message) => {
                (StatusCode::FORBIDDEN, Json(json!({ "error": message }))).into_response()
            }
            Self::NotFound(message) => {
                (StatusCode::NOT_FOUND, Json(json!({ "error": message }))).into_response()
            }
            Self::PageNotFound => (
                StatusCode::NOT_FOUND,
                Json(json!({ "detail": "Invalid page." })),
            )
                .into_response(),
            Self::RateLimited(retry_after) => {
                // round up so clients never retry early
                let secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
                let mut response = (
                    StatusCode::TOO_MANY_REQUESTS,
                    Json(json!({
                        "detail": format!("Request was throttled. Expected available in {} seconds.", secs)
                    })),
                )
                    .into_response();
                response
                    .headers_mut()
                    .insert(header::RETRY_AFTER, HeaderValue::from(secs));
                response
            }
            Self::Internal(err) => {
                tracing::error!("Application error: {:?}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "error": "Internal server error" })),
                )
                    .into_response()
            }
        }
    }
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Invalid(errors) => Self::Validation(errors),
            ServiceError::NotFound(message) => Self::NotFound(message.to_string()),
            ServiceError::Forbidden(message) => Self::Forbidden(message.to_string()),
            ServiceError::Database(err) => Self::Internal(err.into()),
            ServiceError::Other(err) => Self::Internal(err),
        }
    }
}

impl From<VerifyError> for ApiError {
    fn from(err: VerifyError) -> Self {
        match err {
            VerifyError::MissingToken => Self::bad_request("Token is missing."),
            VerifyError::BadSignature => Self::bad_request("Invalid verification link."),
            VerifyError::Expired => Self::bad_request("Verification link has expired."),
            VerifyError::UserNotFound => Self::not_found("User not found."),
            VerifyError::Internal(err) => Self::Internal(err),
        }
    }
}

impl From<UploadError> for ApiError {
    fn from(err: UploadError) -> Self {
        match err {
            UploadError::Internal(err) => Self::Internal(err),
            other => Self::bad_request(other.to_string()),
        }
    }
}

impl From<FieldErrors> for ApiError {
    fn from(errors: FieldErrors) -> Self {
        Self::Validation(errors)
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limited_sets_retry_after() {
        let response = ApiError::RateLimited(Duration::from_millis(1500)).into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "2");
    }

    #[test]
    fn service_errors_map_to_statuses() {
        let forbidden: ApiError = ServiceError::Forbidden("nope").into();
        assert_eq!(forbidden.into_response().status(), StatusCode::FORBIDDEN);

        let missing: ApiError = ServiceError::NotFound("Blog not found").into();
        assert_eq!(missing.into_response().status(), StatusCode::NOT_FOUND);

        let mut errors = FieldErrors::new();
        errors.add("title", "This field may not be blank.");
        let invalid: ApiError = ServiceError::Invalid(errors).into();
        assert_eq!(invalid.into_response().status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn internal_errors_hide_details() {
        let err = ApiError::from(anyhow::anyhow!("disk on fire"));
        assert_eq!(
            err.into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
