pub mod accounts;
pub mod blogs;
pub mod media;

use crate::web::error::ApiError;
use axum::extract::rejection::JsonRejection;
use axum::Json;
use serde_json::json;

/// Unwraps a JSON body, turning axum's rejection into a 400 with our error shape.
pub(crate) fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| ApiError::bad_request(rejection.body_text()))
}

pub async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}
