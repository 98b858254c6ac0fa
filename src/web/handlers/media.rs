use crate::services::media;
use crate::web::error::{ApiError, ApiResult};
use crate::web::extractors::CurrentUser;
use crate::web::state::AppState;
use axum::extract::{Multipart, Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use std::sync::Arc;

/// POST /media/ (multipart, field `file`)
pub async fn upload(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    mut multipart: Multipart,
) -> ApiResult<Response> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(e.body_text()))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let name = field.file_name().unwrap_or("upload").to_string();
        let data = field
            .bytes()
            .await
            .map_err(|e| ApiError::bad_request(e.body_text()))?;

        let stored = media::upload_image(
            &state.db,
            &state.media_dir,
            &name,
            &data,
            state.max_upload_bytes,
            current.user.id,
        )?;
        let url = state
            .config
            .site
            .absolute_url(&format!("/media/{}", stored.filename));

        return Ok((
            StatusCode::CREATED,
            Json(json!({
                "id": stored.id,
                "filename": stored.filename,
                "url": url,
                "mime_type": stored.mime_type,
                "size_bytes": stored.size_bytes,
            })),
        )
            .into_response());
    }

    Err(ApiError::bad_request("No file was submitted."))
}

/// GET /media/:filename
pub async fn serve(
    State(state): State<Arc<AppState>>,
    Path(filename): Path<String>,
) -> ApiResult<Response> {
    let not_found = || ApiError::not_found("File not found");
    if !media::is_safe_filename(&filename) {
        return Err(not_found());
    }

    let file_path = state.media_dir.join(&filename);

    // the resolved path must stay inside the upload directory
    let canonical_media = state.media_dir.canonicalize().map_err(|_| not_found())?;
    let canonical_file = file_path.canonicalize().map_err(|_| not_found())?;
    if !canonical_file.starts_with(&canonical_media) {
        return Err(not_found());
    }

    let content = tokio::fs::read(&canonical_file)
        .await
        .map_err(anyhow::Error::from)?;
    let mime = mime_guess::from_path(&filename).first_or_octet_stream();

    Ok((
        [
            (header::CONTENT_TYPE, mime.as_ref().to_string()),
            (header::CACHE_CONTROL, "public, max-age=31536000, immutable".to_string()),
        ],
        content,
    )
        .into_response())
}
