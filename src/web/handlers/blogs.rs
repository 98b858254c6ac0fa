use super::json_body;
use crate::models::{BlogView, CreateBlog, UpdateBlog};
use crate::services::blog;
use crate::web::error::{ApiError, ApiResult};
use crate::web::extractors::CurrentUser;
use crate::web::pagination::{Page, PageQuery, PageWindow};
use crate::web::state::AppState;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use std::sync::Arc;

const BLOG_NOT_FOUND: &str = "Blog not found";

/// GET /blogs/
pub async fn list(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PageQuery>,
) -> ApiResult<Json<Page<BlogView>>> {
    let count = blog::count_blogs(&state.db)?;
    let window = PageWindow::resolve(
        query.page.as_deref(),
        count,
        state.config.content.posts_per_page,
    )?;
    let blogs = blog::list_blogs(&state.db, window.size, window.offset())?;
    let views = blog::to_views(&state.db, blogs)?;
    let base_url = state.config.site.absolute_url("/blogs/");
    Ok(Json(window.into_page(count, views, &base_url)))
}

/// GET /blogs/:slug/
pub async fn detail(
    State(state): State<Arc<AppState>>,
    Path(slug): Path<String>,
) -> ApiResult<Json<BlogView>> {
    let found = blog::get_blog_by_slug(&state.db, &slug)?
        .ok_or_else(|| ApiError::not_found(BLOG_NOT_FOUND))?;
    Ok(Json(blog::to_view(&state.db, found)?))
}

/// POST /blogs/
pub async fn create(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    payload: Result<Json<CreateBlog>, JsonRejection>,
) -> ApiResult<Response> {
    let input = json_body(payload)?;
    let created = blog::create_blog(&state.db, input, current.user.id)?;
    let view = blog::to_view(&state.db, created)?;
    Ok((StatusCode::CREATED, Json(view)).into_response())
}

fn parse_id(raw: &str) -> ApiResult<i64> {
    raw.parse().map_err(|_| ApiError::not_found(BLOG_NOT_FOUND))
}

/// PUT /blogs/:id/
pub async fn update(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    Path(id): Path<String>,
    payload: Result<Json<UpdateBlog>, JsonRejection>,
) -> ApiResult<Json<BlogView>> {
    let id = parse_id(&id)?;
    let existing = blog::get_blog_by_id(&state.db, id)?
        .ok_or_else(|| ApiError::not_found(BLOG_NOT_FOUND))?;
    blog::ensure_author(&existing, &current.user)?;

    let input = json_body(payload)?;
    let updated = blog::update_blog(&state.db, id, input)?;
    Ok(Json(blog::to_view(&state.db, updated)?))
}

/// POST /blogs/:id/delete/
pub async fn delete(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    let id = parse_id(&id)?;
    let existing = blog::get_blog_by_id(&state.db, id)?
        .ok_or_else(|| ApiError::not_found(BLOG_NOT_FOUND))?;
    blog::ensure_author(&existing, &current.user)?;

    blog::delete_blog(&state.db, id)?;
    Ok(StatusCode::NO_CONTENT)
}
