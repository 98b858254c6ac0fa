use crate::db::{format_timestamp, unique_violation, DbConn};
use crate::models::{AuthorSummary, Blog, BlogView, Category, CreateBlog, UpdateBlog, User};
use crate::services::error::{ServiceError, ServiceResult};
use crate::services::slug::assign_unique_slug;
use crate::services::validation::{check_max_length, FieldErrors, MAX_URL_LENGTH};
use crate::Database;
use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, TransactionBehavior};

pub const MAX_TITLE_LENGTH: usize = 255;
pub const NOT_AUTHOR_MESSAGE: &str = "You are not the author of this blog";
const SLUG_RETRIES: usize = 5;

const BLOG_COLUMNS: &str = "id, title, slug, content, author_id, created_at, updated_at, published_date, is_draft, category, featured_image";

/// Default listing order: newest publication first, unpublished posts last.
const DEFAULT_ORDER: &str = "published_date IS NULL, published_date DESC, id DESC";

fn row_to_blog(row: &rusqlite::Row) -> rusqlite::Result<Blog> {
    Ok(Blog {
        id: row.get(0)?,
        title: row.get(1)?,
        slug: row.get(2)?,
        content: row.get(3)?,
        author_id: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
        published_date: row.get(7)?,
        is_draft: row.get(8)?,
        category: row
            .get::<_, Option<String>>(9)?
            .and_then(|c| c.parse().ok()),
        featured_image: row.get(10)?,
    })
}

/// Publication stamp rule: the first save that finds the post out of draft
/// stamps it; later saves never touch the stamp.
pub fn publication_date(
    is_draft: bool,
    current: Option<String>,
    now: DateTime<Utc>,
) -> Option<String> {
    match current {
        Some(stamp) => Some(stamp),
        None if !is_draft => Some(format_timestamp(now)),
        None => None,
    }
}

fn parse_category(errors: &mut FieldErrors, raw: Option<&str>) -> Option<Category> {
    match raw.map(str::trim) {
        None | Some("") => None,
        Some(value) => match value.parse::<Category>() {
            Ok(category) => Some(category),
            Err(()) => {
                errors.add(
                    "category",
                    format!("\"{}\" is not a valid choice.", value),
                );
                None
            }
        },
    }
}

fn validate_fields(
    errors: &mut FieldErrors,
    title: &str,
    content: &str,
    featured_image: Option<&str>,
) {
    if title.trim().is_empty() {
        errors.add("title", "This field may not be blank.");
    } else {
        check_max_length(errors, "title", title, MAX_TITLE_LENGTH);
    }
    if content.trim().is_empty() {
        errors.add("content", "This field may not be blank.");
    }
    if let Some(image) = featured_image {
        check_max_length(errors, "featured_image", image, MAX_URL_LENGTH);
    }
}

fn blank_to_none(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Runs `write` inside an IMMEDIATE transaction so the slug probe and the
/// write that stores it cannot interleave with another writer. A slug
/// collision that still reaches the UNIQUE constraint is retried.
fn save_with_unique_slug<F>(conn: &mut DbConn, title: &str, own_id: Option<i64>, write: F) -> ServiceResult<i64>
where
    F: Fn(&Connection, &str) -> rusqlite::Result<i64>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let slug = assign_unique_slug(&tx, title, own_id)?;
        match write(&*tx, &slug) {
            Ok(id) => {
                tx.commit()?;
                return Ok(id);
            }
            Err(err) if unique_violation(&err) == Some("blogs.slug") && attempt < SLUG_RETRIES => {
                tracing::warn!(slug = %slug, attempt, "slug collided on write, retrying");
                drop(tx);
            }
            Err(err) => return Err(err.into()),
        }
    }
}

#[tracing::instrument(skip(db, input), fields(title = %input.title))]
pub fn create_blog(db: &Database, input: CreateBlog, author_id: i64) -> ServiceResult<Blog> {
    let mut errors = FieldErrors::new();
    let featured_image = blank_to_none(input.featured_image);
    validate_fields(
        &mut errors,
        &input.title,
        &input.content,
        featured_image.as_deref(),
    );
    let category = parse_category(&mut errors, input.category.as_deref());
    errors.into_result()?;

    let title = input.title.trim().to_string();
    let is_draft = input.is_draft.unwrap_or(true);
    let now = Utc::now();
    let timestamp = format_timestamp(now);
    let published_date = publication_date(is_draft, None, now);

    let mut conn = db.get()?;
    let id = save_with_unique_slug(&mut conn, &title, None, |tx, slug| {
        tx.execute(
            "INSERT INTO blogs (title, slug, content, author_id, created_at, updated_at, published_date, is_draft, category, featured_image)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            rusqlite::params![
                title,
                slug,
                input.content,
                author_id,
                timestamp,
                timestamp,
                published_date,
                is_draft,
                category.map(|c| c.as_str()),
                featured_image,
            ],
        )?;
        Ok(tx.last_insert_rowid())
    })?;

    let blog = fetch_blog(&conn, id)?.ok_or(ServiceError::NotFound("Blog not found"))?;
    tracing::info!(blog_id = blog.id, slug = %blog.slug, "blog created");
    Ok(blog)
}

/// Partial update: absent fields keep their stored value. The slug is
/// derived again from the resulting title.
#[tracing::instrument(skip(db, input))]
pub fn update_blog(db: &Database, id: i64, input: UpdateBlog) -> ServiceResult<Blog> {
    let mut conn = db.get()?;
    let current = fetch_blog(&conn, id)?.ok_or(ServiceError::NotFound("Blog not found"))?;

    let title = input
        .title
        .map(|t| t.trim().to_string())
        .unwrap_or(current.title);
    let content = input.content.unwrap_or(current.content);
    let featured_image = match input.featured_image {
        Some(image) => blank_to_none(Some(image)),
        None => current.featured_image,
    };
    let is_draft = input.is_draft.unwrap_or(current.is_draft);

    let mut errors = FieldErrors::new();
    validate_fields(&mut errors, &title, &content, featured_image.as_deref());
    let category = match input.category {
        Some(raw) => parse_category(&mut errors, Some(raw.as_str())),
        None => current.category,
    };
    errors.into_result()?;

    let now = Utc::now();
    let published_date = publication_date(is_draft, current.published_date, now);
    let timestamp = format_timestamp(now);

    save_with_unique_slug(&mut conn, &title, Some(id), |tx, slug| {
        tx.execute(
            "UPDATE blogs SET title = ?, slug = ?, content = ?, updated_at = ?, published_date = ?,
                is_draft = ?, category = ?, featured_image = ?
             WHERE id = ?",
            rusqlite::params![
                title,
                slug,
                content,
                timestamp,
                published_date,
                is_draft,
                category.map(|c| c.as_str()),
                featured_image,
                id,
            ],
        )?;
        Ok(id)
    })?;

    let blog = fetch_blog(&conn, id)?.ok_or(ServiceError::NotFound("Blog not found"))?;
    tracing::info!(blog_id = blog.id, slug = %blog.slug, "blog updated");
    Ok(blog)
}

pub fn delete_blog(db: &Database, id: i64) -> Result<bool> {
    let conn = db.get()?;
    let removed = conn.execute("DELETE FROM blogs WHERE id = ?", [id])?;
    if removed > 0 {
        tracing::info!(blog_id = id, "blog deleted");
    }
    Ok(removed > 0)
}

/// Only the stored author may change a post. Orphaned posts belong to nobody.
pub fn ensure_author(blog: &Blog, user: &User) -> ServiceResult<()> {
    if blog.author_id == Some(user.id) {
        Ok(())
    } else {
        Err(ServiceError::Forbidden(NOT_AUTHOR_MESSAGE))
    }
}

fn fetch_blog(conn: &Connection, id: i64) -> rusqlite::Result<Option<Blog>> {
    conn.query_row(
        &format!("SELECT {} FROM blogs WHERE id = ?", BLOG_COLUMNS),
        [id],
        row_to_blog,
    )
    .optional()
}

pub fn get_blog_by_id(db: &Database, id: i64) -> Result<Option<Blog>> {
    let conn = db.get()?;
    Ok(fetch_blog(&conn, id)?)
}

pub fn get_blog_by_slug(db: &Database, slug: &str) -> Result<Option<Blog>> {
    let conn = db.get()?;
    let blog = conn
        .query_row(
            &format!("SELECT {} FROM blogs WHERE slug = ?", BLOG_COLUMNS),
            [slug],
            row_to_blog,
        )
        .optional()?;
    Ok(blog)
}

pub fn count_blogs(db: &Database) -> Result<i64> {
    let conn = db.get()?;
    let count = conn.query_row("SELECT COUNT(*) FROM blogs", [], |row| row.get(0))?;
    Ok(count)
}

pub fn list_blogs(db: &Database, limit: usize, offset: usize) -> Result<Vec<Blog>> {
    let conn = db.get()?;
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM blogs ORDER BY {} LIMIT ? OFFSET ?",
        BLOG_COLUMNS, DEFAULT_ORDER
    ))?;
    let blogs = stmt
        .query_map((limit as i64, offset as i64), row_to_blog)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(blogs)
}

pub fn list_blogs_by_author(db: &Database, author_id: i64, limit: usize) -> Result<Vec<Blog>> {
    let conn = db.get()?;
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM blogs WHERE author_id = ? ORDER BY {} LIMIT ?",
        BLOG_COLUMNS, DEFAULT_ORDER
    ))?;
    let blogs = stmt
        .query_map((author_id, limit as i64), row_to_blog)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(blogs)
}

/// Attaches author blocks, loading each distinct author once.
pub fn to_views(db: &Database, blogs: Vec<Blog>) -> Result<Vec<BlogView>> {
    let conn = db.get()?;
    let mut authors: std::collections::HashMap<i64, Option<AuthorSummary>> =
        std::collections::HashMap::new();
    let mut views = Vec::with_capacity(blogs.len());
    for blog in blogs {
        let author = match blog.author_id {
            Some(author_id) => match authors.get(&author_id) {
                Some(cached) => cached.clone(),
                None => {
                    let loaded = load_author(&conn, author_id)?;
                    authors.insert(author_id, loaded.clone());
                    loaded
                }
            },
            None => None,
        };
        views.push(BlogView::new(blog, author));
    }
    Ok(views)
}

pub fn to_view(db: &Database, blog: Blog) -> Result<BlogView> {
    let mut views = to_views(db, vec![blog])?;
    views
        .pop()
        .ok_or_else(|| anyhow::anyhow!("view conversion lost the blog"))
}

fn load_author(conn: &Connection, author_id: i64) -> rusqlite::Result<Option<AuthorSummary>> {
    conn.query_row(
        "SELECT id, username, first_name, last_name, email, profile_picture FROM users WHERE id = ?",
        [author_id],
        |row| {
            Ok(AuthorSummary {
                id: row.get(0)?,
                username: row.get(1)?,
                first_name: row.get(2)?,
                last_name: row.get(3)?,
                email: row.get(4)?,
                profile_picture: row.get(5)?,
            })
        },
    )
    .optional()
}
