use crate::db::{now_timestamp, unique_violation};
use crate::models::{RegisterUser, UpdateProfile, User};
use crate::services::auth::{hash_password, password_problems};
use crate::services::error::{ServiceError, ServiceResult};
use crate::services::validation::{
    check_email, check_max_length, check_url, check_username, FieldErrors, MAX_NAME_LENGTH,
    MAX_URL_LENGTH,
};
use crate::Database;
use anyhow::Result;
use rusqlite::{Connection, OptionalExtension};

pub(crate) const USER_COLUMNS: &str = "id, username, email, password_hash, first_name, last_name, bio, profile_picture, profile_picture_url, job_title, facebook, youtube, instagram, twitter, linkedin, is_active, date_joined, updated_at";

pub(crate) fn row_to_user(row: &rusqlite::Row) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        username: row.get(1)?,
        email: row.get(2)?,
        password_hash: row.get(3)?,
        first_name: row.get(4)?,
        last_name: row.get(5)?,
        bio: row.get(6)?,
        profile_picture: row.get(7)?,
        profile_picture_url: row.get(8)?,
        job_title: row.get(9)?,
        facebook: row.get(10)?,
        youtube: row.get(11)?,
        instagram: row.get(12)?,
        twitter: row.get(13)?,
        linkedin: row.get(14)?,
        is_active: row.get(15)?,
        date_joined: row.get(16)?,
        updated_at: row.get(17)?,
    })
}

/// Lowercases the domain part, leaving the local part as typed.
pub fn normalize_email(email: &str) -> String {
    let email = email.trim();
    match email.rsplit_once('@') {
        Some((local, domain)) => format!("{}@{}", local, domain.to_lowercase()),
        None => email.to_string(),
    }
}

fn username_taken(conn: &Connection, username: &str, except: Option<i64>) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT id FROM users WHERE username = ?1 AND (?2 IS NULL OR id != ?2)",
        rusqlite::params![username, except],
        |row| row.get::<_, i64>(0),
    )
    .optional()
    .map(|found| found.is_some())
}

// `email` is declared COLLATE NOCASE, so equality here ignores case.
fn email_taken(conn: &Connection, email: &str, except: Option<i64>) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT id FROM users WHERE email = ?1 AND (?2 IS NULL OR id != ?2)",
        rusqlite::params![email, except],
        |row| row.get::<_, i64>(0),
    )
    .optional()
    .map(|found| found.is_some())
}

fn validate_registration(conn: &Connection, input: &RegisterUser) -> ServiceResult<()> {
    let mut errors = FieldErrors::new();

    check_username(&mut errors, &input.username);
    if !errors.contains("username") && username_taken(conn, &input.username, None)? {
        errors.add("username", "A user with that username already exists.");
    }

    let email = normalize_email(&input.email);
    check_email(&mut errors, &email);
    if !errors.contains("email") && email_taken(conn, &email, None)? {
        errors.add("email", "A user with this email already exists.");
    }

    check_max_length(&mut errors, "first_name", &input.first_name, MAX_NAME_LENGTH);
    check_max_length(&mut errors, "last_name", &input.last_name, MAX_NAME_LENGTH);

    for problem in password_problems(&input.password) {
        errors.add("password", problem);
    }

    errors.into_result().map_err(ServiceError::Invalid)
}

fn map_unique_violation(err: rusqlite::Error) -> ServiceError {
    match unique_violation(&err) {
        Some(column) if column == "users.username" => {
            let mut errors = FieldErrors::new();
            errors.add("username", "A user with that username already exists.");
            ServiceError::Invalid(errors)
        }
        Some(column) if column == "users.email" => {
            let mut errors = FieldErrors::new();
            errors.add("email", "A user with this email already exists.");
            ServiceError::Invalid(errors)
        }
        _ => ServiceError::Database(err),
    }
}

fn insert_user(
    conn: &Connection,
    input: &RegisterUser,
    password_hash: &str,
    is_active: bool,
) -> ServiceResult<i64> {
    let now = now_timestamp();
    conn.execute(
        "INSERT INTO users (username, email, password_hash, first_name, last_name, is_active, date_joined, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        rusqlite::params![
            input.username.trim(),
            normalize_email(&input.email),
            password_hash,
            input.first_name.trim(),
            input.last_name.trim(),
            is_active,
            now,
            now,
        ],
    )
    .map_err(map_unique_violation)?;
    Ok(conn.last_insert_rowid())
}

/// Creates an account in `PendingVerification` (inactive) state.
#[tracing::instrument(skip(db, input), fields(username = %input.username))]
pub fn register_user(db: &Database, input: &RegisterUser) -> ServiceResult<User> {
    create_account(db, input, false)
}

/// Creates an account that can log in immediately. Used by the admin CLI.
pub fn create_active_user(db: &Database, input: &RegisterUser) -> ServiceResult<User> {
    create_account(db, input, true)
}

fn create_account(db: &Database, input: &RegisterUser, is_active: bool) -> ServiceResult<User> {
    {
        let conn = db.get()?;
        validate_registration(&conn, input)?;
    }
    let password_hash = hash_password(&input.password)?;

    let conn = db.get()?;
    let id = insert_user(&conn, input, &password_hash, is_active)?;
    let user = conn.query_row(
        &format!("SELECT {} FROM users WHERE id = ?", USER_COLUMNS),
        [id],
        row_to_user,
    )?;
    tracing::info!(user_id = user.id, active = is_active, "account created");
    Ok(user)
}

pub fn get_user(db: &Database, id: i64) -> Result<Option<User>> {
    let conn = db.get()?;
    let user = conn
        .query_row(
            &format!("SELECT {} FROM users WHERE id = ?", USER_COLUMNS),
            [id],
            row_to_user,
        )
        .optional()?;
    Ok(user)
}

pub fn get_user_by_username(db: &Database, username: &str) -> Result<Option<User>> {
    let conn = db.get()?;
    let user = conn
        .query_row(
            &format!("SELECT {} FROM users WHERE username = ?", USER_COLUMNS),
            [username],
            row_to_user,
        )
        .optional()?;
    Ok(user)
}

pub fn get_user_by_email(db: &Database, email: &str) -> Result<Option<User>> {
    let conn = db.get()?;
    let user = conn
        .query_row(
            &format!("SELECT {} FROM users WHERE email = ?", USER_COLUMNS),
            [normalize_email(email)],
            row_to_user,
        )
        .optional()?;
    Ok(user)
}

/// Looks a user up by id and email together; both must still match.
pub fn get_user_by_id_and_email(db: &Database, id: i64, email: &str) -> Result<Option<User>> {
    let conn = db.get()?;
    let user = conn
        .query_row(
            &format!("SELECT {} FROM users WHERE id = ? AND email = ?", USER_COLUMNS),
            (id, email),
            row_to_user,
        )
        .optional()?;
    Ok(user)
}

pub fn list_users(db: &Database) -> Result<Vec<User>> {
    let conn = db.get()?;
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM users ORDER BY date_joined DESC, id DESC",
        USER_COLUMNS
    ))?;
    let users = stmt
        .query_map([], row_to_user)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(users)
}

/// Flips only the `is_active` column.
pub fn set_active(db: &Database, id: i64, active: bool) -> Result<bool> {
    let conn = db.get()?;
    let changed = conn.execute(
        "UPDATE users SET is_active = ? WHERE id = ?",
        rusqlite::params![active, id],
    )?;
    Ok(changed > 0)
}

/// Removes the account. Its posts stay, with their author cleared.
pub fn delete_user_by_username(db: &Database, username: &str) -> Result<bool> {
    let conn = db.get()?;
    let removed = conn.execute("DELETE FROM users WHERE username = ?", [username])?;
    Ok(removed > 0)
}

/// `None` keeps the stored value, blank clears it, anything else replaces it.
fn merge_optional(current: Option<String>, update: Option<String>) -> Option<String> {
    match update {
        None => current,
        Some(value) if value.trim().is_empty() => None,
        Some(value) => Some(value.trim().to_string()),
    }
}

#[tracing::instrument(skip(db, input))]
pub fn update_profile(db: &Database, user_id: i64, input: UpdateProfile) -> ServiceResult<User> {
    let current = get_user(db, user_id)?.ok_or(ServiceError::NotFound("User not found"))?;

    let username = input
        .username
        .map(|u| u.trim().to_string())
        .unwrap_or(current.username);
    let email = input
        .email
        .map(|e| normalize_email(&e))
        .unwrap_or(current.email);
    let first_name = input
        .first_name
        .map(|n| n.trim().to_string())
        .unwrap_or(current.first_name);
    let last_name = input
        .last_name
        .map(|n| n.trim().to_string())
        .unwrap_or(current.last_name);
    let bio = merge_optional(current.bio, input.bio);
    let job_title = merge_optional(current.job_title, input.job_title);
    let profile_picture = merge_optional(current.profile_picture, input.profile_picture);
    let profile_picture_url =
        merge_optional(current.profile_picture_url, input.profile_picture_url);
    let facebook = merge_optional(current.facebook, input.facebook);
    let youtube = merge_optional(current.youtube, input.youtube);
    let instagram = merge_optional(current.instagram, input.instagram);
    let twitter = merge_optional(current.twitter, input.twitter);
    let linkedin = merge_optional(current.linkedin, input.linkedin);

    let conn = db.get()?;
    let mut errors = FieldErrors::new();
    check_username(&mut errors, &username);
    if !errors.contains("username") && username_taken(&conn, &username, Some(user_id))? {
        errors.add("username", "A user with that username already exists.");
    }
    check_email(&mut errors, &email);
    if !errors.contains("email") && email_taken(&conn, &email, Some(user_id))? {
        errors.add("email", "A user with this email already exists.");
    }
    check_max_length(&mut errors, "first_name", &first_name, MAX_NAME_LENGTH);
    check_max_length(&mut errors, "last_name", &last_name, MAX_NAME_LENGTH);
    if let Some(title) = &job_title {
        check_max_length(&mut errors, "job_title", title, 50);
    }
    if let Some(picture) = &profile_picture {
        check_max_length(&mut errors, "profile_picture", picture, MAX_URL_LENGTH);
    }
    for (field, value) in [
        ("profile_picture_url", &profile_picture_url),
        ("facebook", &facebook),
        ("youtube", &youtube),
        ("instagram", &instagram),
        ("twitter", &twitter),
        ("linkedin", &linkedin),
    ] {
        if let Some(value) = value {
            check_url(&mut errors, field, value);
        }
    }
    errors.into_result()?;

    conn.execute(
        "UPDATE users SET username = ?, email = ?, first_name = ?, last_name = ?, bio = ?, job_title = ?,
            profile_picture = ?, profile_picture_url = ?, facebook = ?, youtube = ?, instagram = ?,
            twitter = ?, linkedin = ?, updated_at = ?
         WHERE id = ?",
        rusqlite::params![
            username,
            email,
            first_name,
            last_name,
            bio,
            job_title,
            profile_picture,
            profile_picture_url,
            facebook,
            youtube,
            instagram,
            twitter,
            linkedin,
            now_timestamp(),
            user_id,
        ],
    )
    .map_err(map_unique_violation)?;

    let user = conn.query_row(
        &format!("SELECT {} FROM users WHERE id = ?", USER_COLUMNS),
        [user_id],
        row_to_user,
    )?;
    Ok(user)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_domain_is_lowercased() {
        assert_eq!(normalize_email(" Jane@Example.COM "), "Jane@example.com");
        assert_eq!(normalize_email("no-at-sign"), "no-at-sign");
    }

    #[test]
    fn merge_rules() {
        let current = Some("old".to_string());
        assert_eq!(merge_optional(current.clone(), None), current);
        assert_eq!(merge_optional(current.clone(), Some("  ".into())), None);
        assert_eq!(
            merge_optional(current, Some(" new ".into())),
            Some("new".to_string())
        );
    }
}
