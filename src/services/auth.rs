use crate::db::{format_timestamp, now_timestamp};
use crate::models::User;
use crate::services::users::{row_to_user, USER_COLUMNS};
use crate::Database;
use anyhow::{Context, Result};
use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::Utc;
use rand::{rngs::OsRng, RngCore};
use rusqlite::OptionalExtension;
use std::time::Duration;

pub const MIN_PASSWORD_LENGTH: usize = 8;

/// Every rule the password breaks, in a stable order. Empty means acceptable.
pub fn password_problems(password: &str) -> Vec<String> {
    let mut problems = Vec::new();
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        problems.push(format!(
            "Password must be at least {} characters long.",
            MIN_PASSWORD_LENGTH
        ));
    }
    if !password.chars().any(|c| c.is_ascii_uppercase()) {
        problems.push("Password must contain at least one uppercase letter.".to_string());
    }
    if !password.chars().any(|c| c.is_ascii_lowercase()) {
        problems.push("Password must contain at least one lowercase letter.".to_string());
    }
    if !password.chars().any(|c| c.is_ascii_digit()) {
        problems.push("Password must contain at least one digit.".to_string());
    }
    problems
}

pub fn validate_password(password: &str) -> Result<()> {
    match password_problems(password).into_iter().next() {
        Some(problem) => anyhow::bail!(problem),
        None => Ok(()),
    }
}

pub fn hash_password(password: &str) -> Result<String> {
    validate_password(password)?;
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let hash = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("Password hashing failed: {}", e))?;
    Ok(hash.to_string())
}

const DUMMY_HASH: &str =
    "$argon2id$v=19$m=19456,t=2,p=1$dW5rbm93bg$0000000000000000000000000000000000000000000";

pub fn verify_password(password: &str, hash: &str) -> bool {
    let parsed_hash = match PasswordHash::new(hash) {
        Ok(h) => h,
        Err(_) => {
            burn_verify(password);
            return false;
        }
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok()
}

// Unknown usernames still pay for one verification so lookups cannot be timed.
fn burn_verify(password: &str) {
    if let Ok(dummy) = PasswordHash::new(DUMMY_HASH) {
        let _ = Argon2::default().verify_password(password.as_bytes(), &dummy);
    }
}

pub fn generate_session_token() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Returns the user only when the password matches an active account.
pub fn authenticate(db: &Database, username: &str, password: &str) -> Result<Option<User>> {
    let conn = db.get()?;
    let user: Option<User> = conn
        .query_row(
            &format!("SELECT {} FROM users WHERE username = ?", USER_COLUMNS),
            [username],
            row_to_user,
        )
        .optional()?;

    match user {
        Some(u) if verify_password(password, &u.password_hash) && u.is_active => Ok(Some(u)),
        Some(_) => Ok(None),
        None => {
            burn_verify(password);
            Ok(None)
        }
    }
}

pub struct Session {
    pub token: String,
    pub expires_at: String,
}

pub fn create_session(db: &Database, user_id: i64, lifetime: Duration) -> Result<Session> {
    let token = generate_session_token();
    let expires_at = chrono::Duration::from_std(lifetime)
        .ok()
        .and_then(|lifetime| Utc::now().checked_add_signed(lifetime))
        .map(format_timestamp)
        .context("session lifetime out of range")?;
    let conn = db.get()?;
    conn.execute(
        "INSERT INTO sessions (user_id, token, expires_at, created_at) VALUES (?, ?, ?, ?)",
        (user_id, &token, &expires_at, now_timestamp()),
    )?;
    Ok(Session { token, expires_at })
}

/// Resolves a session token to its user. Expired sessions and inactive
/// accounts resolve to `None`.
pub fn validate_session(db: &Database, token: &str) -> Result<Option<User>> {
    let conn = db.get()?;
    let user = conn
        .query_row(
            &format!(
                "SELECT {} FROM users WHERE is_active = 1 AND id = (
                    SELECT user_id FROM sessions WHERE token = ? AND expires_at > ?
                 )",
                USER_COLUMNS
            ),
            (token, now_timestamp()),
            row_to_user,
        )
        .optional()?;
    Ok(user)
}

pub fn delete_session(db: &Database, token: &str) -> Result<()> {
    let conn = db.get()?;
    conn.execute("DELETE FROM sessions WHERE token = ?", [token])?;
    Ok(())
}

pub fn cleanup_expired_sessions(db: &Database) -> Result<usize> {
    let conn = db.get()?;
    let removed = conn.execute(
        "DELETE FROM sessions WHERE expires_at <= ?",
        [now_timestamp()],
    )?;
    Ok(removed)
}
