use rusqlite::{Connection, OptionalExtension};
use slug::slugify;

pub const MAX_SLUG_LENGTH: usize = 255;
/// Room left for a `-N` suffix under `MAX_SLUG_LENGTH`.
const MAX_BASE_LENGTH: usize = MAX_SLUG_LENGTH - 15;
const EMPTY_TITLE_SLUG: &str = "post";

pub fn generate_slug(title: &str) -> String {
    let mut slug = slugify(title);
    if slug.len() > MAX_BASE_LENGTH {
        slug.truncate(MAX_BASE_LENGTH);
        while slug.ends_with('-') {
            slug.pop();
        }
    }
    if slug.is_empty() {
        return EMPTY_TITLE_SLUG.to_string();
    }
    slug
}

pub fn validate_slug(slug: &str) -> bool {
    if slug.is_empty() || slug.len() > MAX_SLUG_LENGTH {
        return false;
    }
    slug.chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

/// Whether some post other than `own_id` already holds `slug`.
fn slug_taken(conn: &Connection, slug: &str, own_id: Option<i64>) -> rusqlite::Result<bool> {
    let holder: Option<i64> = conn
        .query_row(
            "SELECT id FROM blogs WHERE slug = ?1 AND (?2 IS NULL OR id != ?2)",
            rusqlite::params![slug, own_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(holder.is_some())
}

/// Derives a slug from `title` that no other post holds.
///
/// The post being saved (`own_id`) is excluded from the probe, so saving a
/// post without changing its title keeps its slug. Collisions get `-1`, `-2`,
/// ... appended to the base. Callers run this in the same write transaction
/// as the insert or update that stores the result.
pub fn assign_unique_slug(
    conn: &Connection,
    title: &str,
    own_id: Option<i64>,
) -> rusqlite::Result<String> {
    let base = generate_slug(title);
    let mut candidate = base.clone();
    let mut suffix = 0u32;
    while slug_taken(conn, &candidate, own_id)? {
        suffix += 1;
        candidate = format!("{}-{}", base, suffix);
    }
    debug_assert!(validate_slug(&candidate), "bad slug {:?}", candidate);
    Ok(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn_with(slugs: &[(i64, &str)]) -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE blogs (id INTEGER PRIMARY KEY, slug TEXT UNIQUE)")
            .unwrap();
        for (id, slug) in slugs {
            conn.execute(
                "INSERT INTO blogs (id, slug) VALUES (?, ?)",
                rusqlite::params![id, slug],
            )
            .unwrap();
        }
        conn
    }

    #[test]
    fn free_base_is_used_as_is() {
        let conn = conn_with(&[]);
        assert_eq!(
            assign_unique_slug(&conn, "Hello World", None).unwrap(),
            "hello-world"
        );
    }

    #[test]
    fn collisions_count_upwards() {
        let conn = conn_with(&[(1, "hello-world"), (2, "hello-world-1")]);
        assert_eq!(
            assign_unique_slug(&conn, "Hello, World!", None).unwrap(),
            "hello-world-2"
        );
    }

    #[test]
    fn own_slug_is_not_a_collision() {
        let conn = conn_with(&[(7, "hello-world")]);
        assert_eq!(
            assign_unique_slug(&conn, "Hello World", Some(7)).unwrap(),
            "hello-world"
        );
    }

    #[test]
    fn renamed_post_reclaims_free_base() {
        let conn = conn_with(&[(3, "draft-title-1")]);
        assert_eq!(
            assign_unique_slug(&conn, "Draft Title", Some(3)).unwrap(),
            "draft-title"
        );
    }

    #[test]
    fn degenerate_titles_fall_back() {
        assert_eq!(generate_slug("!!!"), "post");
        assert_eq!(generate_slug(""), "post");
        assert_eq!(generate_slug("2024"), "2024");
    }

    #[test]
    fn long_titles_leave_room_for_suffix() {
        let slug = generate_slug(&"word ".repeat(100));
        assert!(slug.len() <= MAX_BASE_LENGTH);
        assert!(!slug.ends_with('-'));
    }
}
