use crate::db::now_timestamp;
use crate::models::Media;
use crate::Database;
use anyhow::Result;
use rusqlite::OptionalExtension;
use std::path::Path;
use uuid::Uuid;

/// Image types accepted for profile pictures and featured images, keyed by
/// the MIME type sniffed from the bytes.
const ALLOWED_IMAGE_TYPES: &[(&str, &str)] = &[
    ("image/jpeg", "jpg"),
    ("image/png", "png"),
    ("image/gif", "gif"),
    ("image/webp", "webp"),
];

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("File too large: {size} bytes (max {max} bytes)")]
    TooLarge { size: usize, max: usize },
    #[error("Unsupported file type. Upload a JPEG, PNG, GIF or WebP image.")]
    UnsupportedType,
    #[error("The submitted file is empty.")]
    Empty,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Sniffs the image type from its magic bytes; the client's content type and
/// file extension are never trusted.
pub fn detect_image_type(data: &[u8]) -> Option<(&'static str, &'static str)> {
    let kind = infer::get(data)?;
    ALLOWED_IMAGE_TYPES
        .iter()
        .find(|(mime, _)| *mime == kind.mime_type())
        .copied()
}

#[tracing::instrument(skip(db, upload_dir, data), fields(size = data.len()))]
pub fn upload_image(
    db: &Database,
    upload_dir: &Path,
    original_name: &str,
    data: &[u8],
    max_size: usize,
    uploaded_by: i64,
) -> Result<Media, UploadError> {
    if data.is_empty() {
        return Err(UploadError::Empty);
    }
    if data.len() > max_size {
        return Err(UploadError::TooLarge {
            size: data.len(),
            max: max_size,
        });
    }
    let (mime_type, extension) = detect_image_type(data).ok_or(UploadError::UnsupportedType)?;

    let filename = format!("{}.{}", Uuid::new_v4(), extension);
    let path = upload_dir.join(&filename);
    std::fs::create_dir_all(upload_dir).map_err(anyhow::Error::from)?;
    std::fs::write(&path, data).map_err(anyhow::Error::from)?;

    let original_name = Path::new(original_name)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("upload")
        .to_string();
    let created_at = now_timestamp();

    let inserted = db.get().and_then(|conn| {
        conn.execute(
            "INSERT INTO media (filename, original_name, mime_type, size_bytes, uploaded_by, created_at) VALUES (?, ?, ?, ?, ?, ?)",
            (
                &filename,
                &original_name,
                mime_type,
                data.len() as i64,
                uploaded_by,
                &created_at,
            ),
        )?;
        Ok(conn.last_insert_rowid())
    });
    let id = match inserted {
        Ok(id) => id,
        Err(err) => {
            // no row points at the file, so it must not outlive the failure
            if let Err(io) = std::fs::remove_file(&path) {
                tracing::warn!(path = %path.display(), "orphaned upload not removed: {}", io);
            }
            return Err(UploadError::Internal(err));
        }
    };

    let media = Media {
        id,
        filename,
        original_name,
        mime_type: mime_type.to_string(),
        size_bytes: data.len() as i64,
        uploaded_by: Some(uploaded_by),
        created_at,
    };
    tracing::info!(media_id = media.id, filename = %media.filename, "media uploaded");
    Ok(media)
}

pub fn get_media_by_filename(db: &Database, filename: &str) -> Result<Option<Media>> {
    let conn = db.get()?;
    let media = conn
        .query_row(
            "SELECT id, filename, original_name, mime_type, size_bytes, uploaded_by, created_at FROM media WHERE filename = ?",
            [filename],
            |row| {
                Ok(Media {
                    id: row.get(0)?,
                    filename: row.get(1)?,
                    original_name: row.get(2)?,
                    mime_type: row.get(3)?,
                    size_bytes: row.get(4)?,
                    uploaded_by: row.get(5)?,
                    created_at: row.get(6)?,
                })
            },
        )
        .optional()?;
    Ok(media)
}

/// Rejects anything that is not a bare file name produced by an upload.
pub fn is_safe_filename(filename: &str) -> bool {
    !filename.is_empty()
        && !filename.starts_with('.')
        && filename
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.')
        && !filename.contains("..")
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG: &[u8] = &[
        0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x48, 0x44,
        0x52,
    ];

    #[test]
    fn sniffs_png_regardless_of_name() {
        assert_eq!(detect_image_type(PNG), Some(("image/png", "png")));
        assert_eq!(detect_image_type(b"%PDF-1.7 not an image"), None);
        assert_eq!(detect_image_type(b"plain text"), None);
    }

    #[test]
    fn safe_filenames() {
        assert!(is_safe_filename("0b9a2c7e-1111-4222-8333-944455556666.png"));
        assert!(!is_safe_filename("../inkpost.toml"));
        assert!(!is_safe_filename(".hidden"));
        assert!(!is_safe_filename("a/b.png"));
        assert!(!is_safe_filename("a..png"));
        assert!(!is_safe_filename(""));
    }

    #[test]
    fn upload_stores_file_and_row() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(dir.path().join("t.db"), 2).unwrap();
        db.migrate().unwrap();
        let conn = db.get().unwrap();
        conn.execute(
            "INSERT INTO users (username, email, password_hash, date_joined, updated_at) VALUES ('jane', 'jane@example.com', 'x', '', '')",
            [],
        )
        .unwrap();
        let user_id = conn.last_insert_rowid();
        drop(conn);

        let uploads = dir.path().join("uploads");
        let media = upload_image(&db, &uploads, "../../me.txt", PNG, 1024, user_id).unwrap();
        assert!(media.filename.ends_with(".png"));
        assert_eq!(media.original_name, "me.txt");
        assert_eq!(std::fs::read(uploads.join(&media.filename)).unwrap(), PNG);

        let found = get_media_by_filename(&db, &media.filename).unwrap().unwrap();
        assert_eq!(found.id, media.id);
        assert_eq!(found.mime_type, "image/png");
    }

    #[test]
    fn failed_insert_leaves_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(dir.path().join("t.db"), 2).unwrap();
        db.migrate().unwrap();
        let uploads = dir.path().join("uploads");

        // no such uploader, so the foreign key rejects the row
        let result = upload_image(&db, &uploads, "me.png", PNG, 1024, 42);
        assert!(matches!(result, Err(UploadError::Internal(_))));
        assert_eq!(std::fs::read_dir(&uploads).unwrap().count(), 0);
    }

    #[test]
    fn upload_limits() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(dir.path().join("t.db"), 2).unwrap();
        db.migrate().unwrap();
        let uploads = dir.path().join("uploads");

        assert!(matches!(
            upload_image(&db, &uploads, "a.png", PNG, 4, 1),
            Err(UploadError::TooLarge { .. })
        ));
        assert!(matches!(
            upload_image(&db, &uploads, "a.png", b"hello", 1024, 1),
            Err(UploadError::UnsupportedType)
        ));
        assert!(matches!(
            upload_image(&db, &uploads, "a.png", b"", 1024, 1),
            Err(UploadError::Empty)
        ));
    }
}
