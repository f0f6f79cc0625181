//! Analyzed file CRUD operations

use anyhow::Result;
use sqlx::{Pool, Sqlite};

use super::current_timestamp;
use crate::database::{DbFileStamp, DbMediaFile, NewMediaFile};

/// Insert a file row, replacing any previous row for the same key
pub async fn upsert_file(pool: &Pool<Sqlite>, file: NewMediaFile) -> Result<()> {
    let now = current_timestamp();

    sqlx::query(
        r#"
        INSERT INTO files (filename, sub_track, modified, kind, metadata, updated_at)
        VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT(filename, sub_track) DO UPDATE SET
            modified = excluded.modified,
            kind = excluded.kind,
            metadata = excluded.metadata,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(&file.filename)
    .bind(file.sub_track)
    .bind(file.modified)
    .bind(&file.kind)
    .bind(&file.metadata)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(())
}

/// Get a file row by key
pub async fn get_file(
    pool: &Pool<Sqlite>,
    filename: &str,
    sub_track: i64,
) -> Result<Option<DbMediaFile>> {
    let file = sqlx::query_as::<_, DbMediaFile>(
        "SELECT * FROM files WHERE filename = ? AND sub_track = ?",
    )
    .bind(filename)
    .bind(sub_track)
    .fetch_optional(pool)
    .await?;
    Ok(file)
}

/// Get all file rows, optionally of one kind
pub async fn get_files(pool: &Pool<Sqlite>, kind: Option<&str>) -> Result<Vec<DbMediaFile>> {
    let files = match kind {
        Some(kind) => {
            sqlx::query_as::<_, DbMediaFile>(
                "SELECT * FROM files WHERE kind = ? ORDER BY filename, sub_track",
            )
            .bind(kind)
            .fetch_all(pool)
            .await?
        }
        None => {
            sqlx::query_as::<_, DbMediaFile>("SELECT * FROM files ORDER BY filename, sub_track")
                .fetch_all(pool)
                .await?
        }
    };
    Ok(files)
}

/// Get the key columns of every row
pub async fn get_file_stamps(pool: &Pool<Sqlite>) -> Result<Vec<DbFileStamp>> {
    let stamps =
        sqlx::query_as::<_, DbFileStamp>("SELECT filename, sub_track, modified FROM files")
            .fetch_all(pool)
            .await?;
    Ok(stamps)
}

/// Delete every row of one file
pub async fn delete_file(pool: &Pool<Sqlite>, filename: &str) -> Result<u64> {
    let result = sqlx::query("DELETE FROM files WHERE filename = ?")
        .bind(filename)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

/// Delete one row
pub async fn delete_file_track(pool: &Pool<Sqlite>, filename: &str, sub_track: i64) -> Result<u64> {
    let result = sqlx::query("DELETE FROM files WHERE filename = ? AND sub_track = ?")
        .bind(filename)
        .bind(sub_track)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

/// Delete every row whose filename starts with `prefix`
///
/// `prefix` must end with a path separator so `/a/rock` does not match
/// `/a/rockabilly`. `substr` is used instead of LIKE so `%` and `_` in
/// paths are literal.
pub async fn delete_files_with_prefix(pool: &Pool<Sqlite>, prefix: &str) -> Result<u64> {
    let result = sqlx::query("DELETE FROM files WHERE substr(filename, 1, length(?)) = ?")
        .bind(prefix)
        .bind(prefix)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}
