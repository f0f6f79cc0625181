//! Database repository - main entry point
//! Delegates to ops modules for actual operations

use std::path::{MAIN_SEPARATOR, Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{Pool, Sqlite, sqlite::SqlitePoolOptions};
use tracing::{debug, info, warn};

use super::{models::*, ops, schema};
use crate::cache::{CacheEntry, CacheError, CacheKey, MetadataCache};
use crate::media::{MediaInfo, MediaKind};
use crate::utils::modified_millis;

/// SQLite-backed metadata cache
#[derive(Debug, Clone)]
pub struct MediaDatabase {
    pool: Pool<Sqlite>,
}

impl MediaDatabase {
    /// Create and initialize database at the given path
    pub async fn new(db_path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .context("Failed to create database directory")?;
        }

        let db_url = format!("sqlite:{}?mode=rwc", db_path.display());

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&db_url)
            .await
            .with_context(|| format!("Failed to open database {:?}", db_path))?;

        // WAL lets browsing read while a scan writes
        sqlx::query("PRAGMA journal_mode = WAL")
            .execute(&pool)
            .await?;

        sqlx::query("PRAGMA synchronous = NORMAL")
            .execute(&pool)
            .await?;

        // Increase cache size (default is 2000 pages = ~8MB, set to ~32MB)
        sqlx::query("PRAGMA cache_size = -32000")
            .execute(&pool)
            .await?;

        schema::run_migrations(&pool).await?;

        info!("Opened metadata database at {:?}", db_path);
        Ok(Self { pool })
    }

    /// Private in-memory database, mostly for tests
    pub async fn in_memory() -> Result<Self> {
        // A single connection that never expires keeps the memory database alive
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;

        schema::run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    // ============ File Operations ============

    pub async fn upsert_file(&self, file: NewMediaFile) -> Result<()> {
        ops::upsert_file(&self.pool, file).await
    }

    pub async fn get_file(&self, filename: &str, sub_track: i64) -> Result<Option<DbMediaFile>> {
        ops::get_file(&self.pool, filename, sub_track).await
    }

    pub async fn get_files(&self, kind: Option<&str>) -> Result<Vec<DbMediaFile>> {
        ops::get_files(&self.pool, kind).await
    }

    pub async fn delete_file(&self, filename: &str) -> Result<u64> {
        ops::delete_file(&self.pool, filename).await
    }

    pub async fn delete_files_with_prefix(&self, prefix: &str) -> Result<u64> {
        ops::delete_files_with_prefix(&self.pool, prefix).await
    }

    pub async fn count_files(&self) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM files")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Remove rows whose file vanished or changed
    async fn remove_stale(&self) -> Result<u64> {
        let stamps = ops::get_file_stamps(&self.pool).await?;

        let stale = tokio::task::spawn_blocking(move || {
            stamps
                .into_iter()
                .filter(|s| modified_millis(Path::new(&s.filename)) != Some(s.modified))
                .collect::<Vec<_>>()
        })
        .await?;

        let mut removed = 0u64;
        for stamp in stale {
            debug!("Removing stale cache row {:?}", stamp.filename);
            removed += ops::delete_file_track(&self.pool, &stamp.filename, stamp.sub_track).await?;
        }
        Ok(removed)
    }
}

fn path_key(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

fn to_entry(row: DbMediaFile) -> Result<CacheEntry, CacheError> {
    let info: MediaInfo = serde_json::from_str(&row.metadata)
        .map_err(|e| CacheError::Serialize(e.to_string()))?;
    Ok(CacheEntry {
        path: PathBuf::from(row.filename),
        sub_track: row.sub_track as u32,
        modified: row.modified,
        info: Arc::new(info),
    })
}

fn db_error(e: anyhow::Error) -> CacheError {
    CacheError::Database(e.to_string())
}

#[async_trait]
impl MetadataCache for MediaDatabase {
    async fn get(&self, key: &CacheKey) -> Result<Option<MediaInfo>, CacheError> {
        let row = self
            .get_file(&path_key(&key.path), key.sub_track as i64)
            .await
            .map_err(db_error)?;

        match row {
            Some(row) if row.modified == key.modified => {
                let info = serde_json::from_str(&row.metadata)
                    .map_err(|e| CacheError::Serialize(e.to_string()))?;
                Ok(Some(info))
            }
            _ => Ok(None),
        }
    }

    async fn put(&self, key: &CacheKey, info: &MediaInfo) -> Result<(), CacheError> {
        let metadata =
            serde_json::to_string(info).map_err(|e| CacheError::Serialize(e.to_string()))?;

        self.upsert_file(NewMediaFile {
            filename: path_key(&key.path),
            sub_track: key.sub_track as i64,
            modified: key.modified,
            kind: info.kind.as_str().to_string(),
            metadata,
        })
        .await
        .map_err(db_error)
    }

    async fn remove_entry(&self, path: &Path) -> Result<u64, CacheError> {
        self.delete_file(&path_key(path)).await.map_err(db_error)
    }

    async fn remove_under_path(&self, dir: &Path) -> Result<u64, CacheError> {
        let mut prefix = path_key(dir);
        if !prefix.ends_with(MAIN_SEPARATOR) {
            prefix.push(MAIN_SEPARATOR);
        }
        self.delete_files_with_prefix(&prefix)
            .await
            .map_err(db_error)
    }

    async fn cleanup(&self) -> Result<u64, CacheError> {
        self.remove_stale().await.map_err(db_error)
    }

    async fn entries(&self, kind: Option<MediaKind>) -> Result<Vec<CacheEntry>, CacheError> {
        let rows = self
            .get_files(kind.map(|k| k.as_str()))
            .await
            .map_err(db_error)?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            let (filename, sub_track) = (row.filename.clone(), row.sub_track);
            match to_entry(row) {
                Ok(entry) => entries.push(entry),
                Err(e) => {
                    warn!("Dropping unreadable cache row {:?}: {}", filename, e);
                    if let Err(e) = ops::delete_file_track(&self.pool, &filename, sub_track).await {
                        warn!("Failed to delete cache row {:?}: {}", filename, e);
                    }
                }
            }
        }
        Ok(entries)
    }
}
