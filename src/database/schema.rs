//! Database schema migrations

use anyhow::Result;
use sqlx::{Pool, Sqlite};

/// Run database migrations to create/update schema
pub async fn run_migrations(pool: &Pool<Sqlite>) -> Result<()> {
    // Analyzed files table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS files (
            filename TEXT NOT NULL,
            sub_track INTEGER NOT NULL DEFAULT 0,
            modified INTEGER NOT NULL,
            kind TEXT NOT NULL DEFAULT 'unknown',
            metadata TEXT NOT NULL,
            updated_at INTEGER NOT NULL,
            PRIMARY KEY (filename, sub_track)
        );

        CREATE INDEX IF NOT EXISTS idx_files_kind ON files(kind);
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    #[tokio::test]
    async fn test_migrations_are_repeatable() {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();

        run_migrations(&pool).await.unwrap();
        run_migrations(&pool).await.unwrap();

        let columns: Vec<String> =
            sqlx::query_scalar("SELECT name FROM pragma_table_info('files')")
                .fetch_all(&pool)
                .await
                .unwrap();
        assert_eq!(
            columns,
            vec!["filename", "sub_track", "modified", "kind", "metadata", "updated_at"]
        );
    }
}
