// Database connection and pool management
// This module handles SQLite database connections using sqlx

use anyhow::{Context, Result};
use sqlx::{SqlitePool, sqlite::SqlitePoolOptions};
use std::path::Path;
use tracing::debug;

pub struct DatabaseConnection {
    pool: SqlitePool,
}

impl DatabaseConnection {
    pub async fn new(database_url: &str) -> Result<Self> {
        let in_memory = database_url.contains(":memory:") || database_url.contains("mode=memory");

        if !in_memory {
            let db_path = database_url
                .strip_prefix("sqlite://")
                .or_else(|| database_url.strip_prefix("sqlite:"))
                .unwrap_or(database_url);
            let db_path = db_path.split('?').next().unwrap_or(db_path);

            if let Some(parent) = Path::new(db_path).parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("Failed to create database directory {parent:?}"))?;
            }
            // Ensure the database file exists by creating it if necessary
            if !Path::new(db_path).exists() {
                tokio::fs::File::create(db_path)
                    .await
                    .with_context(|| format!("Failed to create database file {db_path}"))?;
            }
        }

        // every connection to sqlite::memory: opens its own empty database
        let max_connections = if in_memory { 1 } else { 5 };
        let mut options = SqlitePoolOptions::new().max_connections(max_connections);
        if in_memory {
            // the database lives only as long as its single connection
            options = options.idle_timeout(None).max_lifetime(None);
        }
        let pool = options
            .connect(database_url)
            .await
            .with_context(|| format!("Failed to connect to {database_url}"))?;

        debug!("Connected to {} ({} max connections)", database_url, max_connections);
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<()> {
        // Create tables manually for now
        let create_suggestions_sql = r"
            CREATE TABLE IF NOT EXISTS suggestions (
                asin TEXT PRIMARY KEY,
                section TEXT NOT NULL,
                name TEXT NOT NULL,
                url TEXT NOT NULL,
                image_url TEXT,
                first_seen_at DATETIME NOT NULL,
                suggested_at DATETIME
            )
        ";

        let create_section_counts_sql = r"
            CREATE TABLE IF NOT EXISTS section_counts (
                section TEXT PRIMARY KEY,
                result_count INTEGER NOT NULL,
                observed_at DATETIME NOT NULL
            )
        ";

        // subcategory_id '' marks the whole-category row
        let create_category_counts_sql = r"
            CREATE TABLE IF NOT EXISTS category_counts (
                category_id TEXT NOT NULL,
                subcategory_id TEXT NOT NULL DEFAULT '',
                name TEXT NOT NULL,
                item_count INTEGER NOT NULL,
                updated_at DATETIME NOT NULL,
                PRIMARY KEY (category_id, subcategory_id)
            )
        ";

        let create_indexes_sql = r"
            CREATE INDEX IF NOT EXISTS idx_suggestions_suggested_at ON suggestions (suggested_at);
            CREATE INDEX IF NOT EXISTS idx_suggestions_first_seen_at ON suggestions (first_seen_at);
        ";

        sqlx::query(create_suggestions_sql).execute(&self.pool).await?;
        sqlx::query(create_section_counts_sql).execute(&self.pool).await?;
        sqlx::query(create_category_counts_sql).execute(&self.pool).await?;
        sqlx::query(create_indexes_sql).execute(&self.pool).await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_database_connection_creates_file() -> Result<()> {
        // 임시 디렉토리 생성
        let temp_dir = tempdir()?;
        let db_path = temp_dir.path().join("nested").join("test.db");
        let database_url = format!("sqlite:{}", db_path.to_string_lossy());

        let db = DatabaseConnection::new(&database_url).await?;

        assert!(!db.pool().is_closed());
        assert!(db_path.exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_database_migration_is_repeatable() -> Result<()> {
        let db = DatabaseConnection::new("sqlite::memory:").await?;

        // 마이그레이션 실행
        db.migrate().await?;
        db.migrate().await?;

        for table in ["suggestions", "section_counts", "category_counts"] {
            let result = sqlx::query("SELECT name FROM sqlite_master WHERE type='table' AND name=?")
                .bind(table)
                .fetch_optional(db.pool())
                .await?;
            assert!(result.is_some(), "missing table {table}");
        }
        Ok(())
    }
}
