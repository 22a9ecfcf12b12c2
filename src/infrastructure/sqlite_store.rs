//! SQLite implementation of [`CrawlStore`]
//!
//! Tables are created by [`DatabaseConnection::migrate`](super::DatabaseConnection::migrate).
//! In `category_counts` an empty `subcategory_id` is the whole-category row.

#![allow(clippy::uninlined_format_args)]

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool, sqlite::SqliteRow};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

use crate::domain::{
    CategorySnapshot, CategorySnapshotEntry, CrawlStore, Item, ItemId, Section, SectionCounts, SubtreeKey,
    SuggestionRecord,
};

/// Bound parameters per `IN (...)` lookup, well below SQLite's variable limit
const MAX_LOOKUP_BINDS: usize = 500;

#[derive(Clone)]
pub struct SqliteCrawlStore {
    pool: Arc<SqlitePool>,
}

impl SqliteCrawlStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool: Arc::new(pool) }
    }

    fn subcategory_column(key: &SubtreeKey) -> &str {
        key.subcategory_id.as_deref().unwrap_or("")
    }

    fn key_from_columns(category_id: String, subcategory_id: String) -> SubtreeKey {
        if subcategory_id.is_empty() {
            SubtreeKey::category(category_id)
        } else {
            SubtreeKey::subcategory(category_id, subcategory_id)
        }
    }

    fn record_from_row(row: &SqliteRow) -> Result<SuggestionRecord> {
        let asin: String = row.try_get("asin")?;
        let section: String = row.try_get("section")?;
        Ok(SuggestionRecord {
            id: ItemId::parse(&asin)?,
            section: section.parse::<Section>()?,
            name: row.try_get("name")?,
            url: row.try_get("url")?,
            image_url: row.try_get("image_url")?,
            first_seen_at: row.try_get("first_seen_at")?,
            suggested_at: row.try_get("suggested_at")?,
        })
    }

    /// Number of suggestion rows
    pub async fn count_suggestions(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM suggestions")
            .fetch_one(&*self.pool)
            .await?;
        Ok(row.try_get("n")?)
    }
}

#[async_trait]
impl CrawlStore for SqliteCrawlStore {
    async fn already_seen(&self, ids: &[ItemId]) -> Result<HashSet<ItemId>> {
        let mut seen = HashSet::new();
        if ids.is_empty() {
            return Ok(seen);
        }

        for chunk in ids.chunks(MAX_LOOKUP_BINDS) {
            let mut query: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT asin FROM suggestions WHERE asin IN (");
            let mut separated = query.separated(", ");
            for id in chunk {
                separated.push_bind(id.as_str());
            }
            separated.push_unseparated(")");

            let rows = query
                .build()
                .fetch_all(&*self.pool)
                .await
                .context("Seen lookup query failed")?;
            for row in rows {
                let asin: String = row.try_get("asin")?;
                seen.insert(ItemId::parse(&asin)?);
            }
        }
        Ok(seen)
    }

    async fn upsert_items(&self, items: &[Item], suggested: &[ItemId]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let mut inserted = 0u64;
        for item in items {
            let result = sqlx::query(
                r"
                INSERT OR IGNORE INTO suggestions
                (asin, section, name, url, image_url, first_seen_at, suggested_at)
                VALUES (?, ?, ?, ?, ?, ?, NULL)
                ",
            )
            .bind(item.id.as_str())
            .bind(item.section.as_str())
            .bind(&item.name)
            .bind(&item.url)
            .bind(item.image_url.as_deref())
            .bind(item.first_seen_at)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("Failed to insert item {}", item.id))?;
            inserted += result.rows_affected();
        }

        let now = Utc::now();
        let mut stamped = 0u64;
        for id in suggested {
            let result = sqlx::query("UPDATE suggestions SET suggested_at = ? WHERE asin = ? AND suggested_at IS NULL")
                .bind(now)
                .bind(id.as_str())
                .execute(&mut *tx)
                .await
                .with_context(|| format!("Failed to mark {} as suggested", id))?;
            stamped += result.rows_affected();
        }

        tx.commit().await?;
        info!(
            "💾 Stored {} new items ({} already known), {} newly suggested",
            inserted,
            items.len() as u64 - inserted,
            stamped
        );
        Ok(())
    }

    async fn suggestion(&self, id: &ItemId) -> Result<Option<SuggestionRecord>> {
        let row = sqlx::query(
            r"
            SELECT asin, section, name, url, image_url, first_seen_at, suggested_at
            FROM suggestions WHERE asin = ?
            ",
        )
        .bind(id.as_str())
        .fetch_optional(&*self.pool)
        .await?;

        row.as_ref().map(Self::record_from_row).transpose()
    }

    async fn category_snapshot(&self) -> Result<CategorySnapshot> {
        let rows = sqlx::query("SELECT category_id, subcategory_id, name, item_count, updated_at FROM category_counts")
            .fetch_all(&*self.pool)
            .await?;

        let mut snapshot = CategorySnapshot::new();
        for row in rows {
            let count: i64 = row.try_get("item_count")?;
            snapshot.insert(CategorySnapshotEntry {
                key: Self::key_from_columns(row.try_get("category_id")?, row.try_get("subcategory_id")?),
                name: row.try_get("name")?,
                item_count: u32::try_from(count).context("Negative category count in database")?,
                updated_at: row.try_get::<DateTime<Utc>, _>("updated_at")?,
            });
        }
        Ok(snapshot)
    }

    async fn set_category_snapshot(&self, key: &SubtreeKey, item_count: u32, name: &str) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO category_counts (category_id, subcategory_id, name, item_count, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT (category_id, subcategory_id) DO UPDATE SET
                name = excluded.name,
                item_count = excluded.item_count,
                updated_at = excluded.updated_at
            ",
        )
        .bind(&key.category_id)
        .bind(Self::subcategory_column(key))
        .bind(name)
        .bind(i64::from(item_count))
        .bind(Utc::now())
        .execute(&*self.pool)
        .await?;
        Ok(())
    }

    async fn prune_category_snapshot(
        &self,
        valid_keys: &HashSet<SubtreeKey>,
        visited_category_ids: &HashSet<String>,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let rows = sqlx::query("SELECT category_id, subcategory_id FROM category_counts")
            .fetch_all(&mut *tx)
            .await?;

        let mut removed = 0;
        for row in rows {
            let key = Self::key_from_columns(row.try_get("category_id")?, row.try_get("subcategory_id")?);
            let unconfirmed = !valid_keys.contains(&key);
            let unvisited_child = !key.is_whole_category() && !visited_category_ids.contains(&key.category_id);
            if unconfirmed || unvisited_child {
                sqlx::query("DELETE FROM category_counts WHERE category_id = ? AND subcategory_id = ?")
                    .bind(&key.category_id)
                    .bind(Self::subcategory_column(&key))
                    .execute(&mut *tx)
                    .await?;
                debug!("Pruned snapshot row {}", key);
                removed += 1;
            }
        }
        tx.commit().await?;

        if removed > 0 {
            info!("🧹 Pruned {} category snapshot rows", removed);
        }
        Ok(())
    }

    async fn last_section_counts(&self) -> Result<Option<SectionCounts>> {
        let rows = sqlx::query("SELECT section, result_count FROM section_counts")
            .fetch_all(&*self.pool)
            .await?;
        if rows.is_empty() {
            return Ok(None);
        }

        let mut counts = SectionCounts::new();
        for row in rows {
            let section: String = row.try_get("section")?;
            let count: i64 = row.try_get("result_count")?;
            counts.set(
                section.parse()?,
                u32::try_from(count).context("Negative section count in database")?,
            );
        }
        Ok(Some(counts))
    }

    async fn set_last_section_counts(&self, counts: &SectionCounts) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let now = Utc::now();
        for (section, count) in counts.iter() {
            sqlx::query("INSERT OR REPLACE INTO section_counts (section, result_count, observed_at) VALUES (?, ?, ?)")
                .bind(section.as_str())
                .bind(i64::from(count))
                .bind(now)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}
