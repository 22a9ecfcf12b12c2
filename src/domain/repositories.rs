//! Repository interface for the crawl engine's durable state
//!
//! Contains the trait the engine reads and commits through. Writes within a
//! cycle are upserts keyed by item identifier or subtree key.

use async_trait::async_trait;
use anyhow::Result;
use std::collections::HashSet;

use crate::domain::{
    category::{CategorySnapshot, SubtreeKey},
    item::{Item, ItemId},
    section::SectionCounts,
    suggestion::SuggestionRecord,
};

#[async_trait]
pub trait CrawlStore: Send + Sync {
    // Item identity
    /// Subset of `ids` that already has a suggestion record. One batched lookup per call.
    async fn already_seen(&self, ids: &[ItemId]) -> Result<HashSet<ItemId>>;
    /// Insert unknown items (first observation wins) and stamp `suggested_at` on
    /// `suggested` ids that have never been suggested.
    async fn upsert_items(&self, items: &[Item], suggested: &[ItemId]) -> Result<()>;
    async fn suggestion(&self, id: &ItemId) -> Result<Option<SuggestionRecord>>;

    // Category snapshot
    async fn category_snapshot(&self) -> Result<CategorySnapshot>;
    async fn set_category_snapshot(&self, key: &SubtreeKey, item_count: u32, name: &str) -> Result<()>;
    /// Drop rows not re-confirmed this cycle and descendants of categories that were not entered.
    async fn prune_category_snapshot(
        &self,
        valid_keys: &HashSet<SubtreeKey>,
        visited_category_ids: &HashSet<String>,
    ) -> Result<()>;

    // Section counts
    async fn last_section_counts(&self) -> Result<Option<SectionCounts>>;
    async fn set_last_section_counts(&self, counts: &SectionCounts) -> Result<()>;
}
