//! Unseen-item resolution against durable storage
//!
//! Called once per page/chunk by the crawlers, never once per whole run, so its
//! latency gates crawl throughput: every call is a single batched lookup.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::trace;

use crate::domain::{CrawlStore, ItemId};

/// "Which of these identifiers have I already seen?"
#[async_trait]
pub trait SeenPredicate: Send + Sync {
    async fn already_seen(&self, ids: &[ItemId]) -> Result<HashSet<ItemId>>;
}

/// Store-backed [`SeenPredicate`]
pub struct UnseenItemResolver {
    store: Arc<dyn CrawlStore>,
    lookups: AtomicU64,
}

impl UnseenItemResolver {
    pub fn new(store: Arc<dyn CrawlStore>) -> Self {
        Self {
            store,
            lookups: AtomicU64::new(0),
        }
    }

    /// Number of store round-trips made so far
    pub fn lookups(&self) -> u64 {
        self.lookups.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl SeenPredicate for UnseenItemResolver {
    async fn already_seen(&self, ids: &[ItemId]) -> Result<HashSet<ItemId>> {
        if ids.is_empty() {
            return Ok(HashSet::new());
        }

        // ItemId is upper-cased on construction; dedup keeps the IN list short
        let unique: Vec<ItemId> = ids
            .iter()
            .cloned()
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();

        self.lookups.fetch_add(1, Ordering::Relaxed);
        let seen = self
            .store
            .already_seen(&unique)
            .await
            .context("Seen lookup failed")?;
        trace!("Seen lookup: {} candidates, {} already seen", unique.len(), seen.len());
        Ok(seen)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Item, Section};
    use crate::test_utils::MemoryStore;

    fn id(raw: &str) -> ItemId {
        ItemId::parse(raw).unwrap()
    }

    #[tokio::test]
    async fn empty_input_skips_the_store() {
        let store = Arc::new(MemoryStore::default());
        let resolver = UnseenItemResolver::new(store.clone());

        let seen = resolver.already_seen(&[]).await.unwrap();
        assert!(seen.is_empty());
        assert_eq!(resolver.lookups(), 0);
        assert_eq!(store.seen_lookups(), 0);
    }

    #[tokio::test]
    async fn one_batched_lookup_per_call() {
        let store = Arc::new(MemoryStore::default());
        let known = Item::new(id("B0AAAAAAAA"), Section::Recommended, "Lamp", "https://x/dp/B0AAAAAAAA");
        store.upsert_items(&[known], &[]).await.unwrap();
        let resolver = UnseenItemResolver::new(store.clone());

        let seen = resolver
            .already_seen(&[id("b0aaaaaaaa"), id("B0BBBBBBBB"), id("B0AAAAAAAA")])
            .await
            .unwrap();

        assert_eq!(seen, HashSet::from([id("B0AAAAAAAA")]));
        assert_eq!(store.seen_lookups(), 1);
    }

    #[tokio::test]
    async fn items_seen_in_another_section_are_still_seen() {
        let store = Arc::new(MemoryStore::default());
        let first = Item::new(id("B0CCCCCCCC"), Section::Available, "Mug", "https://x/dp/B0CCCCCCCC");
        store.upsert_items(&[first], &[]).await.unwrap();
        let resolver = UnseenItemResolver::new(store);

        let seen = resolver.already_seen(&[id("B0CCCCCCCC")]).await.unwrap();
        assert!(seen.contains(&id("B0CCCCCCCC")));
    }
}
