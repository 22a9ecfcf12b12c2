//! Test utilities for vine-sentinel
//!
//! Provides in-memory fakes for the engine seams (store, session, oracle) and
//! an isolated SQLite database, so tests never touch the network or disk.

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::application::SeenPredicate;
use crate::domain::{
    CategorySnapshot, CategorySnapshotEntry, CrawlStore, FilterNode, Item, ItemId, ListingPage, ListingSession,
    ListingTarget, OracleItem, PreferenceOracle, Section, SectionCounts, SubtreeKey, SuggestionRecord,
};
use crate::infrastructure::{DatabaseConnection, SqliteCrawlStore};

/// Test database configuration
pub struct TestDatabase {
    pub connection: DatabaseConnection,
}

impl TestDatabase {
    /// Create a new in-memory test database
    ///
    /// Each test gets a fresh, clean database state.
    pub async fn new() -> Result<Self> {
        let db = DatabaseConnection::new("sqlite::memory:").await?;
        db.migrate().await?;
        Ok(Self { connection: db })
    }

    pub fn store(&self) -> SqliteCrawlStore {
        SqliteCrawlStore::new(self.connection.pool().clone())
    }
}

/// Item with a synthetic name and product URL
pub fn item(id: &str, section: Section) -> Item {
    let id = ItemId::parse(id).expect("test ids are valid");
    let url = format!("https://www.amazon.com/dp/{id}");
    Item::new(id.clone(), section, format!("Item {id}"), url)
}

/// In-memory [`CrawlStore`]
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<ItemId, SuggestionRecord>>,
    snapshot: Mutex<HashMap<SubtreeKey, CategorySnapshotEntry>>,
    counts: Mutex<Option<SectionCounts>>,
    lookups: AtomicU64,
    fail_seen: bool,
}

impl MemoryStore {
    #[must_use]
    pub fn failing_seen_lookups(mut self) -> Self {
        self.fail_seen = true;
        self
    }

    pub fn seen_lookups(&self) -> u64 {
        self.lookups.load(Ordering::Relaxed)
    }

    pub fn record_count(&self) -> usize {
        self.records.lock().unwrap().len()
    }
}

#[async_trait]
impl CrawlStore for MemoryStore {
    async fn already_seen(&self, ids: &[ItemId]) -> Result<HashSet<ItemId>> {
        self.lookups.fetch_add(1, Ordering::Relaxed);
        if self.fail_seen {
            return Err(anyhow!("database is locked"));
        }
        let records = self.records.lock().unwrap();
        Ok(ids.iter().filter(|id| records.contains_key(*id)).cloned().collect())
    }

    async fn upsert_items(&self, items: &[Item], suggested: &[ItemId]) -> Result<()> {
        let mut records = self.records.lock().unwrap();
        for item in items {
            records.entry(item.id.clone()).or_insert_with(|| SuggestionRecord::from(item));
        }
        let now = Utc::now();
        for id in suggested {
            if let Some(record) = records.get_mut(id) {
                record.suggested_at.get_or_insert(now);
            }
        }
        Ok(())
    }

    async fn suggestion(&self, id: &ItemId) -> Result<Option<SuggestionRecord>> {
        Ok(self.records.lock().unwrap().get(id).cloned())
    }

    async fn category_snapshot(&self) -> Result<CategorySnapshot> {
        Ok(self.snapshot.lock().unwrap().values().cloned().collect())
    }

    async fn set_category_snapshot(&self, key: &SubtreeKey, item_count: u32, name: &str) -> Result<()> {
        self.snapshot.lock().unwrap().insert(
            key.clone(),
            CategorySnapshotEntry {
                key: key.clone(),
                name: name.to_string(),
                item_count,
                updated_at: Utc::now(),
            },
        );
        Ok(())
    }

    async fn prune_category_snapshot(
        &self,
        valid_keys: &HashSet<SubtreeKey>,
        visited_category_ids: &HashSet<String>,
    ) -> Result<()> {
        self.snapshot.lock().unwrap().retain(|key, _| {
            valid_keys.contains(key) && (key.is_whole_category() || visited_category_ids.contains(&key.category_id))
        });
        Ok(())
    }

    async fn last_section_counts(&self) -> Result<Option<SectionCounts>> {
        Ok(self.counts.lock().unwrap().clone())
    }

    async fn set_last_section_counts(&self, counts: &SectionCounts) -> Result<()> {
        *self.counts.lock().unwrap() = Some(counts.clone());
        Ok(())
    }
}

/// Seen-predicate over a fixed identifier set
pub struct FixedSeen {
    ids: HashSet<ItemId>,
}

impl FixedSeen {
    pub fn new(ids: &[String]) -> Self {
        Self {
            ids: ids.iter().map(|id| ItemId::parse(id).expect("test ids are valid")).collect(),
        }
    }
}

#[async_trait]
impl SeenPredicate for FixedSeen {
    async fn already_seen(&self, ids: &[ItemId]) -> Result<HashSet<ItemId>> {
        Ok(ids.iter().filter(|id| self.ids.contains(*id)).cloned().collect())
    }
}

#[derive(Default)]
struct ScriptedListing {
    total: Option<u32>,
    pages: Vec<Vec<String>>,
    filter: Vec<FilterNode>,
    failing_pages: HashSet<u32>,
    no_next_from: Option<u32>,
}

/// [`ListingSession`] replaying scripted pages and recording every navigation
#[derive(Default)]
pub struct ScriptedSession {
    counts: SectionCounts,
    listings: HashMap<ListingTarget, ScriptedListing>,
    opens: Vec<(ListingTarget, u32)>,
}

impl ScriptedSession {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_counts(mut self, counts: SectionCounts) -> Self {
        self.counts = counts;
        self
    }

    #[must_use]
    pub fn with_pages(mut self, target: ListingTarget, total: Option<u32>, pages: Vec<Vec<String>>) -> Self {
        let listing = self.listings.entry(target).or_default();
        listing.total = total;
        listing.pages = pages;
        self
    }

    /// Filter nodes shown on page 1 of `target`
    #[must_use]
    pub fn with_filter(mut self, target: ListingTarget, nodes: Vec<FilterNode>) -> Self {
        self.listings.entry(target).or_default().filter = nodes;
        self
    }

    #[must_use]
    pub fn failing_on(mut self, target: ListingTarget, page: u32) -> Self {
        self.listings.entry(target).or_default().failing_pages.insert(page);
        self
    }

    /// Hide the next-page control from `page` onwards
    #[must_use]
    pub fn without_next_after(mut self, target: ListingTarget, page: u32) -> Self {
        self.listings.entry(target).or_default().no_next_from = Some(page);
        self
    }

    pub fn open_count(&self) -> usize {
        self.opens.len()
    }

    pub fn opens_of(&self, target: &ListingTarget) -> Vec<u32> {
        self.opens.iter().filter(|(t, _)| t == target).map(|(_, p)| *p).collect()
    }
}

#[async_trait]
impl ListingSession for ScriptedSession {
    async fn section_counts(&mut self) -> Result<SectionCounts> {
        Ok(self.counts.clone())
    }

    async fn open(&mut self, target: &ListingTarget, page: u32) -> Result<ListingPage> {
        self.opens.push((target.clone(), page));
        let Some(listing) = self.listings.get(target) else {
            return Ok(ListingPage {
                page_number: page,
                ..ListingPage::default()
            });
        };
        if listing.failing_pages.contains(&page) {
            return Err(anyhow!("navigation timeout on {target} page {page}"));
        }

        let idx = page.saturating_sub(1) as usize;
        let items = listing
            .pages
            .get(idx)
            .map(|ids| ids.iter().map(|id| item(id, target.section)).collect())
            .unwrap_or_default();
        let has_next = idx + 1 < listing.pages.len() && listing.no_next_from.is_none_or(|p| page < p);

        Ok(ListingPage {
            page_number: page,
            items,
            total_results: listing.total,
            has_next,
            filter_nodes: if page == 1 { listing.filter.clone() } else { Vec::new() },
        })
    }
}

/// [`PreferenceOracle`] with canned answers and call recording
#[derive(Default)]
pub struct ScriptedOracle {
    appealing: Vec<String>,
    fail_appeal: bool,
    subcategory_answers: HashMap<String, Result<Vec<String>, String>>,
    batches: Mutex<Vec<usize>>,
}

impl ScriptedOracle {
    /// Ids returned by every appeal call
    #[must_use]
    pub fn appealing(mut self, ids: &[&str]) -> Self {
        self.appealing = ids.iter().map(ToString::to_string).collect();
        self
    }

    #[must_use]
    pub fn failing_appeal(mut self) -> Self {
        self.fail_appeal = true;
        self
    }

    /// Answer for one category; categories without an answer get every subcategory
    #[must_use]
    pub fn with_subcategories(mut self, category: &str, answer: Result<Vec<String>, String>) -> Self {
        self.subcategory_answers.insert(category.to_string(), answer);
        self
    }

    pub fn batch_sizes_sorted(&self) -> Vec<usize> {
        let mut sizes = self.batches.lock().unwrap().clone();
        sizes.sort_unstable();
        sizes
    }
}

#[async_trait]
impl PreferenceOracle for ScriptedOracle {
    async fn classify_appeal(&self, items: &[OracleItem]) -> Result<Vec<String>> {
        self.batches.lock().unwrap().push(items.len());
        if self.fail_appeal {
            return Err(anyhow!("oracle unavailable"));
        }
        Ok(self.appealing.clone())
    }

    async fn filter_subcategories(&self, category: &str, subcategories: &[String]) -> Result<Vec<String>> {
        match self.subcategory_answers.get(category) {
            Some(Ok(names)) => Ok(names.clone()),
            Some(Err(e)) => Err(anyhow!("{e}")),
            None => Ok(subcategories.to_vec()),
        }
    }
}
