//! Shared fixtures for integration tests: a scriptable fake listing site, a
//! preference oracle with a fixed taste, and an in-memory SQLite store.

#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use vine_sentinel_lib::application::CycleSettings;
use vine_sentinel_lib::domain::{
    FilterNode, Item, ItemId, ListingPage, ListingSession, ListingTarget, OracleItem, PreferenceOracle, Section,
    SectionCounts,
};
use vine_sentinel_lib::infrastructure::{DatabaseConnection, SqliteCrawlStore};

pub const PAGE_SIZE: usize = 24;

/// Ten-character ids: a four-character prefix and a six-digit counter
pub fn ids(prefix: &str, range: std::ops::Range<u32>) -> Vec<String> {
    assert_eq!(prefix.len(), 4, "prefix keeps ids at ten characters");
    range.map(|n| format!("{prefix}{n:06}")).collect()
}

pub fn id(raw: &str) -> ItemId {
    ItemId::parse(raw).unwrap()
}

pub async fn sqlite_store() -> Arc<SqliteCrawlStore> {
    let db = DatabaseConnection::new("sqlite::memory:").await.unwrap();
    db.migrate().await.unwrap();
    Arc::new(SqliteCrawlStore::new(db.pool().clone()))
}

pub fn settings() -> CycleSettings {
    CycleSettings {
        shuffle_seed: Some(7),
        ..CycleSettings::default()
    }
}

#[derive(Default, Clone)]
struct Listing {
    ids: Vec<String>,
    filter: Vec<FilterNode>,
}

/// Fake listing site paginating each target's ids 24 to a page
#[derive(Default)]
pub struct FakeSite {
    counts: SectionCounts,
    listings: HashMap<ListingTarget, Listing>,
    opens: Vec<(ListingTarget, u32)>,
}

impl FakeSite {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_count(&mut self, section: Section, count: u32) {
        self.counts.set(section, count);
    }

    /// Replace the content of `target`, newest item first
    pub fn set_listing(&mut self, target: ListingTarget, ids: Vec<String>) {
        self.listings.entry(target).or_default().ids = ids;
    }

    /// Filter nodes shown on page 1 of `target`
    pub fn set_filter(&mut self, target: ListingTarget, nodes: Vec<FilterNode>) {
        self.listings.entry(target).or_default().filter = nodes;
    }

    pub fn remove(&mut self, target: &ListingTarget) {
        self.listings.remove(target);
    }

    pub fn opens(&self) -> &[(ListingTarget, u32)] {
        &self.opens
    }

    pub fn opened(&self, target: &ListingTarget) -> bool {
        self.opens.iter().any(|(t, _)| t == target)
    }

    pub fn clear_opens(&mut self) {
        self.opens.clear();
    }
}

#[async_trait]
impl ListingSession for FakeSite {
    async fn section_counts(&mut self) -> Result<SectionCounts> {
        Ok(self.counts.clone())
    }

    async fn open(&mut self, target: &ListingTarget, page: u32) -> Result<ListingPage> {
        self.opens.push((target.clone(), page));
        let listing = self.listings.get(target).cloned().unwrap_or_default();

        let start = (page.saturating_sub(1) as usize) * PAGE_SIZE;
        let items: Vec<Item> = listing
            .ids
            .iter()
            .skip(start)
            .take(PAGE_SIZE)
            .map(|raw| {
                let item_id = id(raw);
                let url = format!("https://www.amazon.com/dp/{item_id}");
                Item::new(item_id, target.section, format!("Item {raw}"), url)
            })
            .collect();

        Ok(ListingPage {
            page_number: page,
            items,
            total_results: Some(listing.ids.len() as u32),
            has_next: start + PAGE_SIZE < listing.ids.len(),
            filter_nodes: if page == 1 { listing.filter } else { Vec::new() },
        })
    }
}

/// Oracle that likes a fixed set of ids and every subcategory
#[derive(Default)]
pub struct TasteOracle {
    liked: HashSet<String>,
    extra_answers: Vec<String>,
    submitted: Mutex<Vec<Vec<String>>>,
}

impl TasteOracle {
    pub fn liking(ids: &[&str]) -> Self {
        Self {
            liked: ids.iter().map(ToString::to_string).collect(),
            ..Self::default()
        }
    }

    /// Ids appended to every appeal answer regardless of the batch
    #[must_use]
    pub fn also_answering(mut self, ids: &[&str]) -> Self {
        self.extra_answers = ids.iter().map(ToString::to_string).collect();
        self
    }

    pub fn batches(&self) -> Vec<Vec<String>> {
        self.submitted.lock().unwrap().clone()
    }

    pub fn submitted_count(&self) -> usize {
        self.batches().iter().map(Vec::len).sum()
    }
}

#[async_trait]
impl PreferenceOracle for TasteOracle {
    async fn classify_appeal(&self, items: &[OracleItem]) -> Result<Vec<String>> {
        let batch: Vec<String> = items.iter().map(|i| i.id.to_string()).collect();
        self.submitted.lock().unwrap().push(batch.clone());
        let mut answer: Vec<String> = batch.into_iter().filter(|id| self.liked.contains(id)).collect();
        answer.extend(self.extra_answers.iter().cloned());
        Ok(answer)
    }

    async fn filter_subcategories(&self, _category: &str, subcategories: &[String]) -> Result<Vec<String>> {
        Ok(subcategories.to_vec())
    }
}
