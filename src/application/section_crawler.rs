//! Section crawler
//!
//! Paginates one leaf (a flat section, a category or a subcategory) starting
//! from a page that is already loaded, and streams the unseen remainder of
//! every page to the dispatch queue as it goes.
//!
//! Termination, checked in order after each page:
//! 1. item budget reached
//! 2. page had no records at all and is not page 1
//! 3. seen-predicate supplied and the page yielded nothing unseen
//!    (without a predicate: every item on the page was already collected by this crawl)
//! 4. page bound reached, or the pagination control could not be advanced

use anyhow::{Result, anyhow};
use std::collections::{HashMap, HashSet};
use std::fmt;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::dispatch::ItemChunk;
use super::seen_resolver::SeenPredicate;
use crate::domain::{Item, ItemId, ListingPage, ListingSession, ListingTarget, PaginationCalculator};

/// Why a leaf crawl stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    BudgetReached,
    NoUnseenItems,
    AllItemsAlreadyCollected,
    EmptyPage,
    PageBoundReached,
    NoNextPage,
    NavigationFailed(String),
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BudgetReached => f.write_str("item budget reached"),
            Self::NoUnseenItems => f.write_str("page yielded no unseen items"),
            Self::AllItemsAlreadyCollected => f.write_str("page repeated already collected items"),
            Self::EmptyPage => f.write_str("page had no item records"),
            Self::PageBoundReached => f.write_str("page bound reached"),
            Self::NoNextPage => f.write_str("no next page"),
            Self::NavigationFailed(e) => write!(f, "pagination failed: {e}"),
        }
    }
}

/// Statistics of one leaf crawl
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafReport {
    pub target: ListingTarget,
    pub pages_visited: u32,
    pub items_extracted: usize,
    pub unseen_emitted: usize,
    /// Identifiers emitted by this leaf, in page order
    pub emitted: Vec<ItemId>,
    pub stop_reason: StopReason,
}

/// Every unseen item collected during one cycle, keyed by identifier
///
/// Shared by all leaves of a cycle so an item surfacing in a second leaf or
/// section is not emitted twice.
#[derive(Debug, Default)]
pub struct CrawlLedger {
    items: HashMap<ItemId, Item>,
}

impl CrawlLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, id: &ItemId) -> bool {
        self.items.contains_key(id)
    }

    pub fn get(&self, id: &ItemId) -> Option<&Item> {
        self.items.get(id)
    }

    pub fn record(&mut self, items: &[Item]) {
        for item in items {
            self.items.insert(item.id.clone(), item.clone());
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn into_items(self) -> HashMap<ItemId, Item> {
        self.items
    }
}

/// Per-leaf inputs of a crawl
pub struct LeafRequest<'a> {
    pub target: &'a ListingTarget,
    pub first_page: ListingPage,
    /// Maximum number of unseen items this leaf may collect
    pub budget: usize,
    pub seen: Option<&'a dyn SeenPredicate>,
}

#[derive(Debug, Clone, Default)]
pub struct SectionCrawler {
    pagination: PaginationCalculator,
}

impl SectionCrawler {
    pub const fn new(pagination: PaginationCalculator) -> Self {
        Self { pagination }
    }

    pub async fn crawl(
        &self,
        session: &mut dyn ListingSession,
        request: LeafRequest<'_>,
        ledger: &mut CrawlLedger,
        sink: &mpsc::Sender<ItemChunk>,
    ) -> Result<LeafReport> {
        let LeafRequest {
            target,
            first_page,
            budget,
            seen,
        } = request;

        let bound = self.pagination.page_bound(first_page.total_results);
        debug!(
            "Crawling {} (total {:?}, bound {} pages, budget {})",
            target, first_page.total_results, bound, budget
        );

        let mut crawl_seen: HashSet<ItemId> = HashSet::new();
        let mut page_number = first_page.page_number.max(1);
        let mut page = first_page;
        let mut pages_visited = 0u32;
        let mut items_extracted = 0usize;
        let mut unseen_emitted = 0usize;
        let mut emitted: Vec<ItemId> = Vec::new();

        let stop_reason = loop {
            pages_visited += 1;
            let extracted = page.items.len();
            items_extracted += extracted;

            // first occurrence within this crawl wins
            let fresh: Vec<Item> = std::mem::take(&mut page.items)
                .into_iter()
                .filter(|item| crawl_seen.insert(item.id.clone()))
                .collect();
            let fresh_count = fresh.len();

            let unseen: Vec<Item> = match seen {
                Some(predicate) => {
                    let ids: Vec<ItemId> = fresh.iter().map(|i| i.id.clone()).collect();
                    let already = predicate.already_seen(&ids).await?;
                    fresh.into_iter().filter(|i| !already.contains(&i.id)).collect()
                }
                None => fresh,
            };
            let unseen: Vec<Item> = unseen.into_iter().filter(|i| !ledger.contains(&i.id)).collect();

            debug!(
                "{} page {}: {} extracted, {} new to this crawl, {} unseen",
                target,
                page_number,
                extracted,
                fresh_count,
                unseen.len()
            );

            let page_unseen = unseen.len();
            if page_unseen > 0 {
                unseen_emitted += page_unseen;
                emitted.extend(unseen.iter().map(|i| i.id.clone()));
                ledger.record(&unseen);
                sink.send(ItemChunk::new(target.clone(), unseen))
                    .await
                    .map_err(|_| anyhow!("Dispatch queue closed while crawling {target}"))?;
            }

            if unseen_emitted >= budget {
                break StopReason::BudgetReached;
            }
            if extracted == 0 && page_number > 1 {
                break StopReason::EmptyPage;
            }
            if seen.is_some() && page_unseen == 0 {
                break StopReason::NoUnseenItems;
            }
            if seen.is_none() && fresh_count == 0 {
                break StopReason::AllItemsAlreadyCollected;
            }
            if page_number >= bound {
                break StopReason::PageBoundReached;
            }
            if !page.has_next {
                break StopReason::NoNextPage;
            }

            match session.open(target, page_number + 1).await {
                Ok(next) => {
                    page = next;
                    page_number += 1;
                }
                Err(e) => {
                    warn!("Could not advance {} past page {}: {:#}", target, page_number, e);
                    break StopReason::NavigationFailed(e.to_string());
                }
            }
        };

        info!(
            "Finished {}: {} pages, {} extracted, {} unseen ({})",
            target, pages_visited, items_extracted, unseen_emitted, stop_reason
        );

        Ok(LeafReport {
            target: target.clone(),
            pages_visited,
            items_extracted,
            unseen_emitted,
            emitted,
            stop_reason,
        })
    }
}
