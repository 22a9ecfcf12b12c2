//! Category planner for hierarchical sections
//!
//! Walks category → subcategory filters in random order, asks the oracle which
//! subcategories are worth a look, skips leaves the skip policies reject and
//! crawls the rest with the [`SectionCrawler`]. Snapshot changes are only
//! recorded here; the cycle commits them.

use anyhow::Result;
use std::collections::{HashMap, HashSet};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::dispatch::ItemChunk;
use super::section_crawler::{CrawlLedger, LeafReport, LeafRequest, SectionCrawler, StopReason};
use super::seen_resolver::SeenPredicate;
use super::skip_policy::{LeafCandidate, LeafSkipPolicy, SkipPolicies, SkipReason};
use crate::domain::{
    CategorySnapshot, FilterNode, Item, ItemId, ListingSession, ListingTarget, PendingSnapshotUpdate,
    PreferenceOracle, Section, SubtreeKey,
};

/// A leaf (or whole category) deliberately not crawled
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedLeaf {
    pub key: SubtreeKey,
    pub name: String,
    pub reason: SkipReason,
}

/// Result of planning one hierarchical section
#[derive(Debug, Default)]
pub struct PlanOutcome {
    /// Unseen items collected under this section, keyed by identifier
    pub items: HashMap<ItemId, Item>,
    pub pending_updates: Vec<PendingSnapshotUpdate>,
    /// Every category / subcategory key present in the filters this cycle
    pub observed_keys: HashSet<SubtreeKey>,
    /// Categories actually navigated into
    pub visited_category_ids: HashSet<String>,
    pub leaves: Vec<LeafReport>,
    pub skipped: Vec<SkippedLeaf>,
    pub budget_exhausted: bool,
}

impl PlanOutcome {
    fn absorb(&mut self, report: LeafReport, ledger: &CrawlLedger) {
        for id in &report.emitted {
            if let Some(item) = ledger.get(id) {
                self.items.insert(id.clone(), item.clone());
            }
        }
        self.leaves.push(report);
    }

    fn skip(&mut self, key: SubtreeKey, name: &str, reason: SkipReason) {
        info!("Skipping {} ({}): {}", name, key, reason);
        self.skipped.push(SkippedLeaf {
            key,
            name: name.to_string(),
            reason,
        });
    }
}

/// Shared per-section crawl context
pub struct PlanContext<'a> {
    pub session: &'a mut dyn ListingSession,
    pub snapshot: &'a CategorySnapshot,
    pub seen: &'a dyn SeenPredicate,
    pub ledger: &'a mut CrawlLedger,
    pub sink: &'a mpsc::Sender<ItemChunk>,
}

pub struct CategoryPlanner<'o> {
    crawler: SectionCrawler,
    policies: SkipPolicies,
    oracle: &'o dyn PreferenceOracle,
    rng: fastrand::Rng,
}

impl<'o> CategoryPlanner<'o> {
    pub fn new(crawler: SectionCrawler, policies: SkipPolicies, oracle: &'o dyn PreferenceOracle) -> Self {
        Self {
            crawler,
            policies,
            oracle,
            rng: fastrand::Rng::new(),
        }
    }

    /// Fix the traversal order for reproducible runs
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = fastrand::Rng::with_seed(seed);
        self
    }

    /// Plan and crawl `section` given the categories shown in its filter
    pub async fn plan(
        &mut self,
        ctx: PlanContext<'_>,
        section: Section,
        categories: &[FilterNode],
        budget: usize,
    ) -> Result<PlanOutcome> {
        let PlanContext {
            session,
            snapshot,
            seen,
            ledger,
            sink,
        } = ctx;

        let mut outcome = PlanOutcome::default();
        outcome
            .observed_keys
            .extend(categories.iter().map(|c| SubtreeKey::category(&c.id)));

        let mut order: Vec<&FilterNode> = categories.iter().collect();
        self.rng.shuffle(&mut order);
        info!("Planning {} across {} categories (budget {})", section, order.len(), budget);

        let mut collected = 0usize;
        for category in order {
            if collected >= budget {
                outcome.budget_exhausted = true;
                info!("Section {} budget of {} exhausted; not entering further categories", section, budget);
                break;
            }

            let category_key = SubtreeKey::category(&category.id);
            if self.policies.skips_unchanged(&category_key, category.item_count, snapshot) {
                outcome.skip(
                    category_key,
                    &category.name,
                    SkipReason::UnchangedCount(category.item_count.unwrap_or_default()),
                );
                continue;
            }

            let target = ListingTarget::category(section, &category.id);
            let first_page = match session.open(&target, 1).await {
                Ok(page) => page,
                Err(e) => {
                    warn!("Could not enter category {} ({}): {:#}", category.name, category.id, e);
                    continue;
                }
            };
            outcome.visited_category_ids.insert(category.id.clone());

            let subcategories = first_page.filter_nodes.clone();
            outcome.observed_keys.extend(
                subcategories
                    .iter()
                    .map(|s| SubtreeKey::subcategory(&category.id, &s.id)),
            );

            let mut subtree_complete = true;
            if subcategories.is_empty() {
                let leaf = LeafCandidate {
                    key: category_key.clone(),
                    name: category.name.clone(),
                    item_count: category.item_count,
                };
                if let Some(reason) = self.policies.should_skip(&leaf, snapshot) {
                    outcome.skip(leaf.key, &leaf.name, reason);
                } else {
                    let report = self
                        .crawler
                        .crawl(
                            &mut *session,
                            LeafRequest {
                                target: &target,
                                first_page,
                                budget: budget - collected,
                                seen: Some(seen),
                            },
                            &mut *ledger,
                            sink,
                        )
                        .await?;
                    collected += report.unseen_emitted;
                    subtree_complete = report.stop_reason != StopReason::BudgetReached;
                    outcome.absorb(report, ledger);
                }
            } else {
                let chosen = self.choose_subcategories(&category.name, &subcategories).await;
                for sub in chosen {
                    if collected >= budget {
                        subtree_complete = false;
                        break;
                    }
                    let leaf = LeafCandidate {
                        key: SubtreeKey::subcategory(&category.id, &sub.id),
                        name: sub.name.clone(),
                        item_count: sub.item_count,
                    };
                    if let Some(reason) = self.policies.should_skip(&leaf, snapshot) {
                        outcome.skip(leaf.key, &leaf.name, reason);
                        continue;
                    }

                    let sub_target = ListingTarget::subcategory(section, &category.id, &sub.id);
                    let sub_page = match session.open(&sub_target, 1).await {
                        Ok(page) => page,
                        Err(e) => {
                            warn!("Could not enter subcategory {} ({}): {:#}", sub.name, leaf.key, e);
                            subtree_complete = false;
                            continue;
                        }
                    };
                    let report = self
                        .crawler
                        .crawl(
                            &mut *session,
                            LeafRequest {
                                target: &sub_target,
                                first_page: sub_page,
                                budget: budget - collected,
                                seen: Some(seen),
                            },
                            &mut *ledger,
                            sink,
                        )
                        .await?;
                    collected += report.unseen_emitted;
                    if report.stop_reason == StopReason::BudgetReached {
                        subtree_complete = false;
                    } else if let Some(count) = sub.item_count {
                        outcome.pending_updates.push(PendingSnapshotUpdate {
                            key: leaf.key,
                            item_count: count,
                            name: sub.name.clone(),
                        });
                    }
                    outcome.absorb(report, ledger);
                }
            }

            match (subtree_complete, category.item_count) {
                (true, Some(count)) => outcome.pending_updates.push(PendingSnapshotUpdate {
                    key: category_key,
                    item_count: count,
                    name: category.name.clone(),
                }),
                (false, _) => debug!("Category {} not fully crawled; snapshot left as is", category.name),
                (true, None) => {}
            }
        }

        info!(
            "Planned {}: {} leaves crawled, {} skipped, {} unseen items, {} snapshot updates pending",
            section,
            outcome.leaves.len(),
            outcome.skipped.len(),
            outcome.items.len(),
            outcome.pending_updates.len()
        );
        Ok(outcome)
    }

    /// Subcategories the oracle picked, shuffled
    ///
    /// An empty answer selects nothing. An oracle failure falls back to all subcategories.
    async fn choose_subcategories(&mut self, category: &str, subcategories: &[FilterNode]) -> Vec<FilterNode> {
        let names: Vec<String> = subcategories.iter().map(|s| s.name.clone()).collect();
        let mut chosen: Vec<FilterNode> = match self.oracle.filter_subcategories(category, &names).await {
            Ok(picked) => {
                let by_name: HashMap<String, &FilterNode> = subcategories
                    .iter()
                    .map(|s| (s.name.trim().to_lowercase(), s))
                    .collect();
                let mut taken = HashSet::new();
                picked
                    .iter()
                    .filter_map(|name| {
                        let found = by_name.get(&name.trim().to_lowercase()).copied();
                        if found.is_none() {
                            warn!("Oracle picked unknown subcategory {:?} under {}", name, category);
                        }
                        found
                    })
                    .filter(|s| taken.insert(s.id.clone()))
                    .cloned()
                    .collect()
            }
            Err(e) => {
                warn!("Subcategory filter failed for {}, crawling all: {:#}", category, e);
                subcategories.to_vec()
            }
        };

        if chosen.is_empty() {
            info!("No subcategory of {} selected; skipping category", category);
        } else {
            debug!("{} of {} subcategories selected under {}", chosen.len(), subcategories.len(), category);
        }
        self.rng.shuffle(&mut chosen);
        chosen
    }
}
