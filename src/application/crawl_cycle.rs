//! One full crawl cycle
//!
//! DETECTING → (skip → IDLE) | CRAWLING + DISPATCHING → RECONCILING → COMMITTING → IDLE
//!
//! Crawling and dispatching run concurrently: the crawl side owns the sending
//! half of the item queue and drops it when every section is done, which lets
//! the coordinator flush its remainder and await all outstanding oracle calls.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::category_planner::{CategoryPlanner, PlanContext, SkippedLeaf};
use super::change_detector::{ChangeDetector, CrawlDecision};
use super::dispatch::{BatchDispatchCoordinator, DispatchOutcome, DispatchSettings, ItemChunk, reconcile};
use super::section_crawler::{CrawlLedger, LeafReport, LeafRequest, SectionCrawler};
use super::seen_resolver::UnseenItemResolver;
use super::skip_policy::{PlannerSettings, SkipPolicies};
use crate::domain::{
    CategorySnapshot, CrawlStore, CycleStage, CycleStateMachine, Item, ItemId, ListingSession, ListingTarget,
    PaginationCalculator, PendingSnapshotUpdate, PreferenceOracle, Section, SectionCounts, SubtreeKey,
};

/// Engine tuning derived from the application config
#[derive(Debug, Clone)]
pub struct CycleSettings {
    pub sections: Vec<Section>,
    pub pagination: PaginationCalculator,
    /// Item budget of one section
    pub max_items_per_section: usize,
    pub planner: PlannerSettings,
    pub dispatch: DispatchSettings,
    /// Chunks buffered between crawler and coordinator
    pub queue_capacity: usize,
    /// Fixed category order, for tests
    pub shuffle_seed: Option<u64>,
}

impl Default for CycleSettings {
    fn default() -> Self {
        Self {
            sections: Section::ALL.to_vec(),
            pagination: PaginationCalculator::default(),
            max_items_per_section: 400,
            planner: PlannerSettings::default(),
            dispatch: DispatchSettings::default(),
            queue_capacity: 64,
            shuffle_seed: None,
        }
    }
}

/// Everything a completed cycle produced, for the notification layer
#[derive(Debug)]
pub struct CycleResult {
    pub cycle_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub section_counts: SectionCounts,
    pub decision: CrawlDecision,
    /// Every unseen item collected this cycle
    pub items: HashMap<ItemId, Item>,
    /// Items the oracle found appealing, in answer order
    pub appealing: Vec<ItemId>,
    pub new_item_count: usize,
    pub snapshot_updates: Vec<PendingSnapshotUpdate>,
    pub observed_category_keys: HashSet<SubtreeKey>,
    pub visited_category_ids: HashSet<String>,
    pub unmatched_oracle_ids: Vec<String>,
    pub leaves: Vec<LeafReport>,
    pub skipped: Vec<SkippedLeaf>,
    pub dispatch: DispatchOutcome,
}

impl CycleResult {
    /// Appealing items with their records, ready for notification
    pub fn appealing_items(&self) -> impl Iterator<Item = &Item> {
        self.appealing.iter().filter_map(|id| self.items.get(id))
    }
}

#[derive(Debug)]
pub enum CycleOutcome {
    /// No section grew; the counts were stored as the new baseline
    Skipped { cycle_id: Uuid, section_counts: SectionCounts },
    Completed(Box<CycleResult>),
}

#[derive(Debug, Default)]
struct CrawlOutput {
    ledger: CrawlLedger,
    leaves: Vec<LeafReport>,
    skipped: Vec<SkippedLeaf>,
    pending_updates: Vec<PendingSnapshotUpdate>,
    observed_keys: HashSet<SubtreeKey>,
    visited_category_ids: HashSet<String>,
    planner_ran: bool,
}

pub struct CrawlCycle {
    store: Arc<dyn CrawlStore>,
    oracle: Arc<dyn PreferenceOracle>,
    settings: CycleSettings,
}

impl CrawlCycle {
    pub fn new(store: Arc<dyn CrawlStore>, oracle: Arc<dyn PreferenceOracle>, settings: CycleSettings) -> Self {
        Self { store, oracle, settings }
    }

    /// Run one cycle against an exclusively held session
    pub async fn run(&self, session: &mut dyn ListingSession) -> Result<CycleOutcome> {
        let cycle_id = Uuid::new_v4();
        let started_at = Utc::now();
        let mut stages = CycleStateMachine::new();
        info!("🚀 Cycle {} started", cycle_id);

        stages.advance(CycleStage::Detecting)?;
        let section_counts = session
            .section_counts()
            .await
            .context("Failed to read section counts")?;
        let decision = ChangeDetector::new(Arc::clone(&self.store))
            .detect(&section_counts)
            .await?;
        if !decision.warrants_crawl() {
            stages.advance(CycleStage::Idle)?;
            info!("⏭️ Cycle {} skipped: no section grew ({})", cycle_id, section_counts);
            return Ok(CycleOutcome::Skipped {
                cycle_id,
                section_counts,
            });
        }

        let snapshot = self
            .store
            .category_snapshot()
            .await
            .context("Failed to read category snapshot")?;
        debug!("Loaded {} category snapshot rows", snapshot.len());

        stages.advance(CycleStage::Crawling)?;
        stages.advance(CycleStage::Dispatching)?;
        let resolver = UnseenItemResolver::new(Arc::clone(&self.store));
        let coordinator = BatchDispatchCoordinator::new(Arc::clone(&self.oracle), self.settings.dispatch);
        let (tx, rx) = mpsc::channel(self.settings.queue_capacity.max(1));

        let (crawled, dispatch) = tokio::join!(
            self.crawl_sections(session, &snapshot, &resolver, tx),
            coordinator.run(rx)
        );
        let crawled = crawled?;
        debug!("Crawl used {} seen lookups", resolver.lookups());

        stages.advance(CycleStage::Reconciling)?;
        let items = crawled.ledger.into_items();
        let reconciliation = reconcile(&dispatch.returned_ids, &dispatch.classified);
        if !reconciliation.unmatched.is_empty() {
            warn!(
                "{} oracle ids matched no classified item: {:?}",
                reconciliation.unmatched.len(),
                reconciliation.unmatched
            );
        }

        stages.advance(CycleStage::Committing)?;
        let all_items: Vec<Item> = items.values().cloned().collect();
        self.store
            .upsert_items(&all_items, &reconciliation.appealing)
            .await
            .context("Failed to persist items")?;
        self.store
            .set_last_section_counts(&section_counts)
            .await
            .context("Failed to persist section counts")?;
        for update in &crawled.pending_updates {
            self.store
                .set_category_snapshot(&update.key, update.item_count, &update.name)
                .await
                .with_context(|| format!("Failed to persist snapshot for {}", update.key))?;
        }
        if crawled.planner_ran {
            self.store
                .prune_category_snapshot(&crawled.observed_keys, &crawled.visited_category_ids)
                .await
                .context("Failed to prune category snapshot")?;
        }
        stages.advance(CycleStage::Idle)?;

        let result = CycleResult {
            cycle_id,
            started_at,
            finished_at: Utc::now(),
            section_counts,
            decision,
            new_item_count: items.len(),
            items,
            appealing: reconciliation.appealing,
            snapshot_updates: crawled.pending_updates,
            observed_category_keys: crawled.observed_keys,
            visited_category_ids: crawled.visited_category_ids,
            unmatched_oracle_ids: reconciliation.unmatched,
            leaves: crawled.leaves,
            skipped: crawled.skipped,
            dispatch,
        };
        info!(
            "✅ Cycle {} committed: {} new items, {} appealing, {} leaves, {} skipped",
            cycle_id,
            result.new_item_count,
            result.appealing.len(),
            result.leaves.len(),
            result.skipped.len()
        );
        for (stage, spent) in stages.history() {
            debug!("  {} took {:?}", stage, spent);
        }
        Ok(CycleOutcome::Completed(Box::new(result)))
    }

    /// Crawl every configured section in order, streaming unseen items into `sink`
    async fn crawl_sections(
        &self,
        session: &mut dyn ListingSession,
        snapshot: &CategorySnapshot,
        resolver: &UnseenItemResolver,
        sink: mpsc::Sender<ItemChunk>,
    ) -> Result<CrawlOutput> {
        let crawler = SectionCrawler::new(self.settings.pagination);
        let budget = self.settings.max_items_per_section;
        let mut out = CrawlOutput::default();

        for &section in &self.settings.sections {
            let target = ListingTarget::section(section);
            let first_page = match session.open(&target, 1).await {
                Ok(page) => page,
                Err(e) => {
                    warn!("Could not open section {}: {:#}", section, e);
                    continue;
                }
            };

            if first_page.filter_nodes.is_empty() {
                let report = crawler
                    .crawl(
                        &mut *session,
                        LeafRequest {
                            target: &target,
                            first_page,
                            budget,
                            seen: Some(resolver),
                        },
                        &mut out.ledger,
                        &sink,
                    )
                    .await?;
                out.leaves.push(report);
                continue;
            }

            let mut planner = CategoryPlanner::new(
                crawler.clone(),
                SkipPolicies::from_settings(&self.settings.planner),
                &*self.oracle,
            );
            if let Some(seed) = self.settings.shuffle_seed {
                planner = planner.with_seed(seed);
            }
            let plan = planner
                .plan(
                    PlanContext {
                        session: &mut *session,
                        snapshot,
                        seen: resolver,
                        ledger: &mut out.ledger,
                        sink: &sink,
                    },
                    section,
                    &first_page.filter_nodes,
                    budget,
                )
                .await?;

            out.planner_ran = true;
            out.leaves.extend(plan.leaves);
            out.skipped.extend(plan.skipped);
            out.pending_updates.extend(plan.pending_updates);
            out.observed_keys.extend(plan.observed_keys);
            out.visited_category_ids.extend(plan.visited_category_ids);
        }

        info!(
            "Crawl finished: {} unseen items across {} leaves",
            out.ledger.len(),
            out.leaves.len()
        );
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::FilterNode;
    use crate::test_utils::{MemoryStore, ScriptedOracle, ScriptedSession};

    fn ids(prefix: &str, n: u32) -> Vec<String> {
        (0..n).map(|i| format!("{prefix}{i:06}")).collect()
    }

    fn counts(r: u32, a: u32, x: u32) -> SectionCounts {
        SectionCounts::new()
            .with(Section::Recommended, r)
            .with(Section::Available, a)
            .with(Section::Additional, x)
    }

    #[tokio::test]
    async fn unchanged_counts_skip_without_navigation() {
        let store = Arc::new(MemoryStore::default());
        store.set_last_section_counts(&counts(5, 10, 0)).await.unwrap();
        let cycle = CrawlCycle::new(store.clone(), Arc::new(ScriptedOracle::default()), CycleSettings::default());
        let mut session = ScriptedSession::new().with_counts(counts(5, 9, 0));

        let outcome = cycle.run(&mut session).await.unwrap();

        assert!(matches!(outcome, CycleOutcome::Skipped { .. }));
        assert_eq!(session.open_count(), 0);
        assert_eq!(store.last_section_counts().await.unwrap(), Some(counts(5, 9, 0)));
    }

    #[tokio::test]
    async fn flat_and_hierarchical_sections_in_one_cycle() {
        let store = Arc::new(MemoryStore::default());
        let oracle = Arc::new(ScriptedOracle::default().appealing(&["B0RE000001", "B0NOTREAL99"]));
        let settings = CycleSettings {
            shuffle_seed: Some(1),
            ..CycleSettings::default()
        };
        let cycle = CrawlCycle::new(store.clone(), oracle, settings);
        let mut session = ScriptedSession::new()
            .with_counts(counts(3, 2, 4))
            .with_pages(ListingTarget::section(Section::Recommended), Some(3), vec![ids("B0RE", 3)])
            .with_pages(ListingTarget::section(Section::Available), Some(2), vec![ids("B0AV", 2)])
            .with_pages(ListingTarget::section(Section::Additional), Some(4), vec![ids("B0AD", 4)])
            .with_filter(
                ListingTarget::section(Section::Additional),
                vec![FilterNode::new("9", "Garden", Some(4))],
            )
            .with_pages(ListingTarget::category(Section::Additional, "9"), Some(4), vec![ids("B0GA", 4)]);

        let CycleOutcome::Completed(result) = cycle.run(&mut session).await.unwrap() else {
            panic!("expected a completed cycle");
        };

        assert_eq!(result.new_item_count, 9);
        assert_eq!(result.appealing, vec![ItemId::parse("B0RE000001").unwrap()]);
        assert_eq!(result.unmatched_oracle_ids, vec!["B0NOTREAL99".to_string()]);
        assert!(result.visited_category_ids.contains("9"));

        let record = store.suggestion(&ItemId::parse("B0RE000001").unwrap()).await.unwrap().unwrap();
        assert!(record.is_suggested());
        let other = store.suggestion(&ItemId::parse("B0GA000000").unwrap()).await.unwrap().unwrap();
        assert!(!other.is_suggested());
        assert_eq!(store.last_section_counts().await.unwrap(), Some(counts(3, 2, 4)));
        assert_eq!(
            store.category_snapshot().await.unwrap().count_for(&SubtreeKey::category("9")),
            Some(4)
        );
    }

    #[tokio::test]
    async fn store_failure_aborts_before_commit() {
        let store = Arc::new(MemoryStore::default().failing_seen_lookups());
        let cycle = CrawlCycle::new(store.clone(), Arc::new(ScriptedOracle::default()), CycleSettings::default());
        let mut session = ScriptedSession::new()
            .with_counts(counts(1, 0, 0))
            .with_pages(ListingTarget::section(Section::Recommended), Some(1), vec![ids("B0RE", 1)]);

        assert!(cycle.run(&mut session).await.is_err());
        assert_eq!(store.last_section_counts().await.unwrap(), None);
    }

    #[tokio::test]
    async fn answer_naming_an_item_held_back_by_the_cap_is_not_suggested() {
        let store = Arc::new(MemoryStore::default());
        let oracle = Arc::new(ScriptedOracle::default().appealing(&["B0RE000002"]));
        let settings = CycleSettings {
            dispatch: DispatchSettings {
                batch_size: 2,
                max_items_per_run: 2,
            },
            ..CycleSettings::default()
        };
        let cycle = CrawlCycle::new(store.clone(), oracle, settings);
        let mut session = ScriptedSession::new()
            .with_counts(counts(3, 0, 0))
            .with_pages(ListingTarget::section(Section::Recommended), Some(3), vec![ids("B0RE", 3)]);

        let CycleOutcome::Completed(result) = cycle.run(&mut session).await.unwrap() else {
            panic!("expected a completed cycle");
        };

        assert_eq!(result.dispatch.classified.len(), 2);
        assert_eq!(result.dispatch.over_cap, 1);
        assert!(result.appealing.is_empty());
        assert_eq!(result.unmatched_oracle_ids, vec!["B0RE000002".to_string()]);
        let held_back = store.suggestion(&ItemId::parse("B0RE000002").unwrap()).await.unwrap().unwrap();
        assert!(!held_back.is_suggested());
    }
}
