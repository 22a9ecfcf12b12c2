//! Batch dispatch coordinator
//!
//! Drains the unseen-item stream produced by the crawlers, flushes fixed-size
//! batches to the preference oracle as soon as they fill up and keeps crawling
//! unblocked while those calls are in flight. The remainder is flushed once the
//! stream closes; then every outstanding call is awaited.

use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::domain::{Item, ItemId, ListingTarget, OracleItem, PreferenceOracle};

/// Unseen items of one crawled page
#[derive(Debug, Clone)]
pub struct ItemChunk {
    pub source: ListingTarget,
    pub items: Vec<Item>,
}

impl ItemChunk {
    pub const fn new(source: ListingTarget, items: Vec<Item>) -> Self {
        Self { source, items }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchSettings {
    pub batch_size: usize,
    /// Global cap on items classified per cycle, enforced at enqueue time
    pub max_items_per_run: usize,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            batch_size: 20,
            max_items_per_run: 150,
        }
    }
}

/// Everything the oracle said during one cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchOutcome {
    /// Items handed to the oracle, in enqueue order
    pub classified: Vec<ItemId>,
    /// Unique items received but left out because the cap was reached
    pub over_cap: usize,
    pub batches: usize,
    pub failed_batches: usize,
    /// Raw identifiers returned by the oracle, untrusted
    pub returned_ids: Vec<String>,
}

pub struct BatchDispatchCoordinator {
    oracle: Arc<dyn PreferenceOracle>,
    settings: DispatchSettings,
}

impl BatchDispatchCoordinator {
    pub fn new(oracle: Arc<dyn PreferenceOracle>, settings: DispatchSettings) -> Self {
        Self {
            oracle,
            settings: DispatchSettings {
                batch_size: settings.batch_size.max(1),
                ..settings
            },
        }
    }

    /// Consume `chunks` until every sender is dropped, then await all oracle calls
    pub async fn run(&self, mut chunks: mpsc::Receiver<ItemChunk>) -> DispatchOutcome {
        let mut outcome = DispatchOutcome::default();
        let mut enqueued: HashSet<ItemId> = HashSet::new();
        let mut queue: Vec<OracleItem> = Vec::new();
        let mut in_flight: JoinSet<(usize, anyhow::Result<Vec<String>>)> = JoinSet::new();

        while let Some(chunk) = chunks.recv().await {
            for item in &chunk.items {
                if !enqueued.insert(item.id.clone()) {
                    continue;
                }
                if outcome.classified.len() >= self.settings.max_items_per_run {
                    outcome.over_cap += 1;
                    continue;
                }
                outcome.classified.push(item.id.clone());
                queue.push(OracleItem::from(item));

                if queue.len() == self.settings.batch_size {
                    let batch = std::mem::take(&mut queue);
                    self.flush(&mut in_flight, &mut outcome, batch);
                }
            }
        }

        if !queue.is_empty() {
            self.flush(&mut in_flight, &mut outcome, queue);
        }

        while let Some(joined) = in_flight.join_next().await {
            match joined {
                Ok((batch_no, Ok(ids))) => {
                    debug!("Batch #{} returned {} ids", batch_no, ids.len());
                    outcome.returned_ids.extend(ids);
                }
                Ok((batch_no, Err(e))) => {
                    warn!("Oracle batch #{} failed, treating as empty: {:#}", batch_no, e);
                    outcome.failed_batches += 1;
                }
                Err(e) => {
                    error!("Oracle batch task panicked or was cancelled: {}", e);
                    outcome.failed_batches += 1;
                }
            }
        }

        if outcome.over_cap > 0 {
            info!(
                "Per-run classification cap of {} reached; {} items persisted without classification",
                self.settings.max_items_per_run, outcome.over_cap
            );
        }
        info!(
            "Dispatch finished: {} items in {} batches ({} failed), {} ids returned",
            outcome.classified.len(),
            outcome.batches,
            outcome.failed_batches,
            outcome.returned_ids.len()
        );
        outcome
    }

    fn flush(
        &self,
        in_flight: &mut JoinSet<(usize, anyhow::Result<Vec<String>>)>,
        outcome: &mut DispatchOutcome,
        batch: Vec<OracleItem>,
    ) {
        outcome.batches += 1;
        let batch_no = outcome.batches;
        debug!("Flushing batch #{} with {} items", batch_no, batch.len());
        let oracle = Arc::clone(&self.oracle);
        in_flight.spawn(async move { (batch_no, oracle.classify_appeal(&batch).await) });
    }
}

/// Oracle answers matched back to crawled items
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconciliation {
    /// Known appealing items, first occurrence order, no duplicates
    pub appealing: Vec<ItemId>,
    /// Returned values that match no item sent for classification
    pub unmatched: Vec<String>,
}

/// Match oracle-returned identifiers against the items it was actually sent
///
/// Items held back by the cap are crawled but never classified, so an answer
/// naming one of them is as untrusted as an id that was never listed.
pub fn reconcile(returned: &[String], classified: &[ItemId]) -> Reconciliation {
    let mut result = Reconciliation::default();
    let sent: HashSet<&ItemId> = classified.iter().collect();
    let mut taken: HashSet<ItemId> = HashSet::new();

    for raw in returned {
        match ItemId::parse(raw) {
            Ok(id) if sent.contains(&id) => {
                if taken.insert(id.clone()) {
                    result.appealing.push(id);
                }
            }
            _ => {
                warn!("Oracle returned unmatched ASIN {:?}", raw);
                result.unmatched.push(raw.clone());
            }
        }
    }
    result
}
